use std::f32::consts::PI;

use crate::error::{Error, Result};
use crate::pose::{BodyPart, Human, PartIndex};

/// 相対レシピ: (アンカー, 補間対象) の優先順リスト
///
/// アンカーが対象フレームに存在し、補間対象が欠けているときに適用できる。
/// 並びは同名ミラー → 同側チェーン → 側→中央 → 中央→側 → 交差の順
const RELATIVE_RECIPE: [(PartIndex, PartIndex); 64] = [
    // 同名ミラー
    (PartIndex::EyeR, PartIndex::EyeL),
    (PartIndex::EyeL, PartIndex::EyeR),
    (PartIndex::ShoulderR, PartIndex::ShoulderL),
    (PartIndex::ShoulderL, PartIndex::ShoulderR),
    (PartIndex::EarR, PartIndex::EarL),
    (PartIndex::EarL, PartIndex::EarR),
    (PartIndex::HipR, PartIndex::HipL),
    (PartIndex::HipL, PartIndex::HipR),
    // 同側チェーンおよび中央同士
    (PartIndex::EyeR, PartIndex::EarR),
    (PartIndex::EyeL, PartIndex::EarL),
    (PartIndex::KneeR, PartIndex::AnkleR),
    (PartIndex::KneeL, PartIndex::AnkleL),
    (PartIndex::ShoulderR, PartIndex::HipR),
    (PartIndex::ShoulderL, PartIndex::HipL),
    (PartIndex::HipR, PartIndex::KneeR),
    (PartIndex::HipL, PartIndex::KneeL),
    (PartIndex::KneeR, PartIndex::HipR),
    (PartIndex::KneeL, PartIndex::HipL),
    (PartIndex::HipR, PartIndex::ShoulderR),
    (PartIndex::HipL, PartIndex::ShoulderL),
    (PartIndex::AnkleR, PartIndex::KneeR),
    (PartIndex::AnkleL, PartIndex::KneeL),
    (PartIndex::EarR, PartIndex::EyeR),
    (PartIndex::EarL, PartIndex::EyeL),
    (PartIndex::ShoulderR, PartIndex::ElbowR),
    (PartIndex::ShoulderL, PartIndex::ElbowL),
    (PartIndex::ElbowR, PartIndex::ShoulderR),
    (PartIndex::ElbowL, PartIndex::ShoulderL),
    (PartIndex::Nose, PartIndex::Neck),
    (PartIndex::Neck, PartIndex::Nose),
    (PartIndex::ElbowR, PartIndex::WristR),
    (PartIndex::ElbowL, PartIndex::WristL),
    (PartIndex::WristR, PartIndex::ElbowR),
    (PartIndex::WristL, PartIndex::ElbowL),
    // 側 → 中央
    (PartIndex::EyeR, PartIndex::Nose),
    (PartIndex::EyeL, PartIndex::Nose),
    (PartIndex::EarR, PartIndex::Nose),
    (PartIndex::EarL, PartIndex::Nose),
    (PartIndex::ShoulderR, PartIndex::Neck),
    (PartIndex::ShoulderL, PartIndex::Neck),
    (PartIndex::EyeR, PartIndex::Neck),
    (PartIndex::EyeL, PartIndex::Neck),
    (PartIndex::EarR, PartIndex::Neck),
    (PartIndex::EarL, PartIndex::Neck),
    (PartIndex::HipR, PartIndex::Neck),
    (PartIndex::HipL, PartIndex::Neck),
    // 中央 → 側
    (PartIndex::Neck, PartIndex::ShoulderR),
    (PartIndex::Neck, PartIndex::ShoulderL),
    (PartIndex::Nose, PartIndex::EarR),
    (PartIndex::Nose, PartIndex::EarL),
    (PartIndex::Nose, PartIndex::EyeR),
    (PartIndex::Nose, PartIndex::EyeL),
    (PartIndex::Neck, PartIndex::EarR),
    (PartIndex::Neck, PartIndex::EarL),
    (PartIndex::Neck, PartIndex::EyeR),
    (PartIndex::Neck, PartIndex::EyeL),
    // 交差
    (PartIndex::EyeR, PartIndex::EarL),
    (PartIndex::EyeL, PartIndex::EarR),
    (PartIndex::ShoulderR, PartIndex::HipL),
    (PartIndex::ShoulderL, PartIndex::HipR),
    (PartIndex::HipR, PartIndex::ShoulderL),
    (PartIndex::HipL, PartIndex::ShoulderR),
    (PartIndex::EarR, PartIndex::EyeL),
    (PartIndex::EarL, PartIndex::EyeR),
];

/// 絶対レシピ: 足首を最優先とする固定順
const ABSOLUTE_RECIPE: [PartIndex; 18] = [
    PartIndex::AnkleR,
    PartIndex::AnkleL,
    PartIndex::Neck,
    PartIndex::ShoulderR,
    PartIndex::ShoulderL,
    PartIndex::HipR,
    PartIndex::HipL,
    PartIndex::KneeR,
    PartIndex::KneeL,
    PartIndex::Nose,
    PartIndex::EyeR,
    PartIndex::EyeL,
    PartIndex::EarR,
    PartIndex::EarL,
    PartIndex::ElbowR,
    PartIndex::ElbowL,
    PartIndex::WristR,
    PartIndex::WristL,
];

/// 近傍フレームを取得するコールバック
///
/// `(relative_pos, left)` でフレーム位置を指定する。`relative_pos == 0` は
/// 対象フレーム自身。戻り値の第 1 要素はフレームが範囲内かどうか、
/// 第 2 要素は範囲内の場合のみ有効で、人物が見つからなければ `None`
pub type FrameCallback<'a> = dyn FnMut(usize, bool) -> Result<(bool, Option<Human>)> + 'a;

fn get_part<'a>(human: &'a Human, index: PartIndex) -> Result<&'a BodyPart> {
    human.get(index).ok_or_else(|| {
        Error::InvariantViolation(format!("expected part {} to be present", index.name()))
    })
}

fn has_parts(human: &Human, parts: &[PartIndex]) -> bool {
    parts.iter().all(|&part| human.has_part(part))
}

/// 指定パーツをすべて含む最も近い左右フレームのオフセットを探す
///
/// `loff + roff <= fuzz_range` を満たす範囲で、左右それぞれ独立に
/// 内側から走査する。範囲外に到達した時点で打ち切り
fn search_for_parts(
    fuzz_range: usize,
    parts: &[PartIndex],
    callback: &mut FrameCallback,
) -> Result<Option<(usize, usize)>> {
    if fuzz_range < 2 {
        return Ok(None);
    }

    let mut left_offset = None;
    for loff in 1..fuzz_range {
        let (valid, human) = callback(loff, true)?;
        if !valid {
            return Ok(None);
        }
        if human.map_or(false, |h| has_parts(&h, parts)) {
            left_offset = Some(loff);
            break;
        }
    }
    let Some(loff) = left_offset else {
        return Ok(None);
    };

    let mut right_offset = None;
    for roff in 1..=(fuzz_range - loff) {
        let (valid, human) = callback(roff, false)?;
        if !valid {
            return Ok(None);
        }
        if human.map_or(false, |h| has_parts(&h, parts)) {
            right_offset = Some(roff);
            break;
        }
    }
    let Some(roff) = right_offset else {
        return Ok(None);
    };

    Ok(Some((loff, roff)))
}

fn relative_score(
    loff: usize,
    roff: usize,
    left: &Human,
    right: &Human,
    target: &Human,
    anchor: PartIndex,
    part: PartIndex,
) -> Result<f32> {
    let mut score = 1.0f32;
    score *= get_part(left, anchor)?.score;
    score *= get_part(left, part)?.score;
    score *= get_part(right, anchor)?.score;
    score *= get_part(right, part)?.score;
    score *= get_part(target, anchor)?.score;
    score /= (loff + roff) as f32;
    Ok(score)
}

fn absolute_score(
    loff: usize,
    roff: usize,
    left: &Human,
    right: &Human,
    part: PartIndex,
) -> Result<f32> {
    let mut score = 1.0f32 / 3.0;
    score *= get_part(left, part)?.score;
    score *= get_part(right, part)?.score;
    score /= (loff + roff) as f32;
    Ok(score)
}

/// 左右フレームのアンカー→対象ベクトルを角度・長さで加重平均し、
/// 対象フレームのアンカーからの相対位置として配置する
fn relative_part(
    loff: usize,
    roff: usize,
    left: &Human,
    right: &Human,
    target: &Human,
    anchor: PartIndex,
    part: PartIndex,
    score: f32,
) -> Result<BodyPart> {
    let left_anchor = get_part(left, anchor)?;
    let left_target = get_part(left, part)?;
    let x_left_diff = left_target.x - left_anchor.x;
    let y_left_diff = left_target.y - left_anchor.y;

    // 縮退判定は厳密比較。イプシロン比較にすると既存データと結果がずれる
    let mut left_angle = 0.0f32;
    if y_left_diff != 0.0 || x_left_diff != 0.0 {
        left_angle = y_left_diff.atan2(x_left_diff);
    }
    let left_length = (x_left_diff * x_left_diff + y_left_diff * y_left_diff).sqrt();

    let right_anchor = get_part(right, anchor)?;
    let right_target = get_part(right, part)?;
    let x_right_diff = right_target.x - right_anchor.x;
    let y_right_diff = right_target.y - right_anchor.y;

    let mut right_angle = 0.0f32;
    if y_right_diff != 0.0 || x_right_diff != 0.0 {
        right_angle = y_right_diff.atan2(x_right_diff);
    }
    let right_length = (x_right_diff * x_right_diff + y_right_diff * y_right_diff).sqrt();

    // 片側が縮退していればもう一方の角度を採用する
    if y_left_diff == 0.0 && x_left_diff == 0.0 && (y_right_diff != 0.0 || x_right_diff != 0.0) {
        left_angle = right_angle;
    } else if y_right_diff == 0.0
        && x_right_diff == 0.0
        && (y_left_diff != 0.0 || x_left_diff != 0.0)
    {
        right_angle = left_angle;
    }

    // 角度が ±π の分岐をまたぐ場合は一方を 2π ずらして平均を幾何的に正しくする
    if left_angle > 0.0 && right_angle < 0.0 {
        if left_angle - right_angle > PI {
            right_angle += 2.0 * PI;
        }
    } else if left_angle < 0.0 && right_angle > 0.0 && right_angle - left_angle > PI {
        left_angle += 2.0 * PI;
    }

    let loff = loff as f32;
    let roff = roff as f32;
    let toff = loff + roff;

    let angle = left_angle / toff * roff + right_angle / toff * loff;
    let length = left_length / toff * roff + right_length / toff * loff;

    let target_anchor = get_part(target, anchor)?;
    let x = target_anchor.x + length * angle.cos();
    let y = target_anchor.y + length * angle.sin();

    Ok(BodyPart::new(part, x, y, score))
}

/// 左右フレームの座標そのものを加重平均して配置する
fn absolute_part(
    loff: usize,
    roff: usize,
    left: &Human,
    right: &Human,
    part: PartIndex,
    score: f32,
) -> Result<BodyPart> {
    let left_part = get_part(left, part)?;
    let right_part = get_part(right, part)?;

    let loff = loff as f32;
    let roff = roff as f32;
    let toff = loff + roff;

    let x = left_part.x / toff * roff + right_part.x / toff * loff;
    let y = left_part.y / toff * roff + right_part.y / toff * loff;

    Ok(BodyPart::new(part, x, y, score))
}

enum Candidate {
    Relative {
        loff: usize,
        roff: usize,
        anchor: PartIndex,
        part: PartIndex,
    },
    Absolute {
        loff: usize,
        roff: usize,
        part: PartIndex,
    },
}

/// ファズ推定の参照範囲 [左端, 右端] を返す（両端含む）
///
/// `fuzz_range == 0` のときは `[pos, pos]`
pub fn get_fuzz_lr(pos: usize, length: usize, fuzz_range: usize) -> Result<(usize, usize)> {
    if length == 0 {
        return Err(Error::InvalidArgument("length == 0".into()));
    }
    if pos >= length {
        return Err(Error::InvalidArgument(format!(
            "pos {} out of range (length {})",
            pos, length
        )));
    }

    let mut left = pos;
    let mut right = pos;

    if fuzz_range != 0 {
        left = pos.saturating_sub(fuzz_range - 1);
        right = if length - pos > fuzz_range - 1 {
            pos + (fuzz_range - 1)
        } else {
            length - 1
        };
    }

    Ok((left, right))
}

/// 欠けているキーポイントを近傍フレームから補間する
///
/// 全候補レシピを評価し、最もスコアの高い 1 件を適用しては再評価を
/// 繰り返す。相対レシピが 1 件でも適用可能な間は絶対レシピを見ない。
/// 対象フレームに人物がいない場合は、絶対レシピが最初のパーツから
/// 新しい Human を構築する。適用できるレシピがなくなったら終了
pub fn fuzz(fuzz_range: usize, callback: &mut FrameCallback) -> Result<Option<Human>> {
    let (valid, original) = callback(0, false)?;
    if !valid {
        return Err(Error::InvalidArgument("fuzz target out of bounds".into()));
    }

    let mut target = original;

    loop {
        let mut best_score = -1.0f32;
        let mut candidate: Option<Candidate> = None;

        if let Some(current) = &target {
            for &(anchor, part) in &RELATIVE_RECIPE {
                if current.has_part(part) || !current.has_part(anchor) {
                    continue;
                }

                let Some((loff, roff)) =
                    search_for_parts(fuzz_range, &[anchor, part], callback)?
                else {
                    continue;
                };

                let left = require_human(callback(loff, true)?)?;
                let right = require_human(callback(roff, false)?)?;

                let score = relative_score(loff, roff, &left, &right, current, anchor, part)?;
                if score > best_score {
                    best_score = score;
                    candidate = Some(Candidate::Relative {
                        loff,
                        roff,
                        anchor,
                        part,
                    });
                }
            }
        }

        if !matches!(candidate, Some(Candidate::Relative { .. })) {
            for &part in &ABSOLUTE_RECIPE {
                if target.as_ref().map_or(false, |t| t.has_part(part)) {
                    continue;
                }

                let Some((loff, roff)) = search_for_parts(fuzz_range, &[part], callback)? else {
                    continue;
                };

                let left = require_human(callback(loff, true)?)?;
                let right = require_human(callback(roff, false)?)?;

                let score = absolute_score(loff, roff, &left, &right, part)?;
                if score > best_score {
                    best_score = score;
                    candidate = Some(Candidate::Absolute { loff, roff, part });
                }
            }
        }

        match candidate {
            Some(Candidate::Relative {
                loff,
                roff,
                anchor,
                part,
            }) => {
                let left = require_human(callback(loff, true)?)?;
                let right = require_human(callback(roff, false)?)?;
                let current = target.as_mut().ok_or_else(|| {
                    Error::InvariantViolation("relative recipe without target".into())
                })?;
                let body_part =
                    relative_part(loff, roff, &left, &right, current, anchor, part, best_score)?;
                current.insert(body_part);
            }
            Some(Candidate::Absolute { loff, roff, part }) => {
                let left = require_human(callback(loff, true)?)?;
                let right = require_human(callback(roff, false)?)?;
                let body_part = absolute_part(loff, roff, &left, &right, part, best_score)?;
                match &mut target {
                    Some(current) => current.insert(body_part),
                    None => target = Some(Human::new([body_part])),
                }
            }
            None => break,
        }
    }

    Ok(target)
}

fn require_human(result: (bool, Option<Human>)) -> Result<Human> {
    result
        .1
        .ok_or_else(|| Error::InvariantViolation("searched frame lost its human".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// フレーム列からコールバックを作る。pos が対象フレーム
    fn frame_callback(
        frames: Vec<Option<Human>>,
        pos: usize,
    ) -> impl FnMut(usize, bool) -> Result<(bool, Option<Human>)> {
        move |offset, left| {
            let index = if left {
                match pos.checked_sub(offset) {
                    Some(i) => i,
                    None => return Ok((false, None)),
                }
            } else {
                pos + offset
            };
            match frames.get(index) {
                Some(entry) => Ok((true, entry.clone())),
                None => Ok((false, None)),
            }
        }
    }

    fn nose_human(x: f32, y: f32, score: f32) -> Human {
        Human::new(vec![BodyPart::new(PartIndex::Nose, x, y, score)])
    }

    #[test]
    fn test_get_fuzz_lr() {
        assert_eq!(get_fuzz_lr(5, 10, 3).unwrap(), (3, 7));
        assert_eq!(get_fuzz_lr(1, 10, 3).unwrap(), (0, 3));
        assert_eq!(get_fuzz_lr(8, 10, 3).unwrap(), (6, 9));
        assert_eq!(get_fuzz_lr(5, 10, 0).unwrap(), (5, 5));
        assert!(get_fuzz_lr(0, 0, 3).is_err());
        assert!(get_fuzz_lr(10, 10, 3).is_err());

        // 範囲は必ず pos を含み [0, length-1] に収まる
        for pos in 0..10 {
            for fuzz_range in 0..6 {
                let (l, r) = get_fuzz_lr(pos, 10, fuzz_range).unwrap();
                assert!(l <= pos && pos <= r && r <= 9);
            }
        }
    }

    #[test]
    fn test_absolute_recipe_builds_human() {
        // 対象フレームに人物なし、両隣に nose のみ
        let frames = vec![
            Some(nose_human(0.5, 0.5, 1.0)),
            None,
            Some(nose_human(0.5, 0.5, 1.0)),
        ];
        let mut callback = frame_callback(frames, 1);
        let result = fuzz(3, &mut callback).unwrap().unwrap();

        assert_eq!(result.len(), 1);
        let nose = result.get(PartIndex::Nose).unwrap();
        assert!((nose.x - 0.5).abs() < 1e-6);
        assert!((nose.y - 0.5).abs() < 1e-6);
        // score = (1/3) * 1 * 1 / (1+1) = 1/6
        assert!((nose.score - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_relative_recipe_places_from_anchor() {
        let neighbor = Human::new(vec![
            BodyPart::new(PartIndex::Neck, 0.6, 0.5, 1.0),
            BodyPart::new(PartIndex::Nose, 0.5, 0.5, 1.0),
        ]);
        let target = Human::new(vec![BodyPart::new(PartIndex::Neck, 0.6, 0.5, 1.0)]);
        let frames = vec![Some(neighbor.clone()), Some(target), Some(neighbor)];

        let mut callback = frame_callback(frames, 1);
        let result = fuzz(3, &mut callback).unwrap().unwrap();

        let nose = result.get(PartIndex::Nose).unwrap();
        assert!((nose.x - 0.5).abs() < 1e-6);
        assert!((nose.y - 0.5).abs() < 1e-6);
        // 1*1*1*1*1 / (1+1) = 0.5
        assert!((nose.score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_angle_branch_cut_average() {
        // 左右の角度が +3rad / -3rad。素朴な平均 0 ではなく π 側でなければならない
        let angle_l = 3.0f32;
        let angle_r = -3.0f32;
        let left = Human::new(vec![
            BodyPart::new(PartIndex::Neck, 0.5, 0.5, 1.0),
            BodyPart::new(
                PartIndex::Nose,
                0.5 + 0.1 * angle_l.cos(),
                0.5 + 0.1 * angle_l.sin(),
                1.0,
            ),
        ]);
        let right = Human::new(vec![
            BodyPart::new(PartIndex::Neck, 0.5, 0.5, 1.0),
            BodyPart::new(
                PartIndex::Nose,
                0.5 + 0.1 * angle_r.cos(),
                0.5 + 0.1 * angle_r.sin(),
                1.0,
            ),
        ]);
        let target = Human::new(vec![BodyPart::new(PartIndex::Neck, 0.5, 0.5, 1.0)]);
        let frames = vec![Some(left), Some(target), Some(right)];

        let mut callback = frame_callback(frames, 1);
        let result = fuzz(3, &mut callback).unwrap().unwrap();

        let nose = result.get(PartIndex::Nose).unwrap();
        // 平均角 π → neck の真「上流」(x 負方向)
        assert!((nose.x - 0.4).abs() < 1e-3, "nose.x = {}", nose.x);
        assert!((nose.y - 0.5).abs() < 1e-3, "nose.y = {}", nose.y);
    }

    #[test]
    fn test_fuzz_is_idempotent() {
        let frames = vec![
            Some(Human::new(vec![
                BodyPart::new(PartIndex::Neck, 0.6, 0.5, 0.9),
                BodyPart::new(PartIndex::Nose, 0.5, 0.48, 0.8),
                BodyPart::new(PartIndex::ShoulderR, 0.62, 0.4, 0.7),
            ])),
            Some(Human::new(vec![BodyPart::new(
                PartIndex::Neck,
                0.61,
                0.5,
                0.9,
            )])),
            Some(Human::new(vec![
                BodyPart::new(PartIndex::Neck, 0.62, 0.5, 0.9),
                BodyPart::new(PartIndex::Nose, 0.52, 0.52, 0.8),
                BodyPart::new(PartIndex::ShoulderR, 0.64, 0.42, 0.7),
            ])),
        ];

        let mut callback = frame_callback(frames.clone(), 1);
        let first = fuzz(3, &mut callback).unwrap();

        let mut frames_again = frames;
        frames_again[1] = first.clone();
        let mut callback = frame_callback(frames_again, 1);
        let second = fuzz(3, &mut callback).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_fuzz_scores_bounded() {
        let full = Human::new(
            (0..PartIndex::COUNT)
                .filter_map(PartIndex::from_index)
                .map(|part| {
                    BodyPart::new(part, 0.1 + 0.04 * part as u8 as f32, 0.5, 1.0)
                })
                .collect::<Vec<_>>(),
        );
        let frames = vec![Some(full.clone()), None, Some(full)];

        let mut callback = frame_callback(frames, 1);
        let result = fuzz(3, &mut callback).unwrap().unwrap();

        assert_eq!(result.len(), PartIndex::COUNT);
        for part in result.body_parts().values() {
            assert!(part.score <= 1.0, "score {} > 1", part.score);
        }
    }

    #[test]
    fn test_fuzz_range_zero_returns_target() {
        let frames = vec![
            Some(nose_human(0.4, 0.4, 1.0)),
            Some(nose_human(0.5, 0.5, 1.0)),
            Some(nose_human(0.6, 0.6, 1.0)),
        ];
        let mut callback = frame_callback(frames, 1);
        let result = fuzz(0, &mut callback).unwrap().unwrap();
        assert_eq!(result, nose_human(0.5, 0.5, 1.0));
    }

    #[test]
    fn test_fuzz_target_out_of_bounds_is_error() {
        let mut callback = |_offset: usize, _left: bool| Ok((false, None));
        assert!(fuzz(3, &mut callback).is_err());
    }
}
