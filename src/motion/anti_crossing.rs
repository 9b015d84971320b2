use crate::pose::{BodyPart, Human, PartIndex};

/// 左右対称パーツの組 (左, 右)
const SYMMETRIC_PAIRS: [(PartIndex, PartIndex); 8] = [
    (PartIndex::EyeL, PartIndex::EyeR),
    (PartIndex::EarL, PartIndex::EarR),
    (PartIndex::ShoulderL, PartIndex::ShoulderR),
    (PartIndex::ElbowL, PartIndex::ElbowR),
    (PartIndex::WristL, PartIndex::WristR),
    (PartIndex::HipL, PartIndex::HipR),
    (PartIndex::KneeL, PartIndex::KneeR),
    (PartIndex::AnkleL, PartIndex::AnkleR),
];

fn dist(a: &BodyPart, b: &BodyPart) -> f32 {
    ((a.x - b.x) * (a.x - b.x) + (a.y - b.y) * (a.y - b.y)).sqrt()
}

/// 水平方向（左右 = y 軸）のみの距離
fn hdist(a: &BodyPart, b: &BodyPart) -> f32 {
    (a.y - b.y).abs()
}

/// 隣接フレームとの比較で左右が入れ替わったキーポイントを除去する
///
/// `target` は処理対象フレームの推定結果（パーツ 1 つ以上）。`left` と
/// `right` は時間軸上の両隣の同一人物。欠けている隣接フレームは単に
/// 判定材料にならない。対称パーツ以外には触れない
///
/// 注意: フレームの左右と身体パーツの左右が混在するので読み違えないこと
pub fn anti_crossing(target: &Human, left: Option<&Human>, right: Option<&Human>) -> Human {
    let mut result = target.clone();

    // 身体サイズ = 全パーツ AABB の長辺
    let size = target
        .bounding_box()
        .map(|(x1, x2, y1, y2)| (x2 - x1).max(y2 - y1))
        .unwrap_or(0.0);

    for &(left_part, right_part) in &SYMMETRIC_PAIRS {
        let mut left_cross = false;
        let mut right_cross = false;

        let target_0 = target.get(left_part);
        let target_1 = target.get(right_part);

        for side in [left, right].into_iter().flatten() {
            let side_0 = side.get(left_part);
            let side_1 = side.get(right_part);

            match (target_0, target_1) {
                (Some(t0), Some(t1)) => {
                    // 片側が隣接フレームの同側から大きく飛んでいる
                    if let Some(s0) = side_0 {
                        if !left_cross
                            && dist(t0, s0) > dist(t0, t1) * 4.0
                            && hdist(t0, s0) > hdist(t0, t1) * 8.0
                        {
                            left_cross = true;
                        }
                    }
                    if let Some(s1) = side_1 {
                        if !right_cross
                            && dist(t1, s1) > dist(t1, t0) * 4.0
                            && hdist(t1, s1) > hdist(t1, t0) * 8.0
                        {
                            right_cross = true;
                        }
                    }

                    // 左右ペアが身体サイズに比して潰れている場合、
                    // 隣接フレームの同側に重なった方の反対側が入れ替わったとみなす
                    if let Some(s0) = side_0 {
                        if !right_cross
                            && dist(t0, t1) * 8.0 < size
                            && hdist(t0, t1) * 16.0 < size
                            && dist(t0, s0) * 4.0 < size
                            && hdist(t0, s0) * 8.0 < size
                        {
                            right_cross = true;
                        }
                    }
                    if let Some(s1) = side_1 {
                        if !left_cross
                            && dist(t1, t0) * 8.0 < size
                            && hdist(t1, t0) * 16.0 < size
                            && dist(t1, s1) * 4.0 < size
                            && hdist(t1, s1) * 8.0 < size
                        {
                            left_cross = true;
                        }
                    }

                    // 両側とも隣接フレームの逆側に近い → 丸ごと入れ替わり
                    if let (Some(s0), Some(s1)) = (side_0, side_1) {
                        if !(left_cross && right_cross)
                            && dist(t0, t1) > dist(t0, s1) * 3.0
                            && dist(t0, t1) > dist(t1, s0) * 3.0
                            && hdist(t0, t1) > hdist(t0, s1) * 6.0
                            && hdist(t0, t1) > hdist(t1, s0) * 6.0
                        {
                            left_cross = true;
                            right_cross = true;
                        }
                    }
                }
                (Some(t0), None) => {
                    if let (Some(s0), Some(s1)) = (side_0, side_1) {
                        if !left_cross
                            && dist(t0, s0) > dist(t0, s1) * 3.2
                            && hdist(t0, s0) > hdist(t0, s1) * 6.4
                        {
                            left_cross = true;
                        }
                    }
                }
                (None, Some(t1)) => {
                    if let (Some(s0), Some(s1)) = (side_0, side_1) {
                        if !right_cross
                            && dist(t1, s1) > dist(t1, s0) * 3.2
                            && hdist(t1, s1) > hdist(t1, s0) * 6.4
                        {
                            right_cross = true;
                        }
                    }
                }
                (None, None) => {}
            }

            if left_cross && right_cross {
                break;
            }
        }

        if left_cross {
            result.remove(left_part);
        }
        if right_cross {
            result.remove(right_part);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(index: PartIndex, x: f32, y: f32) -> BodyPart {
        BodyPart::new(index, x, y, 0.9)
    }

    #[test]
    fn test_no_neighbors_keeps_target() {
        let target = Human::new(vec![
            part(PartIndex::ShoulderL, 0.5, 0.4),
            part(PartIndex::ShoulderR, 0.5, 0.6),
        ]);
        let result = anti_crossing(&target, None, None);
        assert_eq!(result, target);
    }

    #[test]
    fn test_jumped_left_point_is_removed() {
        // 左右の肩が水平に接近していて、左肩だけが隣接フレームから大きく飛んでいる
        let target = Human::new(vec![
            part(PartIndex::ShoulderL, 0.5, 0.50),
            part(PartIndex::ShoulderR, 0.5, 0.51),
            part(PartIndex::Nose, 0.5, 0.505),
        ]);
        let side = Human::new(vec![part(PartIndex::ShoulderL, 0.5, 0.9)]);

        let result = anti_crossing(&target, Some(&side), None);
        assert!(!result.has_part(PartIndex::ShoulderL));
        assert!(result.has_part(PartIndex::ShoulderR));
        // 対称ペア以外は保持される
        assert!(result.has_part(PartIndex::Nose));
    }

    #[test]
    fn test_collapsed_pair_drops_opposite_side() {
        // 両膝がほぼ同一点に潰れ、左膝は隣接フレームの左膝位置と一致
        // → 右膝の方が入れ替わりとみなされる
        let target = Human::new(vec![
            part(PartIndex::KneeL, 0.5, 0.500),
            part(PartIndex::KneeR, 0.5, 0.505),
            part(PartIndex::Nose, 0.1, 0.5),
            part(PartIndex::AnkleL, 0.9, 0.5),
        ]);
        let side = Human::new(vec![part(PartIndex::KneeL, 0.5, 0.51)]);

        let result = anti_crossing(&target, None, Some(&side));
        assert!(result.has_part(PartIndex::KneeL));
        assert!(!result.has_part(PartIndex::KneeR));
    }

    #[test]
    fn test_fully_swapped_pair_removes_both() {
        let target = Human::new(vec![
            part(PartIndex::ShoulderL, 0.5, 0.3),
            part(PartIndex::ShoulderR, 0.5, 0.7),
        ]);
        // 隣接フレームでは左右が逆の位置にいる
        let side = Human::new(vec![
            part(PartIndex::ShoulderL, 0.5, 0.69),
            part(PartIndex::ShoulderR, 0.5, 0.31),
        ]);

        let result = anti_crossing(&target, Some(&side), None);
        assert!(!result.has_part(PartIndex::ShoulderL));
        assert!(!result.has_part(PartIndex::ShoulderR));
    }

    #[test]
    fn test_single_sided_target_crosses() {
        // 左肩のみ検出。隣接フレームの右肩位置とほぼ一致しているなら
        // ラベルの入れ替わりとみなして除去する
        let target = Human::new(vec![part(PartIndex::ShoulderL, 0.5, 0.8)]);
        let side = Human::new(vec![
            part(PartIndex::ShoulderL, 0.5, 0.2),
            part(PartIndex::ShoulderR, 0.5, 0.79),
        ]);

        let result = anti_crossing(&target, Some(&side), None);
        assert!(!result.has_part(PartIndex::ShoulderL));
    }

    #[test]
    fn test_stable_pose_untouched() {
        let target = Human::new(vec![
            part(PartIndex::ShoulderL, 0.5, 0.4),
            part(PartIndex::ShoulderR, 0.5, 0.6),
            part(PartIndex::HipL, 0.7, 0.45),
            part(PartIndex::HipR, 0.7, 0.55),
        ]);
        let side = target.clone();
        let result = anti_crossing(&target, Some(&side), Some(&side));
        assert_eq!(result, target);
    }
}
