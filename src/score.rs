use std::collections::BTreeMap;
use std::f32::consts::PI;

use crate::pose::{BodyPart, Human, PartIndex};

/// 骨格・顔の概念的な接続 (from, to)
pub type Connection = (PartIndex, PartIndex);

/// 採点対象の 23 接続
const SCORE_CONNECTIONS: [Connection; 23] = [
    (PartIndex::ShoulderR, PartIndex::ElbowR),
    (PartIndex::ShoulderL, PartIndex::ElbowL),
    (PartIndex::ShoulderR, PartIndex::ShoulderL),
    (PartIndex::ShoulderR, PartIndex::Neck),
    (PartIndex::ShoulderL, PartIndex::Neck),
    (PartIndex::ShoulderR, PartIndex::Nose),
    (PartIndex::ShoulderL, PartIndex::Nose),
    (PartIndex::ShoulderR, PartIndex::HipR),
    (PartIndex::ShoulderL, PartIndex::HipL),
    (PartIndex::Neck, PartIndex::Nose),
    (PartIndex::ElbowR, PartIndex::WristR),
    (PartIndex::ElbowL, PartIndex::WristL),
    (PartIndex::Nose, PartIndex::EyeR),
    (PartIndex::Nose, PartIndex::EyeL),
    (PartIndex::Nose, PartIndex::EarR),
    (PartIndex::Nose, PartIndex::EarL),
    (PartIndex::EyeR, PartIndex::EyeL),
    (PartIndex::EarR, PartIndex::EarL),
    (PartIndex::HipR, PartIndex::HipL),
    (PartIndex::HipR, PartIndex::KneeR),
    (PartIndex::HipL, PartIndex::KneeL),
    (PartIndex::KneeR, PartIndex::AnkleR),
    (PartIndex::KneeL, PartIndex::AnkleL),
];

fn range(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let mut min = values[0];
    let mut max = values[0];
    for &value in values {
        min = min.min(value);
        max = max.max(value);
    }
    max - min
}

/// 姿勢の有意な広がり (x_range, y_range)
///
/// y は手首・肘・足首・膝を除いて測る（腕脚の振りで体格の基準が
/// 暴れないように）。片方が 0 ならもう片方で代用する
fn sig_range(human: &Human) -> (f32, f32) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (&index, part) in human.body_parts() {
        xs.push(part.x);
        if !matches!(
            index,
            PartIndex::WristR
                | PartIndex::WristL
                | PartIndex::ElbowR
                | PartIndex::ElbowL
                | PartIndex::AnkleR
                | PartIndex::AnkleL
                | PartIndex::KneeR
                | PartIndex::KneeL
        ) {
            ys.push(part.y);
        }
    }

    let mut x_range = range(&xs);
    let mut y_range = range(&ys);

    if x_range == 0.0 {
        x_range = y_range;
    } else if y_range == 0.0 {
        y_range = x_range;
    }

    (x_range, y_range)
}

/// 2 ベクトルの最小角度差。いずれかが零ベクトルなら 0
fn angle_diff(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    if (y1 == 0.0 && x1 == 0.0) || (y2 == 0.0 && x2 == 0.0) {
        return 0.0;
    }

    let a1 = y1.atan2(x1);
    let a2 = y2.atan2(x2);
    let diff = (a1 - a2).abs();
    diff.min(2.0 * PI - diff)
}

fn angle_score(
    x1: f32,
    y1: f32,
    x_range1: f32,
    y_range1: f32,
    x2: f32,
    y2: f32,
    x_range2: f32,
    y_range2: f32,
) -> f32 {
    if x_range1 == 0.0 || y_range1 == 0.0 || x_range2 == 0.0 || y_range2 == 0.0 {
        return 0.0;
    }

    angle_diff(
        x1 * 4.0 / x_range1,
        y1 / y_range1,
        x2 * 4.0 / x_range2,
        y2 / y_range2,
    ) / PI
}

fn distance(x: f32, y: f32) -> f32 {
    (x * x + y * y).sqrt()
}

fn distance_score(
    x1: f32,
    y1: f32,
    x_range1: f32,
    y_range1: f32,
    x2: f32,
    y2: f32,
    x_range2: f32,
    y_range2: f32,
) -> f32 {
    if x_range1 == 0.0 || y_range1 == 0.0 || x_range2 == 0.0 || y_range2 == 0.0 {
        return 0.0;
    }

    let d1 = distance(x1 * 4.0 / x_range1, y1 / y_range1);
    let d2 = distance(x2 * 4.0 / x_range2, y2 / y_range2);

    let diff = (d2 - d1).abs();
    let sum = d1 + d2;

    if sum > 0.0 {
        diff / sum
    } else {
        0.0
    }
}

fn connection_vector(from: &BodyPart, to: &BodyPart) -> (f32, f32) {
    (to.x - from.x, to.y - from.y)
}

/// 姿勢同士を接続単位で採点する
///
/// `human2` が基準。両方に両端が存在する接続だけが結果に含まれ、
/// スコアは [0, 128] で高いほど一致している
pub fn score(human1: &Human, human2: &Human) -> BTreeMap<Connection, u8> {
    let (x_range1, y_range1) = sig_range(human1);
    let (x_range2, y_range2) = sig_range(human2);

    let mut scores = BTreeMap::new();

    for &(from, to) in &SCORE_CONNECTIONS {
        let (Some(from1), Some(to1)) = (human1.get(from), human1.get(to)) else {
            continue;
        };
        let (Some(from2), Some(to2)) = (human2.get(from), human2.get(to)) else {
            continue;
        };

        let (x1, y1) = connection_vector(from1, to1);
        let (x2, y2) = connection_vector(from2, to2);

        let a = angle_score(x1, y1, x_range1, y_range1, x2, y2, x_range2, y_range2);
        let d = distance_score(x1, y1, x_range1, y_range1, x2, y2, x_range2, y_range2);

        let penalty = (((a + d) / 2.0) * 128.0).round() as u8;
        scores.insert((from, to), 128 - penalty);
    }

    scores
}
