use std::collections::BTreeMap;

/// 18 身体パーツインデックス（COCO 系列）+ 終端センチネル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PartIndex {
    Nose = 0,
    Neck = 1,
    ShoulderR = 2,
    ElbowR = 3,
    WristR = 4,
    ShoulderL = 5,
    ElbowL = 6,
    WristL = 7,
    HipR = 8,
    KneeR = 9,
    AnkleR = 10,
    HipL = 11,
    KneeL = 12,
    AnkleL = 13,
    EyeR = 14,
    EyeL = 15,
    EarR = 16,
    EarL = 17,
    /// 予約された終端値。有効なパーツとしては使用しない
    End = 18,
}

impl PartIndex {
    pub const COUNT: usize = 18;

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Nose),
            1 => Some(Self::Neck),
            2 => Some(Self::ShoulderR),
            3 => Some(Self::ElbowR),
            4 => Some(Self::WristR),
            5 => Some(Self::ShoulderL),
            6 => Some(Self::ElbowL),
            7 => Some(Self::WristL),
            8 => Some(Self::HipR),
            9 => Some(Self::KneeR),
            10 => Some(Self::AnkleR),
            11 => Some(Self::HipL),
            12 => Some(Self::KneeL),
            13 => Some(Self::AnkleL),
            14 => Some(Self::EyeR),
            15 => Some(Self::EyeL),
            16 => Some(Self::EarR),
            17 => Some(Self::EarL),
            _ => None,
        }
    }

    /// 設定ファイル等で使う名前
    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::Neck => "neck",
            Self::ShoulderR => "shoulder_r",
            Self::ElbowR => "elbow_r",
            Self::WristR => "wrist_r",
            Self::ShoulderL => "shoulder_l",
            Self::ElbowL => "elbow_l",
            Self::WristL => "wrist_l",
            Self::HipR => "hip_r",
            Self::KneeR => "knee_r",
            Self::AnkleR => "ankle_r",
            Self::HipL => "hip_l",
            Self::KneeL => "knee_l",
            Self::AnkleL => "ankle_l",
            Self::EyeR => "eye_r",
            Self::EyeL => "eye_l",
            Self::EarR => "ear_r",
            Self::EarL => "ear_l",
            Self::End => "end",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        (0..Self::COUNT)
            .filter_map(Self::from_index)
            .find(|part| part.name() == name)
    }
}

/// 単一キーポイント
///
/// 座標は正規化済み: x は上から下、y は左から右、いずれも [0,1)。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyPart {
    pub part_index: PartIndex,
    pub x: f32,
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub score: f32,
}

impl BodyPart {
    pub fn new(part_index: PartIndex, x: f32, y: f32, score: f32) -> Self {
        Self {
            part_index,
            x,
            y,
            score,
        }
    }
}

/// 一人分の姿勢。パーツインデックスからキーポイントへのマップ
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Human {
    body_parts: BTreeMap<PartIndex, BodyPart>,
}

impl Human {
    /// BodyPart の列から構築。同じインデックスが重複した場合は後勝ち
    pub fn new<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = BodyPart>,
    {
        let mut body_parts = BTreeMap::new();
        for part in parts {
            body_parts.insert(part.part_index, part);
        }
        Self { body_parts }
    }

    pub fn body_parts(&self) -> &BTreeMap<PartIndex, BodyPart> {
        &self.body_parts
    }

    pub fn get(&self, index: PartIndex) -> Option<&BodyPart> {
        self.body_parts.get(&index)
    }

    pub fn has_part(&self, index: PartIndex) -> bool {
        self.body_parts.contains_key(&index)
    }

    pub fn insert(&mut self, part: BodyPart) {
        self.body_parts.insert(part.part_index, part);
    }

    pub fn remove(&mut self, index: PartIndex) -> Option<BodyPart> {
        self.body_parts.remove(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.body_parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.body_parts.len()
    }

    /// 全パーツの AABB を (x_min, x_max, y_min, y_max) で返す。パーツなしは None
    pub fn bounding_box(&self) -> Option<(f32, f32, f32, f32)> {
        let mut parts = self.body_parts.values();
        let first = parts.next()?;
        let mut bbox = (first.x, first.x, first.y, first.y);
        for part in parts {
            bbox.0 = bbox.0.min(part.x);
            bbox.1 = bbox.1.max(part.x);
            bbox.2 = bbox.2.min(part.y);
            bbox.3 = bbox.3.max(part.y);
        }
        Some(bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_index_from_index() {
        assert_eq!(PartIndex::from_index(0), Some(PartIndex::Nose));
        assert_eq!(PartIndex::from_index(13), Some(PartIndex::AnkleL));
        assert_eq!(PartIndex::from_index(17), Some(PartIndex::EarL));
        assert_eq!(PartIndex::from_index(18), None);
    }

    #[test]
    fn test_part_index_name_roundtrip() {
        for i in 0..PartIndex::COUNT {
            let part = PartIndex::from_index(i).unwrap();
            assert_eq!(PartIndex::from_name(part.name()), Some(part));
        }
        // センチネルは名前からは作れない
        assert_eq!(PartIndex::from_name("end"), None);
        assert_eq!(PartIndex::from_name("unknown"), None);
    }

    #[test]
    fn test_human_duplicate_part_last_wins() {
        let human = Human::new(vec![
            BodyPart::new(PartIndex::Nose, 0.1, 0.2, 0.3),
            BodyPart::new(PartIndex::Nose, 0.4, 0.5, 0.6),
        ]);
        assert_eq!(human.len(), 1);
        let nose = human.get(PartIndex::Nose).unwrap();
        assert_eq!(nose.x, 0.4);
        assert_eq!(nose.score, 0.6);
    }

    #[test]
    fn test_human_bounding_box() {
        let human = Human::new(vec![
            BodyPart::new(PartIndex::Nose, 0.2, 0.5, 1.0),
            BodyPart::new(PartIndex::Neck, 0.4, 0.3, 1.0),
            BodyPart::new(PartIndex::HipR, 0.7, 0.6, 1.0),
        ]);
        let (x1, x2, y1, y2) = human.bounding_box().unwrap();
        assert_eq!(x1, 0.2);
        assert_eq!(x2, 0.7);
        assert_eq!(y1, 0.3);
        assert_eq!(y2, 0.6);

        assert!(Human::default().bounding_box().is_none());
    }
}
