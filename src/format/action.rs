use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::format::float_bytes;
use crate::format::int_bytes::IntBytes;
use crate::pose::{BodyPart, Human, PartIndex};

/// Magic number at the head of a serialized stream ("ACT\0").
pub const MAGIC: [u8; 4] = *b"ACT\0";

// Upper bound for item counts and human indices (2^29).
const MAX_ITEMS: usize = 0x2000_0000;

/// One frame of action data, keyed by human index.
pub type ActionFrame = BTreeMap<u32, Human>;

fn write_u32(value: u32, output: &mut Vec<u8>) {
    output.extend_from_slice(&value.to_bytes());
}

fn write_human(human: &Human, output: &mut Vec<u8>) {
    // Presence bitmap: part i maps to bit (31 - i).
    let mut bitmap = 0u32;
    for (i, part) in (0..PartIndex::COUNT).filter_map(PartIndex::from_index).enumerate() {
        if human.has_part(part) {
            bitmap |= 1 << (31 - i);
        }
    }
    write_u32(bitmap, output);

    for part in (0..PartIndex::COUNT).filter_map(PartIndex::from_index) {
        if let Some(body_part) = human.get(part) {
            output.extend_from_slice(&float_bytes::to_bytes(body_part.x));
            output.extend_from_slice(&float_bytes::to_bytes(body_part.y));
            output.extend_from_slice(&float_bytes::to_bytes(body_part.score));
        }
    }
}

fn write_human_map(frame: &ActionFrame, output: &mut Vec<u8>) -> Result<()> {
    if frame.len() >= MAX_ITEMS {
        return Err(Error::Overflow(frame.len()));
    }
    write_u32(frame.len() as u32, output);

    for (&index, human) in frame {
        // Indices saturate at the limit; the decoder mirrors this.
        let index = index.min(MAX_ITEMS as u32);
        write_u32(index, output);
        write_human(human, output);
    }
    Ok(())
}

/// Serialize action data into the binary wire format.
pub fn serialize(action: &[ActionFrame], magic: bool) -> Result<Vec<u8>> {
    let mut data = Vec::new();

    if magic {
        data.extend_from_slice(&MAGIC);
    }

    if action.len() >= MAX_ITEMS {
        return Err(Error::Overflow(action.len()));
    }
    write_u32(action.len() as u32, &mut data);

    for frame in action {
        write_human_map(frame, &mut data)?;
    }

    Ok(data)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, size: usize) -> Result<&'a [u8]> {
        if self.pos + size > self.data.len() {
            return Err(Error::InvalidArgument("unexpected end of data".into()));
        }
        let slice = &self.data[self.pos..self.pos + size];
        self.pos += size;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        u32::to_int(self.take(4)?)
    }

    fn read_f32(&mut self) -> Result<f32> {
        float_bytes::to_float(self.take(4)?)
    }
}

fn read_human(reader: &mut Reader) -> Result<Human> {
    let bitmap = reader.read_u32()?;

    let mut indices = Vec::new();
    for (i, part) in (0..PartIndex::COUNT).filter_map(PartIndex::from_index).enumerate() {
        if bitmap & (1 << (31 - i)) != 0 {
            indices.push(part);
        }
    }

    let mut parts = Vec::new();
    for part_index in indices {
        let x = reader.read_f32()?;
        let y = reader.read_f32()?;
        let score = reader.read_f32()?;

        // Body parts with NaN coordinates are skipped silently.
        if x.is_nan() || y.is_nan() || score.is_nan() {
            continue;
        }
        parts.push(BodyPart::new(part_index, x, y, score));
    }

    Ok(Human::new(parts))
}

fn read_human_map(reader: &mut Reader) -> Result<ActionFrame> {
    let size = reader.read_u32()?;
    if size as usize >= MAX_ITEMS {
        return Err(Error::Overflow(size as usize));
    }

    let mut frame = ActionFrame::new();
    for _ in 0..size {
        let index = reader.read_u32()?.min(MAX_ITEMS as u32);
        let human = read_human(reader)?;
        frame.insert(index, human);
    }
    Ok(frame)
}

/// Deserialize action data from the binary wire format.
///
/// With `magic = true` the first 4 bytes are skipped without inspection.
pub fn deserialize(data: &[u8], magic: bool) -> Result<Vec<ActionFrame>> {
    let mut reader = Reader::new(data);

    if magic {
        reader.take(4)?;
    }

    let size = reader.read_u32()?;
    if size as usize >= MAX_ITEMS {
        return Err(Error::Overflow(size as usize));
    }

    let mut action = Vec::new();
    for _ in 0..size {
        action.push(read_human_map(&mut reader)?);
    }

    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_nose_frame() -> ActionFrame {
        let mut frame = ActionFrame::new();
        frame.insert(
            0,
            Human::new(vec![BodyPart::new(PartIndex::Nose, 0.25, 0.75, 0.5)]),
        );
        frame
    }

    #[test]
    fn test_serialize_known_bytes() {
        let action = vec![single_nose_frame()];
        let data = serialize(&action, true).unwrap();

        // magic + nframes + nhumans + index + bitmap + 3 floats = 32 bytes
        assert_eq!(data.len(), 32);
        assert_eq!(&data[0..4], &[0x41, 0x43, 0x54, 0x00]);
        assert_eq!(&data[4..8], &[0, 0, 0, 1]);
        assert_eq!(&data[8..12], &[0, 0, 0, 1]);
        assert_eq!(&data[12..16], &[0, 0, 0, 0]);
        // nose is part 0, i.e. the top bit
        assert_eq!(&data[16..20], &[0x80, 0x00, 0x00, 0x00]);
        assert_eq!(&data[20..24], &[0x3e, 0x80, 0x00, 0x00]); // x = 0.25
        assert_eq!(&data[24..28], &[0x3f, 0x40, 0x00, 0x00]); // y = 0.75
        assert_eq!(&data[28..32], &[0x3f, 0x00, 0x00, 0x00]); // score = 0.5
    }

    #[test]
    fn test_roundtrip() {
        let mut frame1 = ActionFrame::new();
        frame1.insert(
            0,
            Human::new(vec![
                BodyPart::new(PartIndex::Nose, 0.5, 0.5, 1.0),
                BodyPart::new(PartIndex::Neck, 0.625, 0.5, 0.75),
                BodyPart::new(PartIndex::EarL, 0.25, 0.75, 0.5),
            ]),
        );
        frame1.insert(
            3,
            Human::new(vec![BodyPart::new(PartIndex::AnkleR, 0.875, 0.125, 0.25)]),
        );
        let frame2 = ActionFrame::new();
        let action = vec![frame1, frame2, single_nose_frame()];

        for magic in [true, false] {
            let data = serialize(&action, magic).unwrap();
            let decoded = deserialize(&data, magic).unwrap();
            assert_eq!(decoded, action);
        }
    }

    #[test]
    fn test_nan_part_is_skipped() {
        let mut frame = ActionFrame::new();
        frame.insert(
            0,
            Human::new(vec![
                BodyPart::new(PartIndex::Nose, 0.5, 0.5, f32::NAN),
                BodyPart::new(PartIndex::Neck, 0.625, 0.5, 1.0),
            ]),
        );
        let data = serialize(&[frame], true).unwrap();
        let decoded = deserialize(&data, true).unwrap();

        let human = &decoded[0][&0];
        assert!(!human.has_part(PartIndex::Nose));
        assert!(human.has_part(PartIndex::Neck));
    }

    #[test]
    fn test_human_index_saturates() {
        let mut frame = ActionFrame::new();
        frame.insert(
            0x3000_0000,
            Human::new(vec![BodyPart::new(PartIndex::Nose, 0.5, 0.5, 1.0)]),
        );
        let data = serialize(&[frame], false).unwrap();
        let decoded = deserialize(&data, false).unwrap();
        assert!(decoded[0].contains_key(&0x2000_0000));
    }

    #[test]
    fn test_oversized_count_is_error() {
        // data claiming 2^29 frames
        let mut data = Vec::new();
        data.extend_from_slice(&0x2000_0000u32.to_be_bytes());
        assert!(matches!(
            deserialize(&data, false),
            Err(Error::Overflow(_))
        ));
    }

    #[test]
    fn test_truncated_input_is_error() {
        let data = serialize(&[single_nose_frame()], true).unwrap();
        assert!(deserialize(&data[..data.len() - 2], true).is_err());
        assert!(deserialize(&[], true).is_err());
    }
}
