use crate::error::{Error, Result};

/// ビッグエンディアン整数コーデック
///
/// `to_int` は入力長が型サイズと一致しない場合エラー。符号付き型の負値は
/// 二の補数の絶対値を型の最大値で飽和させてからデコードする（最小値の
/// エンコード結果は `-(T::MAX)` に丸まる。ワイヤ互換のための挙動）
pub trait IntBytes: Sized + Copy {
    fn to_bytes(self) -> Vec<u8>;
    fn to_int(bytes: &[u8]) -> Result<Self>;
}

macro_rules! impl_int_bytes_unsigned {
    ($($t:ty),*) => {$(
        impl IntBytes for $t {
            fn to_bytes(self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }

            fn to_int(bytes: &[u8]) -> Result<Self> {
                let arr: [u8; std::mem::size_of::<$t>()] = bytes.try_into().map_err(|_| {
                    Error::InvalidArgument(format!(
                        "int decode: expected {} bytes, got {}",
                        std::mem::size_of::<$t>(),
                        bytes.len()
                    ))
                })?;
                Ok(<$t>::from_be_bytes(arr))
            }
        }
    )*};
}

macro_rules! impl_int_bytes_signed {
    ($(($t:ty, $ut:ty)),*) => {$(
        impl IntBytes for $t {
            fn to_bytes(self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }

            fn to_int(bytes: &[u8]) -> Result<Self> {
                let uvalue = <$ut as IntBytes>::to_int(bytes)?;
                let sign_bit = 1 as $ut << (std::mem::size_of::<$t>() * 8 - 1);
                if uvalue & sign_bit != 0 {
                    let mut magnitude = uvalue.wrapping_neg();
                    if magnitude > <$t>::MAX as $ut {
                        magnitude = <$t>::MAX as $ut;
                    }
                    Ok(-(magnitude as $t))
                } else {
                    Ok(uvalue as $t)
                }
            }
        }
    )*};
}

impl_int_bytes_unsigned!(u8, u16, u32, u64);
impl_int_bytes_signed!((i8, u8), (i16, u16), (i32, u32), (i64, u64));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_big_endian() {
        assert_eq!(0x01020304u32.to_bytes(), vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(u32::to_int(&[0x01, 0x02, 0x03, 0x04]).unwrap(), 0x01020304);
        assert_eq!(0xffu8.to_bytes(), vec![0xff]);
        assert_eq!(u16::to_int(&[0x12, 0x34]).unwrap(), 0x1234);
    }

    #[test]
    fn test_signed_roundtrip() {
        for value in [-1i32, -123456, 0, 1, 123456, i32::MAX] {
            assert_eq!(i32::to_int(&value.to_bytes()).unwrap(), value);
        }
    }

    #[test]
    fn test_signed_min_saturates() {
        // 最小値は絶対値が表現上限を超えるため -(MAX) に飽和する
        assert_eq!(
            i32::to_int(&[0x80, 0x00, 0x00, 0x00]).unwrap(),
            -i32::MAX
        );
        assert_eq!(i8::to_int(&[0x80]).unwrap(), -i8::MAX);
    }

    #[test]
    fn test_wrong_length_is_error() {
        assert!(u32::to_int(&[0x00, 0x01]).is_err());
        assert!(u32::to_int(&[0x00, 0x01, 0x02, 0x03, 0x04]).is_err());
        assert!(i16::to_int(&[]).is_err());
    }
}
