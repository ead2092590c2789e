//! # Bit-Field Codec
//!
//! Packs small integer fields at arbitrary bit offsets into a compact byte
//! buffer. Bit `n` of the record lives in byte `n / 8` at position `n % 8`
//! (least significant first). Independent of the packet envelope.
//!
//! ```rust
//! use telemetry_wire::bit_record;
//! use telemetry_wire::core::bitfield::{pack, unpack};
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Status {
//!     power: u8,
//!     alarm: bool,
//!     trend: u8,
//! }
//!
//! bit_record!(Status {
//!     power => (0, 3),
//!     alarm => (3, 1),
//!     trend => (6, 4),
//! });
//!
//! let status = Status { power: 5, alarm: true, trend: 9 };
//! let bytes = pack(&status);
//! assert_eq!(bytes.len(), 2);
//! assert_eq!(unpack::<Status>(&bytes).unwrap(), status);
//! ```

use crate::error::{ProtocolError, Result};

/// Placement of one field inside the packed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub name: &'static str,
    pub offset: usize,
    pub width: u32,
}

impl BitField {
    pub const fn new(name: &'static str, offset: usize, width: u32) -> Self {
        Self {
            name,
            offset,
            width,
        }
    }

    /// One past the last bit this field occupies
    pub const fn end(&self) -> usize {
        self.offset + self.width as usize
    }

    fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }
}

/// Conversion between a field's declared type and its raw bits
pub trait BitValue: Sized {
    fn to_bits(&self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_bit_value {
    ($($ty:ty),*) => {
        $(
            impl BitValue for $ty {
                #[inline]
                fn to_bits(&self) -> u64 {
                    *self as u64
                }

                #[inline]
                fn from_bits(bits: u64) -> Self {
                    bits as $ty
                }
            }
        )*
    };
}

impl_bit_value!(u8, u16, u32, u64, i8, i16, i32, i64);

impl BitValue for bool {
    fn to_bits(&self) -> u64 {
        u64::from(*self)
    }

    fn from_bits(bits: u64) -> Self {
        bits != 0
    }
}

/// A record whose fields are packed at fixed bit positions. See `bit_record!`.
pub trait BitRecord: Default {
    const FIELDS: &'static [BitField];

    /// Write every field into `buf`, which must be `buffer_len(FIELDS)` long
    fn write_fields(&self, buf: &mut [u8]);

    /// Read every field from `buf`, which must be `buffer_len(FIELDS)` long
    fn read_fields(buf: &[u8]) -> Self;
}

/// Bytes needed to hold every field
pub fn buffer_len(fields: &[BitField]) -> usize {
    fields.iter().map(BitField::end).max().unwrap_or(0).div_ceil(8)
}

/// OR the low `field.width` bits of `value` into `buf` at `field.offset`
pub fn set_bits(buf: &mut [u8], field: &BitField, value: u64) {
    let mut remaining = value & field.mask();
    let mut bit = field.offset;
    let end = field.end();
    while bit < end {
        let shift = bit % 8;
        let take = (8 - shift).min(end - bit);
        let chunk_mask = ((1u16 << take) - 1) as u8;
        buf[bit / 8] |= ((remaining as u8) & chunk_mask) << shift;
        remaining >>= take;
        bit += take;
    }
}

/// Read `field.width` bits from `buf` at `field.offset`, zero-extended
pub fn get_bits(buf: &[u8], field: &BitField) -> u64 {
    let mut value = 0u64;
    let mut bit = field.offset;
    let end = field.end();
    let mut filled = 0;
    while bit < end {
        let shift = bit % 8;
        let take = (8 - shift).min(end - bit);
        let chunk_mask = ((1u16 << take) - 1) as u8;
        let chunk = (buf[bit / 8] >> shift) & chunk_mask;
        value |= u64::from(chunk) << filled;
        filled += take;
        bit += take;
    }
    value
}

/// Pack a record into a fresh buffer
pub fn pack<T: BitRecord>(record: &T) -> Vec<u8> {
    let mut buf = vec![0u8; buffer_len(T::FIELDS)];
    record.write_fields(&mut buf);
    buf
}

/// Unpack a record; extra trailing bytes are ignored
pub fn unpack<T: BitRecord>(buf: &[u8]) -> Result<T> {
    let needed = buffer_len(T::FIELDS);
    if buf.len() < needed {
        return Err(ProtocolError::UnexpectedEof {
            needed,
            remaining: buf.len(),
        });
    }
    Ok(T::read_fields(&buf[..needed]))
}

/// Implement [`BitRecord`] for a struct: `field => (bit_offset, bit_width)`.
///
/// Widths must be between 1 and 64; anything else fails to compile. Fields
/// not listed keep their `Default` on unpack.
#[macro_export]
macro_rules! bit_record {
    ($name:ident { $($field:ident => ($offset:expr, $width:expr)),* $(,)? }) => {
        const _: () = {
            $(
                assert!(
                    $width >= 1 && $width <= 64,
                    concat!("bit width out of range for ", stringify!($name), ".", stringify!($field))
                );
            )*
        };

        impl $crate::core::bitfield::BitRecord for $name {
            const FIELDS: &'static [$crate::core::bitfield::BitField] = &[
                $($crate::core::bitfield::BitField::new(stringify!($field), $offset, $width)),*
            ];

            #[allow(unused_variables)]
            fn write_fields(&self, buf: &mut [u8]) {
                $(
                    $crate::core::bitfield::set_bits(
                        buf,
                        &$crate::core::bitfield::BitField::new(stringify!($field), $offset, $width),
                        $crate::core::bitfield::BitValue::to_bits(&self.$field),
                    );
                )*
            }

            #[allow(unused_variables, clippy::needless_update)]
            fn read_fields(buf: &[u8]) -> Self {
                Self {
                    $(
                        $field: $crate::core::bitfield::BitValue::from_bits(
                            $crate::core::bitfield::get_bits(
                                buf,
                                &$crate::core::bitfield::BitField::new(stringify!($field), $offset, $width),
                            ),
                        ),
                    )*
                    ..::core::default::Default::default()
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Straddle {
        low: u8,
        mid: u8,
        flag: bool,
    }

    crate::bit_record!(Straddle {
        low => (0, 6),
        mid => (6, 4),
        flag => (10, 1),
    });

    #[derive(Debug, Default, PartialEq)]
    struct Wide {
        word: u64,
        tail: i16,
    }

    crate::bit_record!(Wide {
        word => (3, 64),
        tail => (67, 16),
    });

    #[test]
    fn test_buffer_len_rounds_up() {
        assert_eq!(buffer_len(Straddle::FIELDS), 2);
        assert_eq!(buffer_len(Wide::FIELDS), 11);
        assert_eq!(buffer_len(&[]), 0);
    }

    #[test]
    fn test_straddling_field_round_trips_every_value() {
        for mid in 0..16u8 {
            let record = Straddle {
                low: 0x3F,
                mid,
                flag: mid % 2 == 0,
            };
            let bytes = pack(&record);
            assert_eq!(unpack::<Straddle>(&bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_straddling_layout() {
        let bytes = pack(&Straddle {
            low: 0,
            mid: 0b1011,
            flag: false,
        });
        // bits 6..10: low two bits in byte 0, high two in byte 1
        assert_eq!(bytes, vec![0b1100_0000, 0b0000_0010]);
    }

    #[test]
    fn test_values_are_masked_to_width() {
        let bytes = pack(&Straddle {
            low: 0xFF,
            mid: 0,
            flag: false,
        });
        assert_eq!(bytes, vec![0x3F, 0x00]);
    }

    #[test]
    fn test_sixty_four_bit_field_at_odd_offset() {
        let record = Wide {
            word: 0xDEAD_BEEF_0123_4567,
            tail: -2,
        };
        assert_eq!(unpack::<Wide>(&pack(&record)).unwrap(), record);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(matches!(
            unpack::<Straddle>(&[0]),
            Err(ProtocolError::UnexpectedEof {
                needed: 2,
                remaining: 1
            })
        ));
    }
}
