//! # Value Codec
//!
//! Type-driven little-endian encoding of message bodies.
//!
//! Every wire type implements [`Wire`]. The impl is chosen by the static
//! type of the field, so a record's layout is fixed at compile time:
//!
//! | Type | Layout |
//! |---|---|
//! | integers, floats | fixed width, little-endian |
//! | `bool` | one byte, non-zero is `true` |
//! | `String` | 7-bit encoded length, then UTF-8 bytes |
//! | enums (`wire_enum!`) | `i32` |
//! | `[T; N]`, `Vec<T>`, `VecDeque<T>` | `i32` count, then elements |
//! | `BTreeMap`, `HashMap` | `i32` count, then key/value pairs |
//! | `Option<T>` | `T`, with `None` written as `T::default()` |
//! | records (`wire_record!`) | fields in declared order |
//!
//! `Option<T>` always decodes as `Some`: an absent list is read back as an
//! empty one.
//!
//! ```rust
//! use telemetry_wire::core::wire::{from_bytes, to_bytes};
//! use telemetry_wire::wire_record;
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Sample {
//!     id: i32,
//!     label: String,
//!     cached: bool, // not on the wire
//! }
//!
//! wire_record!(Sample { id, label });
//!
//! let bytes = to_bytes(&Sample { id: 3, label: "cpu".into(), cached: true }).unwrap();
//! let (decoded, end) = from_bytes::<Sample>(&bytes, 0).unwrap();
//! assert_eq!(end, bytes.len());
//! assert_eq!(decoded, Sample { id: 3, label: "cpu".into(), cached: false });
//! ```

use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::Hash;

pub use bytes::BytesMut;

/// A value with a fixed binary layout
pub trait Wire: Sized {
    /// Append the encoded value to `buf`
    fn encode(&self, buf: &mut BytesMut) -> Result<()>;

    /// Read one value, advancing the reader
    fn decode(reader: &mut WireReader<'_>) -> Result<Self>;
}

/// A record whose field order is its schema
pub trait Record: Wire + Default {
    /// Record name used in error paths
    const NAME: &'static str;
    /// Serialized fields, in wire order
    const FIELDS: &'static [&'static str];
}

/// Cursor over an input buffer
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Start reading at `offset`
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self> {
        if offset > buf.len() {
            return Err(ProtocolError::UnexpectedEof {
                needed: offset,
                remaining: buf.len(),
            });
        }
        Ok(Self { buf, pos: offset })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Borrow the next `n` bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// Encode a value into a fresh buffer
pub fn to_bytes<T: Wire>(value: &T) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    value.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Decode a value starting at `offset`, returning it with the offset past it
pub fn from_bytes<T: Wire>(bytes: &[u8], offset: usize) -> Result<(T, usize)> {
    let mut reader = WireReader::at(bytes, offset)?;
    let value = T::decode(&mut reader)?;
    Ok((value, reader.position()))
}

macro_rules! impl_wire_le {
    ($($ty:ty => $put:ident),* $(,)?) => {
        $(
            impl Wire for $ty {
                #[inline]
                fn encode(&self, buf: &mut BytesMut) -> Result<()> {
                    buf.$put(*self);
                    Ok(())
                }

                #[inline]
                fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
                    Ok(<$ty>::from_le_bytes(reader.take_array()?))
                }
            }
        )*
    };
}

impl_wire_le!(
    u8 => put_u8,
    i8 => put_i8,
    u16 => put_u16_le,
    i16 => put_i16_le,
    u32 => put_u32_le,
    i32 => put_i32_le,
    u64 => put_u64_le,
    i64 => put_i64_le,
    f32 => put_f32_le,
    f64 => put_f64_le,
);

impl Wire for bool {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(u8::from(*self));
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(reader.take(1)?[0] != 0)
    }
}

/// Write a string length as a 7-bit encoded integer (low groups first)
pub fn write_7bit_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    if len > i32::MAX as usize {
        return Err(ProtocolError::LengthOverflow(len));
    }
    let mut value = len as u32;
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
    Ok(())
}

/// Read a 7-bit encoded length. At most five bytes; values above `i32::MAX` are rejected.
pub fn read_7bit_len(reader: &mut WireReader<'_>) -> Result<usize> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        if shift >= 35 {
            return Err(ProtocolError::InvalidLength(value as i64));
        }
        let byte = reader.take(1)?[0];
        value |= u64::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if value > i32::MAX as u64 {
        return Err(ProtocolError::InvalidLength(value as i64));
    }
    Ok(value as usize)
}

impl Wire for String {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        write_7bit_len(buf, self.len())?;
        buf.put_slice(self.as_bytes());
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let len = read_7bit_len(reader)?;
        let bytes = reader.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

/// Write an `i32` element count
pub fn write_count(buf: &mut BytesMut, len: usize) -> Result<()> {
    let count = i32::try_from(len).map_err(|_| ProtocolError::LengthOverflow(len))?;
    buf.put_i32_le(count);
    Ok(())
}

/// Read an `i32` element count, rejecting negatives
pub fn read_count(reader: &mut WireReader<'_>) -> Result<usize> {
    let count = i32::decode(reader)?;
    if count < 0 {
        return Err(ProtocolError::InvalidLength(i64::from(count)));
    }
    Ok(count as usize)
}

// Hostile counts must not drive allocation; every element takes at least a byte.
fn capacity_hint(count: usize, reader: &WireReader<'_>) -> usize {
    count.min(reader.remaining())
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        write_count(buf, self.len())?;
        for item in self {
            item.encode(buf)?;
        }
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let count = read_count(reader)?;
        let mut items = Vec::with_capacity(capacity_hint(count, reader));
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl<T: Wire> Wire for VecDeque<T> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        write_count(buf, self.len())?;
        for item in self {
            item.encode(buf)?;
        }
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let count = read_count(reader)?;
        let mut items = VecDeque::with_capacity(capacity_hint(count, reader));
        for _ in 0..count {
            items.push_back(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl<T: Wire, const N: usize> Wire for [T; N] {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        write_count(buf, N)?;
        for item in self {
            item.encode(buf)?;
        }
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let count = read_count(reader)?;
        if count != N {
            return Err(ProtocolError::InvalidLength(count as i64));
        }
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::decode(reader)?);
        }
        items
            .try_into()
            .map_err(|_| ProtocolError::InvalidLength(count as i64))
    }
}

impl<K: Wire + Ord, V: Wire> Wire for BTreeMap<K, V> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        write_count(buf, self.len())?;
        for (key, value) in self {
            key.encode(buf)?;
            value.encode(buf)?;
        }
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let count = read_count(reader)?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = K::decode(reader)?;
            let value = V::decode(reader)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<K: Wire + Eq + Hash, V: Wire> Wire for HashMap<K, V> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        write_count(buf, self.len())?;
        for (key, value) in self {
            key.encode(buf)?;
            value.encode(buf)?;
        }
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let count = read_count(reader)?;
        let mut map = HashMap::with_capacity(capacity_hint(count, reader));
        for _ in 0..count {
            let key = K::decode(reader)?;
            let value = V::decode(reader)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<T: Wire + Default> Wire for Option<T> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Some(value) => value.encode(buf),
            None => T::default().encode(buf),
        }
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        T::decode(reader).map(Some)
    }
}

/// Implement [`Wire`] and [`Record`] for a struct from its ordered field list.
///
/// Fields left out of the list are not serialized and come back as their
/// `Default`. The struct must implement `Default`.
#[macro_export]
macro_rules! wire_record {
    ($name:ident { $($field:ident),* $(,)? }) => {
        impl $crate::core::wire::Wire for $name {
            #[allow(unused_variables)]
            fn encode(
                &self,
                buf: &mut $crate::core::wire::BytesMut,
            ) -> $crate::error::Result<()> {
                $(
                    $crate::core::wire::Wire::encode(&self.$field, buf)
                        .map_err(|e| e.in_field(stringify!($name), stringify!($field)))?;
                )*
                Ok(())
            }

            #[allow(unused_variables, clippy::needless_update)]
            fn decode(
                reader: &mut $crate::core::wire::WireReader<'_>,
            ) -> $crate::error::Result<Self> {
                $(
                    let $field = $crate::core::wire::Wire::decode(reader)
                        .map_err(|e| e.in_field(stringify!($name), stringify!($field)))?;
                )*
                Ok(Self {
                    $($field,)*
                    ..::core::default::Default::default()
                })
            }
        }

        impl $crate::core::wire::Record for $name {
            const NAME: &'static str = stringify!($name);
            const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];
        }
    };
}

/// Declare a fieldless enum that travels as an `i32`.
///
/// ```rust
/// use telemetry_wire::wire_enum;
///
/// wire_enum! {
///     #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
///     pub enum PowerUsage: u8 {
///         #[default]
///         VeryLow = 0,
///         Low = 1,
///         High = 3,
///     }
/// }
/// ```
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident $(: $repr:ident)? {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $(#[repr($repr)])?
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl $crate::core::wire::Wire for $name {
            fn encode(
                &self,
                buf: &mut $crate::core::wire::BytesMut,
            ) -> $crate::error::Result<()> {
                let value: i32 = match self {
                    $(Self::$variant => ($value) as i32,)+
                };
                $crate::core::wire::Wire::encode(&value, buf)
            }

            fn decode(
                reader: &mut $crate::core::wire::WireReader<'_>,
            ) -> $crate::error::Result<Self> {
                let value = <i32 as $crate::core::wire::Wire>::decode(reader)?;
                $(
                    if value == ($value) as i32 {
                        return Ok(Self::$variant);
                    }
                )+
                Err($crate::error::ProtocolError::UnknownEnumValue {
                    type_name: stringify!($name),
                    value,
                })
            }
        }
    };
}
