//! # Packet Header
//!
//! Fixed 23-byte header that precedes every message body, on TCP and UDP alike.
//!
//! ```text
//! offset  size  field
//!      0     4  total_length   i32, header + body
//!      4     8  system_id      i64, sender's run identifier
//!     12     2  object_id      u16, message type
//!     14     1  object_version u8, message type revision
//!     15     8  send_time      i64, unix milliseconds
//! ```

use crate::core::wire::{BytesMut, Wire, WireReader};
use crate::utils::time::unix_millis;
use bytes::BufMut;
use std::fmt;

/// Encoded header size in bytes
pub const HEADER_LEN: usize = 23;

/// A message type with a fixed `(object_id, object_version)` identity.
///
/// Implemented by `wire_message!`. Two types sharing an identity are rejected
/// when registered with the dispatcher.
pub trait NetObject: Wire {
    const OBJECT_ID: u16;
    const OBJECT_VERSION: u8;

    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PacketHeader {
    pub total_length: i32,
    pub system_id: i64,
    pub object_id: u16,
    pub object_version: u8,
    pub send_time: i64,
}

impl PacketHeader {
    /// Build a header; `send_time` of `None` stamps the current time
    pub fn new(
        total_length: i32,
        system_id: i64,
        object_id: u16,
        object_version: u8,
        send_time: Option<i64>,
    ) -> Self {
        Self {
            total_length,
            system_id,
            object_id,
            object_version,
            send_time: send_time.unwrap_or_else(unix_millis),
        }
    }

    /// Header for a `T` whose body is `body_len` bytes
    pub fn for_message<T: NetObject>(body_len: i32, system_id: i64, send_time: Option<i64>) -> Self {
        Self::new(
            HEADER_LEN as i32 + body_len,
            system_id,
            T::OBJECT_ID,
            T::OBJECT_VERSION,
            send_time,
        )
    }

    /// Append the 23 header bytes to `buf`
    pub fn write(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN);
        buf.put_i32_le(self.total_length);
        buf.put_i64_le(self.system_id);
        buf.put_u16_le(self.object_id);
        buf.put_u8(self.object_version);
        buf.put_i64_le(self.send_time);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        self.write(&mut buf);
        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(&buf);
        out
    }

    /// Parse a header from the front of `bytes`.
    ///
    /// Returns the header and the number of bytes consumed, or `None` when
    /// fewer than 23 bytes are available. The length field is not validated.
    pub fn read(bytes: &[u8]) -> Option<(Self, usize)> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let mut reader = WireReader::new(bytes);
        let header = Self {
            total_length: i32::decode(&mut reader).ok()?,
            system_id: i64::decode(&mut reader).ok()?,
            object_id: u16::decode(&mut reader).ok()?,
            object_version: u8::decode(&mut reader).ok()?,
            send_time: i64::decode(&mut reader).ok()?,
        };
        Some((header, HEADER_LEN))
    }

    /// Body length implied by `total_length`, if it is at least a header
    pub fn body_len(&self) -> Option<usize> {
        usize::try_from(self.total_length)
            .ok()
            .and_then(|total| total.checked_sub(HEADER_LEN))
    }

    /// Exact identity match with `T`
    pub fn is<T: NetObject>(&self) -> bool {
        self.object_id == T::OBJECT_ID && self.object_version == T::OBJECT_VERSION
    }

    /// Same message type as `T` but a different revision
    pub fn is_other_version<T: NetObject>(&self) -> bool {
        self.object_id == T::OBJECT_ID && self.object_version != T::OBJECT_VERSION
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectId: {}, ObjectVersion: {}, TotalLength: {}, SystemId: {}, SendTime: {}",
            self.object_id, self.object_version, self.total_length, self.system_id, self.send_time
        )
    }
}
