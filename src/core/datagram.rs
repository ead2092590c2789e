//! # Datagram Framing
//!
//! One packet per UDP datagram, no reassembly. A subscriber only accepts
//! datagrams stamped with the system id it learned over TCP.

use crate::core::header::{PacketHeader, HEADER_LEN};
use crate::core::packet::Packet;
use bytes::Bytes;
use std::fmt;

/// Largest UDP payload over IPv4 (65535 - 8 byte UDP header - 20 byte IP header)
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Why a datagram was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramRejection {
    /// Shorter than a header, or a length field below 23
    Header,
    /// Stamped by a different run
    ForeignSystem { expected: i64, actual: i64 },
    /// Fewer bytes than the header declares
    Truncated { declared: usize, received: usize },
}

impl fmt::Display for DatagramRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatagramRejection::Header => write!(f, "invalid header"),
            DatagramRejection::ForeignSystem { expected, actual } => {
                write!(f, "foreign system {actual} (expected {expected})")
            }
            DatagramRejection::Truncated { declared, received } => {
                write!(f, "truncated: declared {declared} bytes, received {received}")
            }
        }
    }
}

/// Validate one received datagram.
///
/// Bytes past the declared length are ignored.
pub fn inspect_datagram(
    datagram: &[u8],
    expected_system_id: i64,
) -> Result<Packet, DatagramRejection> {
    let (header, _) = PacketHeader::read(datagram).ok_or(DatagramRejection::Header)?;

    if header.system_id != expected_system_id {
        return Err(DatagramRejection::ForeignSystem {
            expected: expected_system_id,
            actual: header.system_id,
        });
    }

    let declared = header
        .body_len()
        .map(|body| body + HEADER_LEN)
        .ok_or(DatagramRejection::Header)?;
    if datagram.len() < declared {
        return Err(DatagramRejection::Truncated {
            declared,
            received: datagram.len(),
        });
    }

    Ok(Packet::new(
        header,
        Bytes::copy_from_slice(&datagram[HEADER_LEN..declared]),
    ))
}
