//! # Core Protocol Components
//!
//! Low-level packet handling, codecs, and binary serialization.
//!
//! This module provides the foundation for the protocol: the value codec,
//! the fixed packet header, whole-packet assembly and the TCP/UDP framers.
//! The bit-field packer lives here too but never touches the packet path.
//!
//! ## Components
//! - **Header**: 23-byte routing/versioning header and the `NetObject` identity
//! - **Wire**: Type-driven encode/decode of values and records
//! - **Bitfield**: Sub-byte packing of small integer fields
//! - **Packet**: Header plus body, message to bytes
//! - **Codec**: Tokio codec for framing packets over a byte stream
//! - **Datagram**: Validation of one packet per UDP datagram
//!
//! ## Wire Format
//! ```text
//! [TotalLength(4)] [SystemId(8)] [ObjectId(2)] [ObjectVersion(1)] [SendTime(8)] [Body(N)]
//! ```
//! All integers are little-endian. `TotalLength = 23 + N`.
//!
//! ## Limits
//! - TCP packets are capped by `PacketCodec::max_packet_size` (16MB by default)
//! - Datagrams are capped at 65507 bytes
//! - Length prefixes are validated before any allocation

pub mod bitfield;
pub mod codec;
pub mod datagram;
pub mod header;
pub mod packet;
pub mod wire;
