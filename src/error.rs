//! # Error Types
//!
//! Error handling for the wire codec and the socket transports.
//!
//! This module defines all error variants that can occur, from low-level
//! I/O failures to codec faults raised while decoding a single message.
//!
//! ## Error Categories
//! - **Connection Errors**: bind/connect/accept failures, reported as values
//! - **Transport Errors**: mid-stream socket faults that end one session
//! - **Framing Errors**: short, torn, oversized or foreign packets (dropped)
//! - **Codec Errors**: malformed bodies, wrapped with the offending field
//! - **Protocol Mismatch**: decoding an envelope as the wrong message type
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use telemetry_wire::error::{ProtocolError, Result};
//! use telemetry_wire::core::wire::from_bytes;
//! use tracing::{error, info};
//!
//! fn read_count(bytes: &[u8]) -> Result<i32> {
//!     let (count, _) = from_bytes::<i32>(bytes, 0)?;
//!     Ok(count)
//! }
//!
//! fn main() {
//!     match read_count(&[7, 0]) {
//!         Ok(count) => info!(count, "Decoded count"),
//!         Err(e) => error!(error = %e, "Error decoding count"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Connection errors
    pub const ERR_NOT_CONNECTED: &str = "Client is not connected";
    pub const ERR_SERVER_NOT_RUNNING: &str = "Server is not running";
    pub const ERR_PUBLISHER_NOT_RUNNING: &str = "Multicast publisher is not running";
    pub const ERR_SESSION_NOT_FOUND: &str = "No session for peer";

    /// Multicast setup errors
    pub const ERR_NOT_MULTICAST: &str = "Address is not an IPv4 multicast group";
}

/// Primary error type for all codec and transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error("Invalid packet length: {0}")]
    InvalidPacketLength(i32),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Truncated packet: header declares {declared} bytes, received {received}")]
    TruncatedPacket { declared: usize, received: usize },

    #[error("Unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Invalid length prefix: {0}")]
    InvalidLength(i64),

    #[error("Length {0} does not fit the wire length prefix")]
    LengthOverflow(usize),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Unknown value {value} for enum {type_name}")]
    UnknownEnumValue {
        type_name: &'static str,
        value: i32,
    },

    #[error("{record}.{field}: {source}")]
    Field {
        record: &'static str,
        field: &'static str,
        #[source]
        source: Box<ProtocolError>,
    },

    #[error("Unexpected message type: got {object_id}/{object_version}, expected {expected}")]
    UnexpectedMessage {
        expected: &'static str,
        object_id: u16,
        object_version: u8,
    },

    #[error("Object {object_id}/{object_version} already registered by {existing}")]
    DuplicateRegistration {
        object_id: u16,
        object_version: u8,
        existing: &'static str,
    },

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Wrap this error with the record field it was raised from
    pub fn in_field(self, record: &'static str, field: &'static str) -> Self {
        ProtocolError::Field {
            record,
            field,
            source: Box::new(self),
        }
    }

    /// True for errors that mean the underlying connection is unusable
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_) | ProtocolError::ConnectionClosed | ProtocolError::Timeout
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
