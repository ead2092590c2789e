//! # telemetry-wire
//!
//! Compact binary messaging for telemetry services: a type-driven value codec,
//! a fixed 23-byte packet header, TCP request/response sessions with liveness
//! tracking and UDP multicast for high-rate status fan-out.
//!
//! ## Layers
//! - [`core`]: value codec, header, bit-field packer, TCP and UDP framing
//! - [`protocol`]: built-in messages, command envelope, dispatcher, task ids
//! - [`transport`]: TCP server and client, multicast publisher and subscriber
//! - [`config`]: TOML/env configuration
//! - [`utils`]: logging, metrics, timeouts, paging
//!
//! ## Declaring a message
//! ```
//! use telemetry_wire::{wire_message, Command};
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! pub struct RequestProcessList {
//!     pub task_id: i32,
//! }
//!
//! wire_message!(RequestProcessList = (1, 1) { task_id });
//!
//! let bytes = telemetry_wire::encode_message(&RequestProcessList { task_id: 3 }, 9, Some(0)).unwrap();
//! let packet = telemetry_wire::Packet::from_bytes(bytes).unwrap();
//! let command = Command::from_packet(packet, None);
//! assert!(command.is::<RequestProcessList>());
//! assert_eq!(command.decode::<RequestProcessList>().unwrap().task_id, 3);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::core::bitfield::{BitField, BitRecord};
pub use crate::core::codec::PacketCodec;
pub use crate::core::datagram::{inspect_datagram, DatagramRejection, MAX_DATAGRAM_SIZE};
pub use crate::core::header::{NetObject, PacketHeader, HEADER_LEN};
pub use crate::core::packet::{encode_message, Packet};
pub use crate::core::wire::{Record, Wire, WireReader};
pub use config::NetworkConfig;
pub use error::{ProtocolError, Result};
pub use protocol::command::Command;
pub use protocol::dispatcher::Dispatcher;
pub use protocol::message::{
    CommonResponse, Heartbeat, RequestUdpAddress, ResponseStatus, ResponseUdpAddress,
};
pub use protocol::task::TaskIdGenerator;
pub use transport::session_manager::ServerEvent;
pub use transport::tcp_client::{ClientEvent, TcpClient};
pub use transport::tcp_server::TcpServer;
pub use transport::udp_publisher::UdpPublisher;
pub use transport::udp_subscriber::UdpSubscriber;
