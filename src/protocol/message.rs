//! # Built-in Messages
//!
//! Message types the transports themselves understand, plus the
//! `wire_message!` macro used to declare application messages.
//!
//! Reserved identities (all version 1):
//! - 196 `RequestUdpAddress`: client asks for the multicast group
//! - 197 `ResponseUdpAddress`: server answers with group ip and port
//! - 198 `CommonResponse`: generic success/failure reply
//! - 199 `Heartbeat`: liveness ping, echoed by the server

use crate::wire_enum;

pub const REQUEST_UDP_ADDRESS_OBJECT_ID: u16 = 196;
pub const RESPONSE_UDP_ADDRESS_OBJECT_ID: u16 = 197;
pub const COMMON_RESPONSE_OBJECT_ID: u16 = 198;
pub const HEARTBEAT_OBJECT_ID: u16 = 199;

/// Declare a message: a [`Record`](crate::core::wire::Record) with a fixed
/// `(object_id, object_version)` identity.
///
/// ```rust
/// use telemetry_wire::wire_message;
///
/// #[derive(Debug, Clone, Default, PartialEq)]
/// pub struct RequestProcessList {
///     pub task_id: i32,
/// }
///
/// wire_message!(RequestProcessList = (9, 1) { task_id });
/// ```
#[macro_export]
macro_rules! wire_message {
    ($name:ident = ($id:expr, $version:expr) { $($field:ident),* $(,)? }) => {
        $crate::wire_record!($name { $($field),* });

        impl $crate::core::header::NetObject for $name {
            const OBJECT_ID: u16 = $id;
            const OBJECT_VERSION: u8 = $version;

            fn type_name() -> &'static str {
                stringify!($name)
            }
        }
    };
}

/// Liveness ping. Clients send it periodically; the server refreshes the
/// session and, when configured, echoes it back with the same task id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub task_id: i32,
}

crate::wire_message!(Heartbeat = (HEARTBEAT_OBJECT_ID, 1) { task_id });

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum ResponseStatus: u8 {
        #[default]
        Success = 0,
        Fail = 1,
    }
}

impl ResponseStatus {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Generic reply. `status` travels as one byte (see [`ResponseStatus`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonResponse {
    pub task_id: i32,
    pub status: u8,
    pub message: String,
}

crate::wire_message!(CommonResponse = (COMMON_RESPONSE_OBJECT_ID, 1) { task_id, status, message });

impl CommonResponse {
    pub fn success(task_id: i32) -> Self {
        Self::with_status(task_id, ResponseStatus::Success, "Success")
    }

    pub fn fail(task_id: i32, message: impl Into<String>) -> Self {
        Self::with_status(task_id, ResponseStatus::Fail, message)
    }

    pub fn with_status(task_id: i32, status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            task_id,
            status: status.as_byte(),
            message: message.into(),
        }
    }

    /// Decoded status; unknown bytes are reported as `None`
    pub fn response_status(&self) -> Option<ResponseStatus> {
        match self.status {
            0 => Some(ResponseStatus::Success),
            1 => Some(ResponseStatus::Fail),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.response_status() == Some(ResponseStatus::Success)
    }
}

/// Ask the server which multicast group carries telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestUdpAddress {
    pub task_id: i32,
}

crate::wire_message!(RequestUdpAddress = (REQUEST_UDP_ADDRESS_OBJECT_ID, 1) { task_id });

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseUdpAddress {
    pub task_id: i32,
    pub ip: String,
    pub port: i32,
}

crate::wire_message!(ResponseUdpAddress = (RESPONSE_UDP_ADDRESS_OBJECT_ID, 1) { task_id, ip, port });

impl ResponseUdpAddress {
    /// The advertised group, if the reply is well formed
    pub fn group_addr(&self) -> Option<std::net::SocketAddr> {
        let ip = self.ip.parse::<std::net::IpAddr>().ok()?;
        let port = u16::try_from(self.port).ok()?;
        Some(std::net::SocketAddr::new(ip, port))
    }
}
