//! # Transport Layer
//!
//! Connection management on top of the packet codec.
//!
//! ## Components
//! - **Session / SessionManager**: Per-connection state, supersede, liveness
//! - **TcpServer**: Accept, read, dispatch and sweep loops
//! - **TcpClient**: Receive, dispatch and heartbeat loops
//! - **Multicast**: `socket2` construction of group sockets
//! - **UdpPublisher / UdpSubscriber**: One packet per datagram to and from a group

pub mod multicast;
pub mod session;
pub mod session_manager;
pub mod tcp_client;
pub mod tcp_server;
pub mod udp_publisher;
pub mod udp_subscriber;
