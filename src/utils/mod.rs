//! # Utility Modules
//!
//! Supporting utilities for timing, logging, observability and paging.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Per-endpoint thread-safe observability counters
//! - **Paging**: Splitting large snapshots into packets under a size cap
//! - **Queue**: Drop-oldest bounded queues for received commands
//! - **System Id**: Per-process run identifier for packet headers
//! - **Time**: Unix millisecond timestamps for headers and latency
//! - **Timeout**: Interval constants and async timeout wrappers

pub mod logging;
pub mod metrics;
pub mod paging;
pub mod queue;
pub mod system_id;
pub mod time;
pub mod timeout;

pub use metrics::{Metrics, MetricsSnapshot};
pub use paging::{Page, Pagination};
