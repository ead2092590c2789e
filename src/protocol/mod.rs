//! # Protocol Layer
//!
//! Message definitions and routing on top of the packet codec.
//!
//! ## Components
//! - **Message**: Built-in messages and the `wire_message!` macro
//! - **Command**: Received envelope with deferred typed decode
//! - **Dispatcher**: Routes envelopes to typed handlers by identity
//! - **Task**: Task id generator for request/response correlation

pub mod command;
pub mod dispatcher;
pub mod message;
pub mod task;
