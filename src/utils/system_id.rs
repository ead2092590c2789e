//! Per-process run identifier stamped into every packet header.
//!
//! Subscribers compare it against the id learned over TCP so that datagrams
//! from a previous run (or another server on the same group) are dropped.

use std::sync::OnceLock;

static PROCESS_SYSTEM_ID: OnceLock<i64> = OnceLock::new();

/// The run identifier of this process, chosen once on first use.
pub fn process_system_id() -> i64 {
    *PROCESS_SYSTEM_ID.get_or_init(generate_system_id)
}

/// A fresh non-zero identifier. Zero is reserved for "not yet known".
pub fn generate_system_id() -> i64 {
    loop {
        let id = rand::random::<i64>();
        if id != 0 {
            return id;
        }
    }
}
