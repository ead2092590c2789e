//! Task id generation for request/response correlation.

use std::sync::atomic::{AtomicI32, Ordering};

/// Hands out increasing task ids. Share it through an `Arc` where several
/// senders must not collide.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next: AtomicI32,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i32) -> Self {
        Self {
            next: AtomicI32::new(first),
        }
    }

    /// Next id; wraps past `i32::MAX` back to 1
    pub fn next(&self) -> i32 {
        loop {
            let current = self.next.load(Ordering::Relaxed);
            let following = if current == i32::MAX { 1 } else { current + 1 };
            if self
                .next
                .compare_exchange_weak(current, following, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return current;
            }
        }
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
