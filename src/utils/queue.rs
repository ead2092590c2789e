//! Bounded pending queues between receive and dispatch loops.

use std::collections::VecDeque;

/// Push `item`, evicting the oldest entry when `queue` already holds `limit`.
///
/// Returns `true` when an entry was evicted. A zero limit is treated as one.
pub fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, limit: usize) -> bool {
    let evicted = queue.len() >= limit.max(1) && queue.pop_front().is_some();
    queue.push_back(item);
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_under_limit_keeps_everything() {
        let mut queue = VecDeque::new();
        assert!(!push_bounded(&mut queue, 1, 3));
        assert!(!push_bounded(&mut queue, 2, 3));
        assert_eq!(queue, VecDeque::from([1, 2]));
    }

    #[test]
    fn test_push_at_limit_drops_oldest() {
        let mut queue = VecDeque::from([1, 2, 3]);
        assert!(push_bounded(&mut queue, 4, 3));
        assert_eq!(queue, VecDeque::from([2, 3, 4]));
    }

    #[test]
    fn test_zero_limit_keeps_latest() {
        let mut queue = VecDeque::new();
        push_bounded(&mut queue, 'a', 0);
        assert!(push_bounded(&mut queue, 'b', 0));
        assert_eq!(queue, VecDeque::from(['b']));
    }
}
