//! Memory Ring - bounded FIFO history for one (cogniton, channel) pair

use crate::observer::Payload;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Bounded history of payloads.
///
/// Fixed capacity, oldest entries auto-evicted. The ring never holds more
/// than `capacity` items: after `n` pushes it holds the `min(capacity, n)`
/// most recent values in push order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryRing<T = Payload> {
    /// Stored values, oldest at the front.
    items: VecDeque<T>,

    /// Maximum number of retained values.
    capacity: usize,
}

impl<T> MemoryRing<T> {
    /// Create an empty ring. A zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    // =========================================================================
    // WRITING
    // =========================================================================

    /// Append a value, evicting the oldest one if the ring is full.
    pub fn push(&mut self, value: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(value);
    }

    /// Drop all stored values.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    // =========================================================================
    // READING
    // =========================================================================

    /// Look back into history.
    ///
    /// Depth 0 and depth 1 both return the most recent value, depth `d`
    /// returns the value at index `len - d`. Depth beyond the stored history
    /// yields `None`.
    pub fn peek(&self, depth: usize) -> Option<&T> {
        let back = depth.max(1);
        if back > self.items.len() {
            return None;
        }
        self.items.get(self.items.len() - back)
    }

    /// Most recent value.
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterate stored values, oldest first.
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    /// Read the last N values in chronological order (oldest first).
    pub fn window(&self, n: usize) -> Vec<&T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).collect()
    }

    // =========================================================================
    // METRICS
    // =========================================================================

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_ring() {
        let ring: MemoryRing<u32> = MemoryRing::new(8);
        assert_eq!(ring.capacity(), 8);
        assert!(ring.is_empty());
        assert_eq!(ring.peek(0), None);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut ring = MemoryRing::new(0);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let mut ring = MemoryRing::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);

        assert_eq!(ring.len(), 2);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_peek_depths() {
        let mut ring = MemoryRing::new(10);
        for i in 1..=4 {
            ring.push(i);
        }

        assert_eq!(ring.peek(0), Some(&4));
        assert_eq!(ring.peek(1), Some(&4));
        assert_eq!(ring.peek(2), Some(&3));
        assert_eq!(ring.peek(4), Some(&1));
        assert_eq!(ring.peek(5), None);
    }

    #[test]
    fn test_window_chronological() {
        let mut ring = MemoryRing::new(5);
        for i in 0..7 {
            ring.push(i);
        }

        let window: Vec<i32> = ring.window(3).into_iter().copied().collect();
        assert_eq!(window, vec![4, 5, 6]);

        // Asking for more than stored returns everything
        assert_eq!(ring.window(100).len(), 5);
    }

    #[test]
    fn test_clear() {
        let mut ring = MemoryRing::new(3);
        ring.push("a");
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.latest(), None);
    }

    proptest! {
        #[test]
        fn prop_ring_holds_most_recent(bound in 1usize..32, values in prop::collection::vec(any::<u32>(), 0..128)) {
            let mut ring = MemoryRing::new(bound);
            for &v in &values {
                ring.push(v);
                prop_assert!(ring.len() <= bound);
            }

            let keep = bound.min(values.len());
            let expected: Vec<u32> = values[values.len() - keep..].to_vec();
            let stored: Vec<u32> = ring.iter().copied().collect();
            prop_assert_eq!(stored, expected);
        }

        #[test]
        fn prop_peek_zero_is_latest(values in prop::collection::vec(any::<i64>(), 1..64)) {
            let mut ring = MemoryRing::new(16);
            for &v in &values {
                ring.push(v);
            }
            prop_assert_eq!(ring.peek(0), values.last());
            prop_assert_eq!(ring.peek(0), ring.peek(1));
            prop_assert_eq!(ring.peek(ring.len() + 1), None);
        }
    }
}
