//! FIFO of pending requests plus the single current slot

use std::collections::VecDeque;

/// Pending requests and the one currently being processed
///
/// The queue is busy exactly while `current` is occupied. [`drain`](Self::drain)
/// only promotes the head when it is not busy, so at most one entry is ever
/// current and entries start in insertion order.
#[derive(Debug)]
pub struct DispatchQueue<T> {
    pending: VecDeque<T>,
    current: Option<T>,
}

impl<T> Default for DispatchQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DispatchQueue<T> {
    /// Create an empty, idle queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
        }
    }

    /// Append an entry to the tail
    pub fn enqueue(&mut self, entry: T) {
        self.pending.push_back(entry);
    }

    /// Whether an entry is current
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    /// Promote the head to current if idle
    ///
    /// Returns the newly current entry, or `None` when busy or empty.
    pub fn drain(&mut self) -> Option<&mut T> {
        if self.is_busy() {
            return None;
        }
        let next = self.pending.pop_front()?;
        Some(self.current.insert(next))
    }

    /// The current entry
    #[must_use]
    pub const fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// The current entry, mutably
    pub fn current_mut(&mut self) -> Option<&mut T> {
        self.current.as_mut()
    }

    /// Clear the current slot, returning its entry
    pub fn finish(&mut self) -> Option<T> {
        self.current.take()
    }

    /// Number of entries waiting behind the current one
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether nothing is waiting and nothing is current
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.is_busy() && self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_drain_promotes_head() {
        let mut queue = DispatchQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");

        assert_eq!(queue.drain().copied(), Some("a"));
        assert!(queue.is_busy());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_is_noop_while_busy() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);

        queue.drain();
        assert!(queue.drain().is_none());
        assert!(queue.drain().is_none());
        assert_eq!(queue.current(), Some(&1));
    }

    #[test]
    fn test_drain_is_noop_when_empty() {
        let mut queue: DispatchQueue<u8> = DispatchQueue::new();
        assert!(queue.drain().is_none());
        assert!(queue.is_idle());
    }

    #[test]
    fn test_finish_frees_the_slot() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);

        queue.drain();
        assert_eq!(queue.finish(), Some(1));
        assert!(!queue.is_busy());
        assert_eq!(queue.drain().copied(), Some(2));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue,
        Drain,
        Finish,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Enqueue), Just(Op::Drain), Just(Op::Finish)]
    }

    proptest! {
        #[test]
        fn prop_entries_start_in_enqueue_order(ops in prop::collection::vec(op(), 0..200)) {
            let mut queue = DispatchQueue::new();
            let mut next = 0_u32;
            let mut started = Vec::new();

            for op in ops {
                match op {
                    Op::Enqueue => {
                        queue.enqueue(next);
                        next += 1;
                    }
                    Op::Drain => {
                        if let Some(entry) = queue.drain() {
                            started.push(*entry);
                        }
                    }
                    Op::Finish => {
                        queue.finish();
                    }
                }
            }

            let expected: Vec<u32> = (0..u32::try_from(started.len()).unwrap()).collect();
            prop_assert_eq!(started, expected);
        }

        #[test]
        fn prop_at_most_one_current(ops in prop::collection::vec(op(), 0..200)) {
            let mut queue = DispatchQueue::new();
            let mut in_flight = 0_usize;

            for op in ops {
                match op {
                    Op::Enqueue => queue.enqueue(()),
                    Op::Drain => {
                        if queue.drain().is_some() {
                            in_flight += 1;
                        }
                    }
                    Op::Finish => {
                        if queue.finish().is_some() {
                            in_flight -= 1;
                        }
                    }
                }
                prop_assert!(in_flight <= 1);
                prop_assert_eq!(queue.is_busy(), in_flight == 1);
            }
        }
    }
}
