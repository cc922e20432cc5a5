use std::sync::atomic::{AtomicU64, Ordering};

use cloudraid_common::StripeId;

/// Monotonic stripe-id generator. Initialized at startup to
/// `max(RESERVED_STRIPES, 1 + highest id in use)`; ids are never reused
/// within a mount lifetime.
pub struct AllocatorClock {
    next: AtomicU64,
}

impl AllocatorClock {
    pub fn new(start: StripeId) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    pub fn allocate(&self) -> StripeId {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        assert!(id != u64::MAX, "stripe id space exhausted");
        id
    }

    pub fn peek(&self) -> StripeId {
        self.next.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudraid_common::RESERVED_STRIPES;

    #[test]
    fn monotonic_from_start() {
        let clock = AllocatorClock::new(RESERVED_STRIPES);
        assert_eq!(clock.allocate(), RESERVED_STRIPES);
        assert_eq!(clock.allocate(), RESERVED_STRIPES + 1);
        assert_eq!(clock.peek(), RESERVED_STRIPES + 2);
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let clock = Arc::new(AllocatorClock::new(100));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let clock = clock.clone();
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| clock.allocate()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "id {id} allocated twice");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
