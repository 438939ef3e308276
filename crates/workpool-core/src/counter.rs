use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter shared between threads. Every mutation is a single atomic
/// operation; clones observe and update the same value.
#[derive(Debug, Clone, Default)]
pub struct SharedCounter {
    inner: Arc<AtomicU64>,
}

impl SharedCounter {
    pub fn new(initial: u64) -> Self {
        SharedCounter {
            inner: Arc::new(AtomicU64::new(initial)),
        }
    }

    /// Current value
    pub fn load(&self) -> u64 {
        self.inner.load(Ordering::SeqCst)
    }

    /// Add `delta`, returning the previous value
    pub fn fetch_add(&self, delta: u64) -> u64 {
        self.inner.fetch_add(delta, Ordering::SeqCst)
    }

    /// Subtract `delta`, returning the previous value
    pub fn fetch_sub(&self, delta: u64) -> u64 {
        self.inner.fetch_sub(delta, Ordering::SeqCst)
    }

    /// Raise the value to at least `value`, returning the previous value
    pub fn fetch_max(&self, value: u64) -> u64 {
        self.inner.fetch_max(value, Ordering::SeqCst)
    }

    /// Store `new` only if the counter still holds `current`.
    ///
    /// Returns `Ok(previous)` on success and `Err(actual)` when another
    /// writer got there first.
    pub fn compare_and_swap(&self, current: u64, new: u64) -> Result<u64, u64> {
        self.inner
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
    }

    /// Take the next value of a sequence starting at the initial value.
    pub fn next(&self) -> u64 {
        self.fetch_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let counter = SharedCounter::new(0);

        thread::scope(|scope| {
            for _ in 0..8 {
                let counter = counter.clone();
                scope.spawn(move || {
                    for _ in 0..10_000 {
                        counter.fetch_add(1);
                    }
                });
            }
        });

        assert_eq!(counter.load(), 80_000);
    }

    #[test]
    fn test_sequence_values_are_unique() {
        let counter = SharedCounter::new(1);

        let ids: Vec<u64> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let counter = counter.clone();
                    scope.spawn(move || (0..250).map(|_| counter.next()).collect::<Vec<_>>())
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 1000);
        assert_eq!(*ids.iter().min().unwrap(), 1);
        assert_eq!(*ids.iter().max().unwrap(), 1000);
    }

    #[test]
    fn test_compare_and_swap() {
        let counter = SharedCounter::new(5);

        assert_eq!(counter.compare_and_swap(5, 6), Ok(5));
        assert_eq!(counter.compare_and_swap(5, 7), Err(6));
        assert_eq!(counter.load(), 6);
    }

    #[test]
    fn test_cas_loop_increment() {
        let counter = SharedCounter::new(0);

        thread::scope(|scope| {
            for _ in 0..4 {
                let counter = counter.clone();
                scope.spawn(move || {
                    for _ in 0..1000 {
                        let mut current = counter.load();
                        while let Err(actual) = counter.compare_and_swap(current, current + 1) {
                            current = actual;
                        }
                    }
                });
            }
        });

        assert_eq!(counter.load(), 4000);
    }

    #[test]
    fn test_fetch_max() {
        let counter = SharedCounter::new(3);
        counter.fetch_max(2);
        assert_eq!(counter.load(), 3);
        counter.fetch_max(9);
        assert_eq!(counter.load(), 9);
    }
}
