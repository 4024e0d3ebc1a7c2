//! In-flight load accounting.
//!
//! A single process-wide counter tracks the number of outbound forwards in
//! flight. Forward tasks hold a [`LoadGuard`] so the counter is decremented
//! on every exit path, panics included.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Lock-free counter for in-flight upstream forwards.
#[derive(Debug, Default)]
pub struct LoadCounter {
    value: AtomicI64,
}

impl LoadCounter {
    /// Create a new counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter by 1.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the counter by 1.
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::SeqCst);
    }

    /// Get the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// RAII guard pairing one increment with exactly one decrement.
#[derive(Debug)]
pub struct LoadGuard {
    counter: Arc<LoadCounter>,
}

impl LoadGuard {
    /// Increment the counter and return a guard that decrements on drop.
    pub fn acquire(counter: Arc<LoadCounter>) -> Self {
        counter.increment();
        Self { counter }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_zero() {
        let counter = LoadCounter::new();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_increment_decrement_pair_is_neutral() {
        let counter = LoadCounter::new();
        let before = counter.get();
        counter.increment();
        counter.decrement();
        assert_eq!(counter.get(), before);
    }

    #[test]
    fn test_guard_decrements_on_drop() {
        let counter = Arc::new(LoadCounter::new());
        {
            let _guard = LoadGuard::acquire(counter.clone());
            assert_eq!(counter.get(), 1);
        }
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_guard_decrements_on_panic() {
        let counter = Arc::new(LoadCounter::new());
        let inner = counter.clone();

        let result = std::panic::catch_unwind(move || {
            let _guard = LoadGuard::acquire(inner);
            panic!("forward blew up");
        });

        assert!(result.is_err());
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let counter = Arc::new(LoadCounter::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    counter.increment();
                    counter.decrement();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.get(), 0);
    }
}
