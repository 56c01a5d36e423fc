//! Per-request resource accounting.
//!
//! One [`ResourceBudget`] exists per request, shared (`Arc`) by every stage
//! that buffers candidate data. Stages reserve before buffering and release
//! when a candidate is emitted or discarded; a reservation that would breach
//! the budget marks cleanup as due and fails, which the coordinator turns
//! into a terminal `resource_exhausted` error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{KnowStreamError, Result};

/// Shared memory/backpressure accounting for one request.
///
/// Lives from request start until the event stream closes (success, error,
/// or cancellation). All operations are safe for concurrent use from every
/// fan-out worker; `cleanup` is idempotent so racing failure paths (e.g. a
/// timeout and a downstream error) can both invoke it.
#[derive(Debug)]
pub struct ResourceBudget {
    budget_bytes: usize,
    current_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    buffered_items: AtomicUsize,
    cleanup_due: AtomicBool,
    cleaned: AtomicBool,
}

impl ResourceBudget {
    /// Create a budget capped at `budget_bytes`.
    pub fn new(budget_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            budget_bytes,
            current_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            buffered_items: AtomicUsize::new(0),
            cleanup_due: AtomicBool::new(false),
            cleaned: AtomicBool::new(false),
        })
    }

    /// Reserve `bytes` for one buffered item.
    ///
    /// On breach the budget is marked cleanup-due and the reservation is
    /// rolled back; the caller must stop buffering and surface the error.
    pub fn try_reserve(&self, bytes: usize) -> Result<()> {
        let prev = self.current_bytes.fetch_add(bytes, Ordering::SeqCst);
        let now = prev + bytes;
        self.peak_bytes.fetch_max(now, Ordering::SeqCst);

        if now > self.budget_bytes {
            self.current_bytes.fetch_sub(bytes, Ordering::SeqCst);
            self.cleanup_due.store(true, Ordering::SeqCst);
            return Err(KnowStreamError::ResourceExhausted {
                used_bytes: now,
                budget_bytes: self.budget_bytes,
            });
        }

        self.buffered_items.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Release a previous reservation of `bytes`.
    pub fn release(&self, bytes: usize) {
        // Saturating: a double release must not wrap the counter.
        let mut current = self.current_bytes.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(bytes);
            match self.current_bytes.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        let mut items = self.buffered_items.load(Ordering::SeqCst);
        loop {
            let next = items.saturating_sub(1);
            match self.buffered_items.compare_exchange(
                items,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => items = observed,
            }
        }
    }

    /// Currently reserved bytes.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes.load(Ordering::SeqCst)
    }

    /// High-water mark of reserved bytes.
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::SeqCst)
    }

    /// Number of currently buffered items.
    pub fn buffered_items(&self) -> usize {
        self.buffered_items.load(Ordering::SeqCst)
    }

    /// Whether a breach has flagged this request for cleanup.
    pub fn cleanup_due(&self) -> bool {
        self.cleanup_due.load(Ordering::SeqCst)
    }

    /// Drop all accounting for the request. Idempotent: returns `true` for
    /// the caller that performed the cleanup, `false` for every later call.
    pub fn cleanup(&self) -> bool {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.current_bytes.store(0, Ordering::SeqCst);
        self.buffered_items.store(0, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_release_roundtrip() {
        let budget = ResourceBudget::new(1024);
        budget.try_reserve(100).expect("within budget");
        budget.try_reserve(200).expect("within budget");
        assert_eq!(budget.current_bytes(), 300);
        assert_eq!(budget.buffered_items(), 2);

        budget.release(100);
        assert_eq!(budget.current_bytes(), 200);
        assert_eq!(budget.buffered_items(), 1);
        assert_eq!(budget.peak_bytes(), 300);
    }

    #[test]
    fn breach_marks_cleanup_due_and_rolls_back() {
        let budget = ResourceBudget::new(100);
        budget.try_reserve(80).expect("within budget");

        let err = budget.try_reserve(40).unwrap_err();
        assert!(matches!(err, KnowStreamError::ResourceExhausted { .. }));
        assert!(budget.cleanup_due());
        // The failed reservation is not charged.
        assert_eq!(budget.current_bytes(), 80);
        assert_eq!(budget.buffered_items(), 1);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let budget = ResourceBudget::new(100);
        budget.try_reserve(50).expect("within budget");

        assert!(budget.cleanup());
        assert!(!budget.cleanup());
        assert_eq!(budget.current_bytes(), 0);
        assert_eq!(budget.buffered_items(), 0);
    }

    #[test]
    fn double_release_saturates() {
        let budget = ResourceBudget::new(100);
        budget.try_reserve(50).expect("within budget");
        budget.release(50);
        budget.release(50);
        assert_eq!(budget.current_bytes(), 0);
        assert_eq!(budget.buffered_items(), 0);
    }

    #[tokio::test]
    async fn concurrent_reservations_stay_consistent() {
        let budget = ResourceBudget::new(1_000_000);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let b = budget.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    b.try_reserve(10).expect("within budget");
                    b.release(10);
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }
        assert_eq!(budget.current_bytes(), 0);
        assert_eq!(budget.buffered_items(), 0);
    }
}
