//! In-flight accounting and concurrency capping
//!
//! Every admitted call holds a [`BulkheadGuard`] for its whole lifetime, so
//! the in-flight count stays exact across success, failure, timeout, caller
//! cancellation and panics. The cap (`maxRequests`) is only enforced for
//! calls admitted while the circuit is closed; half-open probes are bounded
//! by the probe budget instead and are admitted with [`Bulkhead::enter`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct Bulkhead {
    /// Maximum number of concurrent calls while closed (0 = unbounded)
    limit: usize,
    in_flight: AtomicUsize,
}

impl Bulkhead {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Try to take a slot without exceeding the limit
    ///
    /// Returns `None` when the bulkhead is at capacity.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BulkheadGuard> {
        if self.limit == 0 {
            return Some(self.enter());
        }

        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.limit {
                return None;
            }

            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(BulkheadGuard {
                        bulkhead: Arc::clone(self),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Take a slot regardless of the limit
    pub fn enter(self: &Arc<Self>) -> BulkheadGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        BulkheadGuard {
            bulkhead: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::Release);
    }
}

/// Slot held by one in-flight call, released on drop
#[derive(Debug)]
pub struct BulkheadGuard {
    bulkhead: Arc<Bulkhead>,
}

impl Drop for BulkheadGuard {
    fn drop(&mut self) {
        self.bulkhead.release();
    }
}
