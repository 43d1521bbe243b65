// Safety fabric
//
// Per-vendor circuit breaker, sliding-window rate limiter and retry-budget
// enforcer, all composed over the shared-state cache so every instance sees
// the same counters. The rules lookup lives in faultline-core; this crate is
// the runtime half of the fabric.

pub mod breaker;
pub mod budget;
pub mod rate_limit;

pub use breaker::{BreakerCheck, CircuitBreaker};
pub use budget::RetryBudget;
pub use rate_limit::{RateDecision, RateLimiter};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared degraded-mode flag.
///
/// Set whenever the cache is unreachable and a gate had to apply its
/// fail-open/fail-closed policy instead of real state. Surfaced in /health
/// and logs; cleared when an operation succeeds again.
#[derive(Clone, Default)]
pub struct DegradedFlag(Arc<AtomicBool>);

impl DegradedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_degraded(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
