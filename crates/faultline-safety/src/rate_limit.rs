// Sliding-window rate limiter
//
// For a key K, window W and limit L: a request at time t is admitted iff the
// count of admitted requests in (t-W, t] is below L. Admission records the
// timestamp; eviction is lazy at read time and memory per key is bounded by
// the window TTL. Cache unavailability fails OPEN (admit) with the degraded
// flag set - ingest availability wins for tenant-scoped limits.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use faultline_cache::SharedState;
use faultline_core::Clock;

use crate::DegradedFlag;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Under the limit; the admission was recorded.
    Admitted,
    /// Over the limit; `retry_after` is when the oldest entry leaves the
    /// window.
    Rejected { retry_after: Duration },
    /// The cache was unreachable; admitted by the fail-open policy.
    DegradedAdmit,
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Limiter keys, normalized in one place so every instance agrees.
pub fn tenant_key(tenant_id: uuid::Uuid) -> String {
    format!("rate:tenant:{tenant_id}")
}

pub fn tenant_vendor_key(tenant_id: uuid::Uuid, vendor: &str) -> String {
    format!("rate:tenant:{tenant_id}:vendor:{vendor}")
}

pub fn workflow_key(workflow_id: uuid::Uuid) -> String {
    format!("rate:workflow:{workflow_id}")
}

/// Sliding-window admission control over the shared-state cache.
pub struct RateLimiter {
    state: Arc<dyn SharedState>,
    clock: Arc<dyn Clock>,
    degraded: DegradedFlag,
}

impl RateLimiter {
    pub fn new(state: Arc<dyn SharedState>, clock: Arc<dyn Clock>, degraded: DegradedFlag) -> Self {
        Self {
            state,
            clock,
            degraded,
        }
    }

    /// Admit-or-reject for one key. Atomic at the cache, so admissions in
    /// any window never exceed the limit across instances.
    pub async fn check(&self, key: &str, limit: u32, window: Duration) -> RateDecision {
        let now = self.clock.now();
        match self
            .state
            .window_try_admit(key, now, window, limit as u64)
            .await
        {
            Ok(admission) if admission.admitted => {
                self.degraded.clear();
                RateDecision::Admitted
            }
            Ok(admission) => RateDecision::Rejected {
                retry_after: admission.retry_after.unwrap_or(window),
            },
            Err(e) => {
                self.degraded.set();
                warn!(key, error = %e, "shared state unavailable, rate limiter failing open");
                RateDecision::DegradedAdmit
            }
        }
    }

    /// Per-minute convenience wrapper; the configuration surface expresses
    /// limits as admissions per sliding minute.
    pub async fn check_per_minute(&self, key: &str, per_minute: u32) -> RateDecision {
        self.check(key, per_minute, Duration::from_secs(60)).await
    }
}
