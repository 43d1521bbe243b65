// SharedState trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use faultline_core::BreakerState;

/// Error type for shared-state operations.
///
/// `Unavailable` is the variant the safety fabric branches on: breakers fail
/// closed, rate limits fail open with a degraded flag.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The backend cannot be reached or timed out.
    #[error("shared state unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("shared state corrupt for key {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// Outcome of an atomic sliding-window admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAdmission {
    /// Whether the request was admitted (and recorded).
    pub admitted: bool,
    /// Entries in the window after this attempt.
    pub count: u64,
    /// When rejected: how long until the oldest entry leaves the window.
    pub retry_after: Option<Duration>,
}

/// Cross-instance breaker state for one vendor.
///
/// The windowed failure count lives in its own window key (so isolated
/// historical failures age out); the snapshot carries only the state machine
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    /// Set while the breaker is open; basis of the cooldown check.
    pub opened_at: Option<DateTime<Utc>>,
}

impl BreakerSnapshot {
    pub fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            opened_at: None,
        }
    }

    pub fn open(at: DateTime<Utc>) -> Self {
        Self {
            state: BreakerState::Open,
            opened_at: Some(at),
        }
    }

    pub fn half_open() -> Self {
        Self {
            state: BreakerState::HalfOpen,
            opened_at: None,
        }
    }
}

/// Distributed counters and breaker state.
///
/// Every method takes `now` from the caller so the fabric's Clock is the
/// single source of time and tests can pin window edges.
#[async_trait]
pub trait SharedState: Send + Sync {
    /// Atomically admit iff the window count is below `limit`, recording the
    /// admission. Entries older than `now - window` are evicted first.
    async fn window_try_admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u64,
    ) -> Result<WindowAdmission, StateError>;

    /// Record an occurrence under `key` and return the count in the window
    /// including it. Used for failure accounting, not admission control.
    async fn window_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64, StateError>;

    /// Count occurrences in `(now - window, now]` without recording.
    async fn window_count(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64, StateError>;

    /// Read the breaker snapshot for a vendor, if one exists.
    async fn breaker_get(&self, vendor: &str) -> Result<Option<BreakerSnapshot>, StateError>;

    /// Replace the breaker snapshot for a vendor.
    async fn breaker_put(
        &self,
        vendor: &str,
        snapshot: BreakerSnapshot,
    ) -> Result<(), StateError>;

    /// Acquire one half-open probe permit iff fewer than `cap` probes are
    /// unresolved. Atomic.
    async fn probe_try_acquire(&self, vendor: &str, cap: u32) -> Result<bool, StateError>;

    /// Resolve one probe permit (success or failure both release it).
    async fn probe_release(&self, vendor: &str) -> Result<(), StateError>;

    /// Drop all probe accounting for a vendor (on transition out of
    /// half-open).
    async fn probe_reset(&self, vendor: &str) -> Result<(), StateError>;

    /// Drop the failure window for a vendor (on reset to closed).
    async fn window_clear(&self, key: &str) -> Result<(), StateError>;
}
