// Per-vendor circuit breaker
//
// State machine (state shared across instances via the cache):
//
//   closed    --failures >= threshold in window-->  open
//   open      --cooldown elapsed-->                 half_open
//   half_open --one probe succeeds-->               closed (counters reset)
//   half_open --one probe fails-->                  open (opened_at reset)
//
// Probes in half_open are capped; the next permit is granted only as prior
// probes resolve. Cache unavailability fails CLOSED: vendor protection is
// never traded for ingest availability.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use faultline_cache::{BreakerSnapshot, SharedState, StateError};
use faultline_core::{BreakerConfig, BreakerState, Clock};
use faultline_storage::Database;

use crate::DegradedFlag;

/// Outcome of a breaker gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerCheck {
    /// Traffic may pass; `is_probe` marks a half-open trial.
    Allowed { is_probe: bool },
    /// Traffic must be shed.
    Rejected { state: BreakerState },
}

impl BreakerCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Distributed circuit breaker over the shared-state cache.
///
/// One instance serves every vendor; per-vendor tuning comes in with each
/// call so the injected config surface stays the single source of truth.
pub struct CircuitBreaker {
    state: Arc<dyn SharedState>,
    clock: Arc<dyn Clock>,
    /// Durable snapshot target; transitions are mirrored best-effort.
    db: Option<Database>,
    degraded: DegradedFlag,
}

impl CircuitBreaker {
    pub fn new(
        state: Arc<dyn SharedState>,
        clock: Arc<dyn Clock>,
        db: Option<Database>,
        degraded: DegradedFlag,
    ) -> Self {
        Self {
            state,
            clock,
            db,
            degraded,
        }
    }

    fn failure_key(vendor: &str) -> String {
        format!("breaker:failures:{vendor}")
    }

    /// Gate check for one vendor.
    ///
    /// An open breaker whose cooldown has elapsed transitions to half_open
    /// here, on the first check at or past the boundary.
    pub async fn check(&self, vendor: &str, config: &BreakerConfig) -> BreakerCheck {
        let snapshot = match self.state.breaker_get(vendor).await {
            Ok(snapshot) => snapshot.unwrap_or_else(BreakerSnapshot::closed),
            Err(e) => return self.fail_closed(vendor, e),
        };

        match snapshot.state {
            BreakerState::Closed => {
                self.degraded.clear();
                BreakerCheck::Allowed { is_probe: false }
            }
            BreakerState::Open => {
                if self.cooldown_elapsed(snapshot.opened_at, config) {
                    if let Err(e) = self.transition_to_half_open(vendor).await {
                        return self.fail_closed(vendor, e);
                    }
                    self.acquire_probe(vendor, config).await
                } else {
                    BreakerCheck::Rejected {
                        state: BreakerState::Open,
                    }
                }
            }
            BreakerState::HalfOpen => self.acquire_probe(vendor, config).await,
        }
    }

    /// Current state, promoting open past its cooldown to half_open for the
    /// reader without persisting the transition.
    pub async fn state(&self, vendor: &str, config: &BreakerConfig) -> BreakerState {
        match self.state.breaker_get(vendor).await {
            Ok(Some(snapshot)) => match snapshot.state {
                BreakerState::Open if self.cooldown_elapsed(snapshot.opened_at, config) => {
                    BreakerState::HalfOpen
                }
                other => other,
            },
            Ok(None) => BreakerState::Closed,
            Err(_) => BreakerState::Open,
        }
    }

    /// Record a vendor failure and open the breaker when the windowed count
    /// reaches the threshold. In half_open any failure reopens immediately.
    pub async fn record_failure(&self, vendor: &str, config: &BreakerConfig) {
        let now = self.clock.now();

        let snapshot = match self.state.breaker_get(vendor).await {
            Ok(snapshot) => snapshot.unwrap_or_else(BreakerSnapshot::closed),
            Err(e) => {
                self.note_unavailable(vendor, e);
                return;
            }
        };

        match snapshot.state {
            BreakerState::Closed => {
                let count = match self
                    .state
                    .window_record(&Self::failure_key(vendor), now, config.window)
                    .await
                {
                    Ok(count) => count,
                    Err(e) => {
                        self.note_unavailable(vendor, e);
                        return;
                    }
                };

                if count >= config.threshold as u64 {
                    self.transition_to_open(vendor, now, count).await;
                }
            }
            BreakerState::HalfOpen => {
                // Probe failed: release the permit and reopen with a fresh
                // cooldown.
                let _ = self.state.probe_release(vendor).await;
                self.transition_to_open(vendor, now, 0).await;
            }
            BreakerState::Open => {
                // Still counting so the durable snapshot stays honest.
                let _ = self
                    .state
                    .window_record(&Self::failure_key(vendor), now, config.window)
                    .await;
            }
        }
    }

    /// Record a successful vendor interaction. Only meaningful in half_open,
    /// where one probe success closes the breaker and resets counters.
    pub async fn record_success(&self, vendor: &str, _config: &BreakerConfig) {
        let snapshot = match self.state.breaker_get(vendor).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                self.note_unavailable(vendor, e);
                return;
            }
        };

        if snapshot.state == BreakerState::HalfOpen {
            let _ = self.state.probe_release(vendor).await;
            self.transition_to_closed(vendor).await;
        }
    }

    fn cooldown_elapsed(&self, opened_at: Option<DateTime<Utc>>, config: &BreakerConfig) -> bool {
        match opened_at {
            Some(at) => {
                let elapsed = self
                    .clock
                    .now()
                    .signed_duration_since(at)
                    .to_std()
                    .unwrap_or_default();
                elapsed >= config.cooldown
            }
            // Open without opened_at should not happen; treat as eligible so
            // the breaker cannot wedge shut.
            None => true,
        }
    }

    async fn acquire_probe(&self, vendor: &str, config: &BreakerConfig) -> BreakerCheck {
        match self.state.probe_try_acquire(vendor, config.probe_cap).await {
            Ok(true) => {
                self.degraded.clear();
                BreakerCheck::Allowed { is_probe: true }
            }
            Ok(false) => BreakerCheck::Rejected {
                state: BreakerState::HalfOpen,
            },
            Err(e) => self.fail_closed(vendor, e),
        }
    }

    async fn transition_to_open(&self, vendor: &str, now: DateTime<Utc>, failure_count: u64) {
        debug!(vendor, "circuit breaker opening");
        if let Err(e) = self
            .state
            .breaker_put(vendor, BreakerSnapshot::open(now))
            .await
        {
            self.note_unavailable(vendor, e);
            return;
        }
        let _ = self.state.probe_reset(vendor).await;
        self.snapshot_to_store(vendor, BreakerState::Open, failure_count as i32, Some(now))
            .await;
    }

    async fn transition_to_half_open(&self, vendor: &str) -> Result<(), StateError> {
        debug!(vendor, "circuit breaker half-opening");
        self.state
            .breaker_put(vendor, BreakerSnapshot::half_open())
            .await?;
        self.state.probe_reset(vendor).await?;
        self.snapshot_to_store(vendor, BreakerState::HalfOpen, 0, None)
            .await;
        Ok(())
    }

    async fn transition_to_closed(&self, vendor: &str) {
        debug!(vendor, "circuit breaker closing");
        if let Err(e) = self
            .state
            .breaker_put(vendor, BreakerSnapshot::closed())
            .await
        {
            self.note_unavailable(vendor, e);
            return;
        }
        let _ = self.state.probe_reset(vendor).await;
        let _ = self.state.window_clear(&Self::failure_key(vendor)).await;
        self.snapshot_to_store(vendor, BreakerState::Closed, 0, None)
            .await;
    }

    /// Mirror a transition into the vendor row, best-effort.
    async fn snapshot_to_store(
        &self,
        vendor: &str,
        state: BreakerState,
        failure_count: i32,
        opened_at: Option<DateTime<Utc>>,
    ) {
        if let Some(db) = &self.db {
            if let Err(e) = db
                .update_vendor_breaker(vendor, state, failure_count, opened_at)
                .await
            {
                warn!(vendor, error = %e, "failed to mirror breaker snapshot to store");
            }
        }
    }

    fn fail_closed(&self, vendor: &str, err: StateError) -> BreakerCheck {
        self.note_unavailable(vendor, err);
        BreakerCheck::Rejected {
            state: BreakerState::Open,
        }
    }

    fn note_unavailable(&self, vendor: &str, err: StateError) {
        self.degraded.set();
        warn!(vendor, error = %err, "shared state unavailable, breaker failing closed");
    }
}
