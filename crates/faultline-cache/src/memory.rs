// In-memory SharedState implementation
//
// Single-process stand-in for Redis, used by tests and local development.
// Deterministic: time only enters through the `now` arguments.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::state::{BreakerSnapshot, SharedState, StateError, WindowAdmission};

#[derive(Default)]
struct Inner {
    windows: HashMap<String, Vec<DateTime<Utc>>>,
    breakers: HashMap<String, BreakerSnapshot>,
    probes: HashMap<String, u32>,
}

/// In-memory shared state for tests and single-instance runs.
#[derive(Default)]
pub struct InMemorySharedState {
    inner: Mutex<Inner>,
    /// When set, every operation fails Unavailable; lets tests exercise the
    /// degraded-mode branches.
    fail: Mutex<bool>,
}

impl InMemorySharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.fail.lock().expect("state lock") = unavailable;
    }

    fn check_available(&self) -> Result<(), StateError> {
        if *self.fail.lock().expect("state lock") {
            Err(StateError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn evict(entries: &mut Vec<DateTime<Utc>>, cutoff: DateTime<Utc>) {
        entries.retain(|t| *t > cutoff);
    }
}

#[async_trait]
impl SharedState for InMemorySharedState {
    async fn window_try_admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u64,
    ) -> Result<WindowAdmission, StateError> {
        self.check_available()?;
        let window_chrono = chrono::Duration::from_std(window)
            .map_err(|e| StateError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let mut inner = self.inner.lock().expect("state lock");
        let entries = inner.windows.entry(key.to_string()).or_default();
        Self::evict(entries, now - window_chrono);

        if (entries.len() as u64) < limit {
            entries.push(now);
            Ok(WindowAdmission {
                admitted: true,
                count: entries.len() as u64,
                retry_after: None,
            })
        } else {
            let retry_after = entries
                .iter()
                .min()
                .map(|oldest| (*oldest + window_chrono - now).to_std().unwrap_or_default());
            Ok(WindowAdmission {
                admitted: false,
                count: entries.len() as u64,
                retry_after,
            })
        }
    }

    async fn window_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64, StateError> {
        self.check_available()?;
        let window_chrono = chrono::Duration::from_std(window)
            .map_err(|e| StateError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let mut inner = self.inner.lock().expect("state lock");
        let entries = inner.windows.entry(key.to_string()).or_default();
        Self::evict(entries, now - window_chrono);
        entries.push(now);
        Ok(entries.len() as u64)
    }

    async fn window_count(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64, StateError> {
        self.check_available()?;
        let window_chrono = chrono::Duration::from_std(window)
            .map_err(|e| StateError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let mut inner = self.inner.lock().expect("state lock");
        let entries = inner.windows.entry(key.to_string()).or_default();
        Self::evict(entries, now - window_chrono);
        Ok(entries.len() as u64)
    }

    async fn breaker_get(&self, vendor: &str) -> Result<Option<BreakerSnapshot>, StateError> {
        self.check_available()?;
        let inner = self.inner.lock().expect("state lock");
        Ok(inner.breakers.get(vendor).copied())
    }

    async fn breaker_put(
        &self,
        vendor: &str,
        snapshot: BreakerSnapshot,
    ) -> Result<(), StateError> {
        self.check_available()?;
        let mut inner = self.inner.lock().expect("state lock");
        inner.breakers.insert(vendor.to_string(), snapshot);
        Ok(())
    }

    async fn probe_try_acquire(&self, vendor: &str, cap: u32) -> Result<bool, StateError> {
        self.check_available()?;
        let mut inner = self.inner.lock().expect("state lock");
        let in_flight = inner.probes.entry(vendor.to_string()).or_insert(0);
        if *in_flight < cap {
            *in_flight += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn probe_release(&self, vendor: &str) -> Result<(), StateError> {
        self.check_available()?;
        let mut inner = self.inner.lock().expect("state lock");
        if let Some(in_flight) = inner.probes.get_mut(vendor) {
            *in_flight = in_flight.saturating_sub(1);
        }
        Ok(())
    }

    async fn probe_reset(&self, vendor: &str) -> Result<(), StateError> {
        self.check_available()?;
        let mut inner = self.inner.lock().expect("state lock");
        inner.probes.remove(vendor);
        Ok(())
    }

    async fn window_clear(&self, key: &str) -> Result<(), StateError> {
        self.check_available()?;
        let mut inner = self.inner.lock().expect("state lock");
        inner.windows.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::BreakerState;

    fn t0() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects() {
        let state = InMemorySharedState::new();
        let now = t0();
        let window = Duration::from_secs(60);

        for i in 1..=3 {
            let a = state.window_try_admit("k", now, window, 3).await.unwrap();
            assert!(a.admitted, "admission {i}");
            assert_eq!(a.count, i);
        }

        let rejected = state.window_try_admit("k", now, window, 3).await.unwrap();
        assert!(!rejected.admitted);
        assert_eq!(rejected.count, 3);
        assert!(rejected.retry_after.is_some());
    }

    #[tokio::test]
    async fn entries_age_out_of_the_window() {
        let state = InMemorySharedState::new();
        let now = t0();
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            state.window_try_admit("k", now, window, 3).await.unwrap();
        }
        assert!(
            !state
                .window_try_admit("k", now, window, 3)
                .await
                .unwrap()
                .admitted
        );

        // Just past the window edge the oldest entries are gone.
        let later = now + chrono::Duration::seconds(61);
        let a = state.window_try_admit("k", later, window, 3).await.unwrap();
        assert!(a.admitted);
        assert_eq!(a.count, 1);
    }

    #[tokio::test]
    async fn window_keys_are_independent() {
        let state = InMemorySharedState::new();
        let now = t0();
        let window = Duration::from_secs(60);

        state.window_try_admit("a", now, window, 1).await.unwrap();
        let b = state.window_try_admit("b", now, window, 1).await.unwrap();
        assert!(b.admitted);
    }

    #[tokio::test]
    async fn record_and_count_track_the_window() {
        let state = InMemorySharedState::new();
        let now = t0();
        let window = Duration::from_secs(3600);

        assert_eq!(state.window_record("f", now, window).await.unwrap(), 1);
        assert_eq!(state.window_record("f", now, window).await.unwrap(), 2);
        assert_eq!(state.window_count("f", now, window).await.unwrap(), 2);

        let later = now + chrono::Duration::seconds(3601);
        assert_eq!(state.window_count("f", later, window).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn breaker_snapshot_round_trips() {
        let state = InMemorySharedState::new();
        assert!(state.breaker_get("stripe").await.unwrap().is_none());

        let snapshot = BreakerSnapshot::open(t0());
        state.breaker_put("stripe", snapshot).await.unwrap();
        let read = state.breaker_get("stripe").await.unwrap().unwrap();
        assert_eq!(read.state, BreakerState::Open);
        assert_eq!(read.opened_at, snapshot.opened_at);
    }

    #[tokio::test]
    async fn probe_permits_respect_the_cap() {
        let state = InMemorySharedState::new();
        assert!(state.probe_try_acquire("v", 2).await.unwrap());
        assert!(state.probe_try_acquire("v", 2).await.unwrap());
        assert!(!state.probe_try_acquire("v", 2).await.unwrap());

        state.probe_release("v").await.unwrap();
        assert!(state.probe_try_acquire("v", 2).await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_state_surfaces_errors() {
        let state = InMemorySharedState::new();
        state.set_unavailable(true);
        let err = state
            .window_try_admit("k", t0(), Duration::from_secs(60), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Unavailable(_)));
    }
}
