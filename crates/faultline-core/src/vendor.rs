// Vendor domain types
//
// A vendor is an external service that workflows depend on. Each vendor has
// its own circuit breaker and rate limit. The authoritative breaker state
// lives in the shared-state cache; the vendor row carries a durable snapshot
// updated on transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation - all calls allowed.
    Closed,
    /// Failure threshold exceeded - all calls rejected.
    Open,
    /// Testing if the vendor recovered - bounded probes allowed.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

impl std::str::FromStr for BreakerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(format!("unknown breaker state: {other}")),
        }
    }
}

/// A vendor with its protective-control state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Vendor {
    /// Unique identifier for the vendor.
    pub id: Uuid,
    /// Vendor name; the key events use to reference it.
    pub name: String,
    /// Durable snapshot of the breaker state.
    pub breaker_state: BreakerState,
    /// Durable snapshot of the windowed failure count.
    pub breaker_failure_count: i32,
    /// When the breaker last opened, if it is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker_opened_at: Option<DateTime<Utc>>,
    /// Admissions allowed per minute for this vendor.
    pub rate_limit_per_minute: i32,
    /// Timestamp when the vendor was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp when the vendor was last updated.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn breaker_state_round_trips_through_text() {
        for state in [
            BreakerState::Closed,
            BreakerState::Open,
            BreakerState::HalfOpen,
        ] {
            assert_eq!(BreakerState::from_str(&state.to_string()).unwrap(), state);
        }
    }

    #[test]
    fn unknown_breaker_state_is_rejected() {
        assert!(BreakerState::from_str("tripped").is_err());
    }
}
