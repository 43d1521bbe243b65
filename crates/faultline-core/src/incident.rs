// Incident domain types
//
// An incident groups morally-equivalent failures by fingerprint. The open
// incident for a `(tenant, workflow, signature)` triple is unique; the store
// enforces that with a partial unique index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Incident lifecycle status.
///
/// `new → analyzing → actioned → resolved`, with `ignored` as a terminal
/// branch from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    /// Freshly created from a first event.
    New,
    /// Classifier invoked, awaiting a decision or an action.
    Analyzing,
    /// A remediation action has been created.
    Actioned,
    /// Remediation concluded; a new matching failure opens a new incident.
    Resolved,
    /// Operator chose to stop tracking; terminal.
    Ignored,
}

impl IncidentStatus {
    /// Whether new events may still fold into this incident.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved | Self::Ignored)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Actioned => write!(f, "actioned"),
            Self::Resolved => write!(f, "resolved"),
            Self::Ignored => write!(f, "ignored"),
        }
    }
}

impl std::str::FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "analyzing" => Ok(Self::Analyzing),
            "actioned" => Ok(Self::Actioned),
            "resolved" => Ok(Self::Resolved),
            "ignored" => Ok(Self::Ignored),
            other => Err(format!("unknown incident status: {other}")),
        }
    }
}

/// Incident severity, ordered low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One level up, capped at critical.
    pub fn escalated(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::Critical,
            Self::Critical => Self::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A grouped failure under active management.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Incident {
    /// Unique identifier for the incident.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Workflow the grouped failures belong to.
    pub workflow_id: Uuid,
    /// Canonical fingerprint the incident groups by.
    pub signature: String,
    /// Human-readable title derived from the first event.
    pub title: String,
    /// Lifecycle status.
    pub status: IncidentStatus,
    /// Current severity; upgraded as the incident grows or ages.
    pub severity: Severity,
    /// Number of correlated events; monotonically non-decreasing.
    pub event_count: i64,
    /// `occurred_at` of the first correlated event.
    pub first_seen_at: DateTime<Utc>,
    /// `occurred_at` of the most recent correlated event.
    pub last_seen_at: DateTime<Utc>,
    /// Remediation attempts charged against the workflow retry budget.
    pub retry_count: i32,
    /// Free-form operational metadata.
    pub metadata: serde_json::Value,
    /// Timestamp when the incident was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp when the incident was last updated.
    pub updated_at: DateTime<Utc>,
}
