// Decision domain types
//
// Decisions are the immutable audit trail of every automated choice. The
// store exposes no update operation for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::classify::Recommendation;

/// What a decision records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    /// Classifier output for a new or upgraded incident.
    Classification,
    /// Root-cause analysis note.
    Rca,
    /// Standalone recommendation, e.g. a single-flight suppression note.
    Recommendation,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::Rca => write!(f, "rca"),
            Self::Recommendation => write!(f, "recommendation"),
        }
    }
}

impl std::str::FromStr for DecisionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classification" => Ok(Self::Classification),
            "rca" => Ok(Self::Rca),
            "recommendation" => Ok(Self::Recommendation),
            other => Err(format!("unknown decision kind: {other}")),
        }
    }
}

/// An immutable audit record of one automated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Decision {
    /// Unique identifier for the decision.
    pub id: Uuid,
    /// Incident the decision concerns.
    pub incident_id: Uuid,
    /// What the decision records.
    pub kind: DecisionKind,
    /// Failure category assigned by the classifier.
    pub category: String,
    /// Recommended next step.
    pub recommended: Recommendation,
    /// Classifier reasoning, verbatim.
    pub reasoning: String,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    /// Identifies the classifier implementation and version.
    pub model_tag: String,
    /// Timestamp when the decision was recorded.
    pub created_at: DateTime<Utc>,
}
