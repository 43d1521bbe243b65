// Classifier adapter seam
//
// The core depends only on this contract. Production, mock and rule-table
// implementations are swappable; the pipeline tolerates non-determinism,
// latency (bounded by a timeout) and outright failure, collapsing the latter
// two into an escalate recommendation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::event::Event;
use crate::incident::Incident;

/// Reasoning string recorded when the classifier times out or fails.
pub const CLASSIFIER_TIMEOUT_REASON: &str = "classifier_timeout";

/// Next step a classification recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Retry,
    Escalate,
    Manual,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::Escalate => write!(f, "escalate"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for Recommendation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(Self::Retry),
            "escalate" => Ok(Self::Escalate),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown recommendation: {other}")),
        }
    }
}

/// Output of a classifier run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Failure category, classifier-defined.
    pub category: String,
    /// Confidence in `[0, 1]`; clamped on construction.
    pub confidence: f64,
    /// Recommended next step.
    pub recommended: Recommendation,
    /// Free-form reasoning for the audit trail.
    pub reasoning: String,
    /// Identifies the classifier implementation and version.
    pub model_tag: String,
}

impl Classification {
    /// The fallback recorded when the classifier times out or fails.
    pub fn classifier_timeout(model_tag: impl Into<String>) -> Self {
        Self {
            category: "unclassified".to_string(),
            confidence: 0.0,
            recommended: Recommendation::Escalate,
            reasoning: CLASSIFIER_TIMEOUT_REASON.to_string(),
            model_tag: model_tag.into(),
        }
    }

    /// Clamp confidence into `[0, 1]`.
    pub fn clamped(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

/// Errors a classifier implementation may surface.
///
/// The pipeline treats every variant the same way: record the timeout
/// fallback and move on. The distinction exists for logs.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier timed out")]
    Timeout,

    #[error("classifier transport error: {0}")]
    Transport(String),

    #[error("classifier returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// The narrow interface the decision recorder consumes.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify an incident given its most recent correlated events.
    ///
    /// Implementations are not required to be deterministic.
    async fn classify(
        &self,
        incident: &Incident,
        recent_events: &[Event],
    ) -> Result<Classification, ClassifierError>;

    /// Tag recorded on fallback decisions when this classifier fails.
    fn model_tag(&self) -> &str;
}
