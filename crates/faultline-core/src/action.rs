// Action domain types
//
// Actions move through a validated state machine. The only legal transitions
// are pending → in_progress → succeeded | failed. An illegal transition does
// not panic and does not mutate the row through the normal path; the offender
// is parked in `invariant_violation` for operator review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// What kind of remediation an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Re-run the failed work after a backoff delay.
    Retry,
    /// Notify humans at an escalation level; never retried automatically.
    Escalate,
    /// Ask for human review without paging.
    Manual,
    /// Semantically undo a prior succeeded reversible action.
    Reversal,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::Escalate => write!(f, "escalate"),
            Self::Manual => write!(f, "manual"),
            Self::Reversal => write!(f, "reversal"),
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(Self::Retry),
            "escalate" => Ok(Self::Escalate),
            "manual" => Ok(Self::Manual),
            "reversal" => Ok(Self::Reversal),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// Action execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Created, waiting for `scheduled_for` (or immediate pickup).
    Pending,
    /// Claimed by a scheduler instance and executing.
    InProgress,
    /// Terminal: the action completed.
    Succeeded,
    /// Terminal: the action failed; a new action may be selected.
    Failed,
    /// Terminal: an illegal transition or single-flight breach was detected;
    /// parked for operator review.
    InvariantViolation,
}

impl ActionStatus {
    /// Whether the `self → next` transition is legal.
    ///
    /// `invariant_violation` is reachable from any non-terminal state so a
    /// detected breach can always be parked without widening the legal set.
    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Succeeded)
                | (Self::InProgress, Self::Failed)
                | (Self::Pending, Self::InvariantViolation)
                | (Self::InProgress, Self::InvariantViolation)
        )
    }

    /// Whether the action still occupies the incident's single flight slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::InvariantViolation
        )
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::InvariantViolation => write!(f, "invariant_violation"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "invariant_violation" => Ok(Self::InvariantViolation),
            other => Err(format!("unknown action status: {other}")),
        }
    }
}

/// A remediation action recorded against an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Action {
    /// Unique identifier for the action.
    pub id: Uuid,
    /// Incident the action remediates.
    pub incident_id: Uuid,
    /// Remediation kind.
    pub kind: ActionKind,
    /// Execution status.
    pub status: ActionStatus,
    /// Kind-specific parameters (retry policy name, escalation channels, ...).
    pub parameters: serde_json::Value,
    /// Execution result, recorded on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Whether a succeeded run of this action can be reversed.
    pub reversible: bool,
    /// For `reversal` actions, the succeeded action being undone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversal_of: Option<Uuid>,
    /// Earliest time the scheduler may pick the action up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// 1-indexed attempt number charged against the retry budget.
    pub attempt_number: i32,
    /// Timestamp when the action was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp when the action reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::InProgress));
        assert!(ActionStatus::InProgress.can_transition_to(ActionStatus::Succeeded));
        assert!(ActionStatus::InProgress.can_transition_to(ActionStatus::Failed));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!ActionStatus::Pending.can_transition_to(ActionStatus::Succeeded));
        assert!(!ActionStatus::Pending.can_transition_to(ActionStatus::Failed));
        assert!(!ActionStatus::Succeeded.can_transition_to(ActionStatus::InProgress));
        assert!(!ActionStatus::Failed.can_transition_to(ActionStatus::Pending));
        assert!(!ActionStatus::Succeeded.can_transition_to(ActionStatus::Failed));
        assert!(!ActionStatus::InProgress.can_transition_to(ActionStatus::Pending));
    }

    #[test]
    fn violation_is_reachable_only_from_non_terminal() {
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::InvariantViolation));
        assert!(ActionStatus::InProgress.can_transition_to(ActionStatus::InvariantViolation));
        assert!(!ActionStatus::Succeeded.can_transition_to(ActionStatus::InvariantViolation));
        assert!(!ActionStatus::Failed.can_transition_to(ActionStatus::InvariantViolation));
    }

    #[test]
    fn in_flight_statuses_occupy_the_slot() {
        assert!(ActionStatus::Pending.is_in_flight());
        assert!(ActionStatus::InProgress.is_in_flight());
        assert!(!ActionStatus::Succeeded.is_in_flight());
        assert!(!ActionStatus::Failed.is_in_flight());
    }
}
