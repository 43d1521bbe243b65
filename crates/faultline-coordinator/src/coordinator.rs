// Action selection, creation and reversal
//
// on_decision is the single entry point from the pipeline: it enforces
// single-flight, applies the selection policy, and persists the chosen
// action in pending with its schedule. Reversal is operator-initiated and
// validated here.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use faultline_core::{
    Action, ActionKind, ActionStatus, Clock, Decision, DecisionKind, Incident, Recommendation,
    RetryPolicies, RulesTable, Severity,
};
use faultline_safety::RetryBudget;
use faultline_storage::{CreateAction, CreateDecision, Database, InsertActionOutcome};

/// Model tag recorded on decisions the coordinator itself writes.
const COORDINATOR_TAG: &str = "coordinator";

/// Why a reversal request was refused.
#[derive(Debug, Error)]
pub enum ReversalError {
    #[error("action not found")]
    NotFound,

    #[error("action is not reversible: {reason}")]
    NotReversible { reason: String },

    #[error("action has already been reversed")]
    AlreadyReversed,

    #[error("a later action has already started on this incident")]
    SupersededByLaterAction,

    #[error("another action is in flight for this incident")]
    ActionInFlight,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Selection policy, kept pure for testing.
///
/// `retry_allowed` folds the rule's retryable flag, the named policy's own
/// budget and the per-attempt check; the budgets come in as booleans so the
/// table reads like the one in the runbook.
pub fn select_action_kind(
    recommended: Recommendation,
    retry_allowed: bool,
    severity: Severity,
    workflow_budget_ok: bool,
    vendor_budget_ok: bool,
) -> ActionKind {
    let budgets_ok = workflow_budget_ok && vendor_budget_ok;

    if recommended == Recommendation::Retry
        && retry_allowed
        && budgets_ok
        && severity != Severity::Critical
    {
        return ActionKind::Retry;
    }
    if !budgets_ok || !retry_allowed || severity == Severity::Critical {
        return ActionKind::Escalate;
    }
    if recommended == Recommendation::Manual {
        return ActionKind::Manual;
    }
    ActionKind::Escalate
}

/// Escalation level for a severity.
pub fn escalation_level(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 3,
        Severity::High => 2,
        Severity::Low | Severity::Medium => 1,
    }
}

/// Channel set recorded for an escalation level. Effecting the channels is
/// the external dispatcher's job.
pub fn escalation_channels(level: u8) -> Vec<&'static str> {
    match level {
        1 => vec!["team_notification"],
        2 => vec!["team_notification", "oncall_page"],
        _ => vec!["team_notification", "oncall_page", "management_escalation"],
    }
}

/// Coordinates remediation actions for incidents.
pub struct Coordinator {
    db: Database,
    budget: Arc<RetryBudget>,
    rules: Arc<RulesTable>,
    policies: Arc<RetryPolicies>,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    pub fn new(
        db: Database,
        budget: Arc<RetryBudget>,
        rules: Arc<RulesTable>,
        policies: Arc<RetryPolicies>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            budget,
            rules,
            policies,
            clock,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Select and persist the next action for an incident, or record a
    /// suppression note when single-flight blocks it.
    pub async fn on_decision(
        &self,
        incident: &Incident,
        decision: &Decision,
    ) -> Result<Option<Action>> {
        if let Some(in_flight) = self.db.find_in_flight_action(incident.id).await? {
            self.record_suppression(
                incident.id,
                decision.recommended,
                format!(
                    "action {} already in flight; recommendation {} suppressed",
                    in_flight.id, decision.recommended
                ),
            )
            .await?;
            return Ok(None);
        }

        let error_code = incident_error_code(incident);
        let vendor = incident_vendor(incident);

        let rule = self.rules.lookup(&error_code);
        let policy = self.policies.get(&rule.retry_policy);
        let attempt = incident.retry_count + 1;

        let retry_allowed =
            rule.retryable && policy.retryable && policy.permits_attempt(attempt as u32);
        let workflow_budget_ok = self.budget.permit_workflow_retry(incident);
        let vendor_budget_ok = match vendor.as_deref() {
            Some(v) => self.budget.permit_vendor_activity(v).await,
            None => true,
        };

        let kind = select_action_kind(
            decision.recommended,
            retry_allowed,
            incident.severity,
            workflow_budget_ok,
            vendor_budget_ok,
        );

        let now = self.clock.now();
        let input = match kind {
            ActionKind::Retry => {
                let delay = policy.delay_for_attempt(attempt as u32);
                CreateAction {
                    incident_id: incident.id,
                    kind,
                    parameters: json!({
                        "retry_policy": rule.retry_policy,
                        "error_code": error_code,
                        "delay_ms": delay.as_millis() as u64,
                    }),
                    reversible: true,
                    reversal_of: None,
                    scheduled_for: Some(
                        now + chrono::Duration::from_std(delay).unwrap_or_default(),
                    ),
                    attempt_number: attempt,
                }
            }
            ActionKind::Escalate => {
                let level = escalation_level(incident.severity);
                CreateAction {
                    incident_id: incident.id,
                    kind,
                    parameters: json!({
                        "level": level,
                        "channels": escalation_channels(level),
                        "reason": decision.reasoning,
                    }),
                    reversible: false,
                    reversal_of: None,
                    scheduled_for: Some(now),
                    attempt_number: 1,
                }
            }
            ActionKind::Manual | ActionKind::Reversal => CreateAction {
                incident_id: incident.id,
                kind: ActionKind::Manual,
                parameters: json!({
                    "reason": decision.reasoning,
                    "category": decision.category,
                }),
                reversible: false,
                reversal_of: None,
                scheduled_for: Some(now),
                attempt_number: 1,
            },
        };

        let row = match self.db.insert_action(input).await? {
            InsertActionOutcome::Inserted(row) => row,
            InsertActionOutcome::SingleFlightConflict => {
                // Raced another instance; the index is the arbiter.
                let blocker = self
                    .db
                    .find_in_flight_action(incident.id)
                    .await?
                    .map(|a| a.id)
                    .unwrap_or_default();
                self.record_suppression(
                    incident.id,
                    decision.recommended,
                    format!(
                        "action {blocker} won the single-flight race; recommendation {} suppressed",
                        decision.recommended
                    ),
                )
                .await?;
                return Ok(None);
            }
        };

        self.db
            .update_incident_status(incident.id, faultline_core::IncidentStatus::Actioned)
            .await?;

        info!(
            incident_id = %incident.id,
            action_id = %row.id,
            kind = %row.kind,
            scheduled_for = ?row.scheduled_for,
            "action created"
        );

        Ok(Some(row.into()))
    }

    /// Create a reversal for a previously succeeded reversible action.
    pub async fn reverse_action(&self, action_id: Uuid) -> Result<Action, ReversalError> {
        let row = self
            .db
            .get_action(action_id)
            .await?
            .ok_or(ReversalError::NotFound)?;
        let action: Action = row.into();

        if action.kind == ActionKind::Escalate {
            return Err(ReversalError::NotReversible {
                reason: "escalations are never reversible".to_string(),
            });
        }
        if !action.reversible {
            return Err(ReversalError::NotReversible {
                reason: "action was not created reversible".to_string(),
            });
        }
        if action.status != ActionStatus::Succeeded {
            return Err(ReversalError::NotReversible {
                reason: format!("action is {}, not succeeded", action.status),
            });
        }
        if self.db.find_reversal_of(action.id).await?.is_some() {
            return Err(ReversalError::AlreadyReversed);
        }
        if self
            .db
            .has_started_action_after(action.incident_id, action.created_at)
            .await?
        {
            return Err(ReversalError::SupersededByLaterAction);
        }

        let input = CreateAction {
            incident_id: action.incident_id,
            kind: ActionKind::Reversal,
            parameters: json!({
                "reverses": action.id,
                "original_kind": action.kind.to_string(),
            }),
            reversible: false,
            reversal_of: Some(action.id),
            scheduled_for: Some(self.clock.now()),
            attempt_number: 1,
        };

        match self.db.insert_action(input).await? {
            InsertActionOutcome::Inserted(row) => {
                info!(
                    action_id = %action.id,
                    reversal_id = %row.id,
                    "reversal created"
                );
                Ok(row.into())
            }
            InsertActionOutcome::SingleFlightConflict => Err(ReversalError::ActionInFlight),
        }
    }

    /// Audit note recorded when single-flight suppresses new work. Also
    /// called by the incident manager when an event folds into an incident
    /// whose action is still in flight.
    pub async fn record_suppression(
        &self,
        incident_id: Uuid,
        recommended: Recommendation,
        reasoning: String,
    ) -> Result<()> {
        warn!(incident_id = %incident_id, "single-flight suppressed a new action");
        self.db
            .insert_decision(CreateDecision {
                incident_id,
                kind: DecisionKind::Recommendation,
                category: "single_flight_suppression".to_string(),
                recommended,
                reasoning,
                confidence: 1.0,
                model_tag: COORDINATOR_TAG.to_string(),
            })
            .await?;
        Ok(())
    }
}

/// Map an in-flight action kind to the recommendation it is carrying out,
/// for suppression notes written from the fold path.
pub fn recommendation_for_kind(kind: ActionKind) -> Recommendation {
    match kind {
        ActionKind::Retry => Recommendation::Retry,
        ActionKind::Escalate => Recommendation::Escalate,
        ActionKind::Manual | ActionKind::Reversal => Recommendation::Manual,
    }
}

/// Error code the incident was created from, seeded into metadata by the
/// incident manager.
fn incident_error_code(incident: &Incident) -> String {
    incident
        .metadata
        .get("error_code")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Vendor named by the incident's events, if any.
fn incident_vendor(incident: &Incident) -> Option<String> {
    incident
        .metadata
        .get("vendor")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_when_everything_permits() {
        assert_eq!(
            select_action_kind(Recommendation::Retry, true, Severity::Medium, true, true),
            ActionKind::Retry
        );
    }

    #[test]
    fn escalate_when_workflow_budget_exhausted() {
        assert_eq!(
            select_action_kind(Recommendation::Retry, true, Severity::Medium, false, true),
            ActionKind::Escalate
        );
    }

    #[test]
    fn escalate_when_vendor_budget_exhausted() {
        assert_eq!(
            select_action_kind(Recommendation::Retry, true, Severity::Medium, true, false),
            ActionKind::Escalate
        );
    }

    #[test]
    fn escalate_when_not_retryable() {
        assert_eq!(
            select_action_kind(Recommendation::Retry, false, Severity::Low, true, true),
            ActionKind::Escalate
        );
    }

    #[test]
    fn escalate_on_critical_severity_even_if_retry_recommended() {
        assert_eq!(
            select_action_kind(Recommendation::Retry, true, Severity::Critical, true, true),
            ActionKind::Escalate
        );
    }

    #[test]
    fn manual_when_human_review_recommended() {
        assert_eq!(
            select_action_kind(Recommendation::Manual, true, Severity::High, true, true),
            ActionKind::Manual
        );
    }

    #[test]
    fn manual_recommendation_defers_to_critical_escalation() {
        assert_eq!(
            select_action_kind(Recommendation::Manual, true, Severity::Critical, true, true),
            ActionKind::Escalate
        );
    }

    #[test]
    fn escalate_recommendation_escalates() {
        assert_eq!(
            select_action_kind(Recommendation::Escalate, true, Severity::Medium, true, true),
            ActionKind::Escalate
        );
    }

    #[test]
    fn escalation_levels_by_severity() {
        assert_eq!(escalation_level(Severity::Low), 1);
        assert_eq!(escalation_level(Severity::Medium), 1);
        assert_eq!(escalation_level(Severity::High), 2);
        assert_eq!(escalation_level(Severity::Critical), 3);
    }

    #[test]
    fn escalation_channels_widen_with_level() {
        assert_eq!(escalation_channels(1), vec!["team_notification"]);
        assert!(escalation_channels(2).contains(&"oncall_page"));
        assert!(escalation_channels(3).contains(&"management_escalation"));
    }
}
