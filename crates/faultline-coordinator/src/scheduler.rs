// Background action scheduler
//
// A long-lived poller: claims due pending actions (the claim itself performs
// the pending -> in_progress transition under SKIP LOCKED), executes them,
// and records the terminal transition. Failed retries are charged against
// the budgets and trigger re-selection, which may now pick escalate.
// Cancellation is checked between actions, never mid-action.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use faultline_core::{Action, ActionKind, ActionStatus, Clock, DecisionKind, Incident, IncidentStatus};
use faultline_safety::RetryBudget;
use faultline_storage::{ActionRow, Database};

use crate::coordinator::Coordinator;
use crate::executor::ActionExecutor;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Identifies this instance in `claimed_by`.
    pub worker_id: String,
    /// Base poll interval; bounded at or below one second.
    pub poll_interval: Duration,
    /// Fractional jitter applied per poll to avoid stampede across
    /// instances.
    pub poll_jitter: f64,
    /// Maximum actions claimed per poll.
    pub batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("scheduler-{}", Uuid::now_v7()),
            poll_interval: Duration::from_millis(500),
            poll_jitter: 0.2,
            batch_size: 10,
        }
    }
}

impl SchedulerConfig {
    /// Poll interval with jitter applied.
    pub fn jittered_interval(&self) -> Duration {
        if self.poll_jitter <= 0.0 {
            return self.poll_interval;
        }
        let mut rng = rand::thread_rng();
        let factor = 1.0 + rng.gen_range(-self.poll_jitter..=self.poll_jitter);
        Duration::from_secs_f64((self.poll_interval.as_secs_f64() * factor).max(0.0))
    }
}

/// Long-lived worker driving the action state machine.
pub struct ActionScheduler {
    db: Database,
    coordinator: Arc<Coordinator>,
    executor: Arc<dyn ActionExecutor>,
    budget: Arc<RetryBudget>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ActionScheduler {
    pub fn new(
        db: Database,
        coordinator: Arc<Coordinator>,
        executor: Arc<dyn ActionExecutor>,
        budget: Arc<RetryBudget>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            db,
            coordinator,
            executor,
            budget,
            clock,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Signal the scheduler to stop after the current action.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run until shutdown, polling for due actions.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = %self.config.worker_id, "action scheduler starting");
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("action scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.jittered_interval()) => {
                    match self.tick().await {
                        Ok(0) => {}
                        Ok(n) => debug!(claimed = n, "processed due actions"),
                        Err(e) => {
                            error!(error = %e, "scheduler tick failed");
                            // Brief pause before retry
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Claim and process one batch of due actions. Public so tests and the
    /// in-process runner can drive the scheduler without the timer.
    pub async fn tick(&self) -> Result<usize> {
        let now = self.clock.now();
        let claimed = self
            .db
            .claim_due_actions(&self.config.worker_id, now, self.config.batch_size)
            .await?;
        let count = claimed.len();

        for row in claimed {
            if *self.shutdown_rx.borrow() {
                warn!("shutdown requested, leaving remaining claims to timeout recovery");
                break;
            }
            self.process(row).await;
        }

        Ok(count)
    }

    /// Drive one claimed (in_progress) action to a terminal state. Errors
    /// are recorded on the action and the audit trail; they never propagate
    /// to a caller.
    async fn process(&self, row: ActionRow) {
        let action: Action = row.into();

        let incident = match self.db.get_incident(action.incident_id).await {
            Ok(Some(row)) => Incident::from(row),
            Ok(None) => {
                error!(action_id = %action.id, "incident vanished under action");
                let _ = self
                    .db
                    .mark_action_invariant_violation(action.id, "incident row missing")
                    .await;
                return;
            }
            Err(e) => {
                error!(action_id = %action.id, error = %e, "failed to load incident");
                return;
            }
        };

        match self.executor.execute(&action, &incident).await {
            Ok(result) => self.complete(&action, &incident, result).await,
            Err(e) => self.fail(&action, &incident, e.message).await,
        }
    }

    async fn complete(&self, action: &Action, incident: &Incident, result: serde_json::Value) {
        match self
            .db
            .transition_action(
                action.id,
                ActionStatus::InProgress,
                ActionStatus::Succeeded,
                Some(result),
            )
            .await
        {
            Ok(Some(_)) => {
                info!(action_id = %action.id, kind = %action.kind, "action succeeded");
                // A completed retry or reversal concludes the incident;
                // escalations and manual actions leave it with the humans.
                if matches!(action.kind, ActionKind::Retry | ActionKind::Reversal) {
                    if let Err(e) = self
                        .db
                        .update_incident_status(incident.id, IncidentStatus::Resolved)
                        .await
                    {
                        warn!(incident_id = %incident.id, error = %e, "failed to resolve incident");
                    }
                }
            }
            Ok(None) => self.note_stolen_transition(action.id, "succeeded").await,
            Err(e) => error!(action_id = %action.id, error = %e, "failed to record success"),
        }
    }

    async fn fail(&self, action: &Action, incident: &Incident, message: String) {
        warn!(action_id = %action.id, kind = %action.kind, error = %message, "action failed");

        let transitioned = self
            .db
            .transition_action(
                action.id,
                ActionStatus::InProgress,
                ActionStatus::Failed,
                Some(json!({ "error": message })),
            )
            .await;

        match transitioned {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.note_stolen_transition(action.id, "failed").await;
                return;
            }
            Err(e) => {
                error!(action_id = %action.id, error = %e, "failed to record failure");
                return;
            }
        }

        match action.kind {
            ActionKind::Retry => self.account_failed_retry(incident).await,
            ActionKind::Escalate => {
                // Escalation failures are logged and terminal; the
                // coordinator does not auto-retry escalations.
                error!(
                    incident_id = %incident.id,
                    action_id = %action.id,
                    "escalation dispatch failed; requires operator attention"
                );
            }
            ActionKind::Manual | ActionKind::Reversal => {}
        }
    }

    /// Charge the failed retry against the budgets and re-select, which may
    /// now pick escalate.
    async fn account_failed_retry(&self, incident: &Incident) {
        if let Err(e) = self.db.increment_incident_retry_count(incident.id).await {
            error!(incident_id = %incident.id, error = %e, "failed to charge retry budget");
            return;
        }

        if let Some(vendor) = incident
            .metadata
            .get("vendor")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            self.budget.record_vendor_failure(vendor).await;
        }

        // Re-selection works from the refreshed incident and the most
        // recent classification.
        let refreshed = match self.db.get_incident(incident.id).await {
            Ok(Some(row)) => Incident::from(row),
            _ => return,
        };

        let decision = match self.db.list_decisions_for_incident(incident.id).await {
            Ok(decisions) => decisions
                .into_iter()
                .map(faultline_core::Decision::from)
                .find(|d| d.kind == DecisionKind::Classification),
            Err(e) => {
                error!(incident_id = %incident.id, error = %e, "failed to load decisions");
                return;
            }
        };

        if let Some(decision) = decision {
            if let Err(e) = self.coordinator.on_decision(&refreshed, &decision).await {
                error!(incident_id = %incident.id, error = %e, "re-selection failed");
            }
        }
    }

    /// Someone else moved the row while we held the claim: an invariant
    /// breach. Park it for operator review and keep serving.
    async fn note_stolen_transition(&self, action_id: Uuid, attempted: &str) {
        error!(action_id = %action_id, attempted, "action moved outside the scheduler's claim");
        let _ = self
            .db
            .mark_action_invariant_violation(action_id, "transition raced outside claim")
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_interval_stays_within_bounds() {
        let config = SchedulerConfig {
            poll_interval: Duration::from_millis(1000),
            poll_jitter: 0.2,
            ..Default::default()
        };

        for _ in 0..100 {
            let interval = config.jittered_interval().as_secs_f64();
            assert!((0.8..=1.2).contains(&interval), "{interval} out of bounds");
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let config = SchedulerConfig {
            poll_interval: Duration::from_millis(250),
            poll_jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(config.jittered_interval(), Duration::from_millis(250));
    }

    #[test]
    fn default_poll_interval_is_bounded_by_a_second() {
        let config = SchedulerConfig::default();
        assert!(config.poll_interval <= Duration::from_secs(1));
    }
}
