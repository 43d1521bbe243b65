// Incident manager
//
// Folds failure events into incidents keyed by fingerprint. Creation and
// severity upgrades both trigger analysis: classify, record the decision,
// hand off to the action coordinator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, error, warn};

use faultline_coordinator::Coordinator;
use faultline_core::{
    AppConfig, Classifier, Event, Fingerprinter, Incident, IncidentStatus, RulesTable,
};
use faultline_safety::{CircuitBreaker, RetryBudget};
use faultline_storage::{CreateIncident, Database};

use crate::classifier::classify_with_timeout;
use crate::decisions::DecisionRecorder;

/// One-shot metadata flags backing exactly-once severity upgrades.
const COUNT_UPGRADE_FLAG: &str = "count_severity_upgraded";
const AGE_UPGRADE_FLAG: &str = "age_severity_upgraded";

/// Whether an event represents a failure.
///
/// The minimal documented rule: type suffix `.failed`, type containing
/// `.error`, or a non-empty `error_code` in the payload. Centralized so
/// production data can adjust it in one place.
pub fn is_failure_event(event: &Event) -> bool {
    event.event_type.ends_with(".failed")
        || event.event_type.contains(".error")
        || event.error_code().is_some()
}

/// Incident manager tuning.
#[derive(Debug, Clone)]
pub struct IncidentManagerConfig {
    /// `event_count` above which severity is upgraded once.
    pub count_escalation_threshold: i64,
    /// Incident age above which severity is upgraded once.
    pub age_escalation_threshold: Duration,
    /// How many correlated events the classifier sees.
    pub recent_events_limit: i64,
    /// Classifier deadline; beyond it the escalate fallback is recorded.
    pub classifier_timeout: Duration,
}

impl Default for IncidentManagerConfig {
    fn default() -> Self {
        Self {
            count_escalation_threshold: 100,
            age_escalation_threshold: Duration::from_secs(3600),
            recent_events_limit: 10,
            classifier_timeout: Duration::from_secs(10),
        }
    }
}

/// Creates and updates incidents from events and drives the analysis path.
pub struct IncidentManager {
    db: Database,
    fingerprinter: Fingerprinter,
    rules: Arc<RulesTable>,
    app_config: Arc<AppConfig>,
    breaker: Arc<CircuitBreaker>,
    budget: Arc<RetryBudget>,
    classifier: Arc<dyn Classifier>,
    recorder: DecisionRecorder,
    coordinator: Arc<Coordinator>,
    config: IncidentManagerConfig,
}

impl IncidentManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        rules: Arc<RulesTable>,
        app_config: Arc<AppConfig>,
        breaker: Arc<CircuitBreaker>,
        budget: Arc<RetryBudget>,
        classifier: Arc<dyn Classifier>,
        coordinator: Arc<Coordinator>,
        config: IncidentManagerConfig,
    ) -> Self {
        let recorder = DecisionRecorder::new(db.clone());
        Self {
            db,
            fingerprinter: Fingerprinter::new(),
            rules,
            app_config,
            breaker,
            budget,
            classifier,
            recorder,
            coordinator,
            config,
        }
    }

    /// The substitution set fingerprints are derived with, for the audit
    /// record.
    pub fn fingerprint_audit(&self) -> Vec<String> {
        self.fingerprinter.audit_description()
    }

    /// Process one persisted event. Returns the incident it folded into, or
    /// None when the event is not a failure.
    pub async fn on_event(&self, event: Event) -> Result<Option<Incident>> {
        let failure = is_failure_event(&event);

        // Vendor health accounting happens for every event naming a vendor:
        // failures feed the breaker and the hourly budget, successes resolve
        // half-open probes.
        if let Some(vendor) = event.vendor.clone() {
            let breaker_config = self.app_config.vendor(&vendor).breaker;
            if failure {
                self.breaker.record_failure(&vendor, &breaker_config).await;
                self.budget.record_vendor_failure(&vendor).await;
            } else {
                self.breaker.record_success(&vendor, &breaker_config).await;
            }
        }

        if !failure {
            return Ok(None);
        }

        let normalized_code = self
            .fingerprinter
            .normalize(event.error_code().unwrap_or("unknown"));
        let signature =
            self.fingerprinter
                .fingerprint(&event.event_type, event.error_code(), event.workflow_id);
        let rule = self.rules.lookup(&normalized_code);

        let mut metadata = json!({ "error_code": normalized_code });
        if let Some(vendor) = &event.vendor {
            metadata["vendor"] = json!(vendor);
        }

        let (row, created) = self
            .db
            .apply_event_to_incident(
                CreateIncident {
                    tenant_id: event.tenant_id,
                    workflow_id: event.workflow_id,
                    signature: signature.clone(),
                    title: event.event_type.clone(),
                    severity: rule.severity,
                    occurred_at: event.occurred_at,
                    metadata,
                },
                event.id,
            )
            .await?;
        let incident = Incident::from(row);

        debug!(
            incident_id = %incident.id,
            signature = %signature,
            event_count = incident.event_count,
            created,
            "event folded into incident"
        );

        if created {
            self.analyze(&incident).await;
            return Ok(Some(incident));
        }

        if let Some(upgraded) = self.maybe_upgrade_severity(&incident).await? {
            self.analyze(&upgraded).await;
            return Ok(Some(upgraded));
        }

        // The incident already has remediation in flight: the fold stands,
        // but no new action may be created. Record that in the audit trail.
        if let Some(in_flight) = self.db.find_in_flight_action(incident.id).await? {
            let kind = in_flight
                .kind
                .parse()
                .unwrap_or(faultline_core::ActionKind::Manual);
            self.coordinator
                .record_suppression(
                    incident.id,
                    faultline_coordinator::recommendation_for_kind(kind),
                    format!(
                        "event {} folded while action {} is in flight; no new action created",
                        event.id, in_flight.id
                    ),
                )
                .await?;
        }

        Ok(Some(incident))
    }

    /// Upgrade severity one level on the first crossing of the count or age
    /// threshold. Each flag is claimed atomically, so a storm of concurrent
    /// events produces exactly one upgrade per threshold.
    async fn maybe_upgrade_severity(&self, incident: &Incident) -> Result<Option<Incident>> {
        let count_crossed = incident.event_count > self.config.count_escalation_threshold;
        let age = (incident.last_seen_at - incident.first_seen_at)
            .to_std()
            .unwrap_or_default();
        let age_crossed = age > self.config.age_escalation_threshold;

        let claimed = if count_crossed
            && self
                .db
                .claim_incident_flag(incident.id, COUNT_UPGRADE_FLAG)
                .await?
        {
            true
        } else {
            age_crossed
                && self
                    .db
                    .claim_incident_flag(incident.id, AGE_UPGRADE_FLAG)
                    .await?
        };

        if !claimed {
            return Ok(None);
        }

        let upgraded = incident.severity.escalated();
        if upgraded == incident.severity {
            return Ok(None);
        }

        let row = self
            .db
            .try_upgrade_severity(incident.id, incident.severity, upgraded)
            .await?;

        match row {
            Some(row) => {
                warn!(
                    incident_id = %incident.id,
                    from = %incident.severity,
                    to = %upgraded,
                    "incident severity upgraded"
                );
                Ok(Some(row.into()))
            }
            // Another instance already moved the severity; that upgrade
            // carried the crossing.
            None => Ok(None),
        }
    }

    /// Classify, record the decision, hand to the coordinator. Failures are
    /// logged and never propagate to ingestion.
    async fn analyze(&self, incident: &Incident) {
        let recent = match self
            .db
            .recent_events_for_incident(incident.id, self.config.recent_events_limit)
            .await
        {
            Ok(rows) => rows.into_iter().map(Event::from).collect::<Vec<_>>(),
            Err(e) => {
                error!(incident_id = %incident.id, error = %e, "failed to load recent events");
                Vec::new()
            }
        };

        let classification = classify_with_timeout(
            self.classifier.as_ref(),
            incident,
            &recent,
            self.config.classifier_timeout,
        )
        .await;

        if incident.status == IncidentStatus::New {
            if let Err(e) = self
                .db
                .update_incident_status(incident.id, IncidentStatus::Analyzing)
                .await
            {
                error!(incident_id = %incident.id, error = %e, "failed to mark incident analyzing");
            }
        }

        let decision = match self
            .recorder
            .record_classification(incident.id, classification)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                error!(incident_id = %incident.id, error = %e, "failed to record decision");
                return;
            }
        };

        if let Err(e) = self.coordinator.on_decision(incident, &decision).await {
            error!(incident_id = %incident.id, error = %e, "action coordination failed");
        }
    }
}
