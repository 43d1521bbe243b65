// Ingestion pipeline
//
// Processing order is the contract; a later step must not run once an
// earlier one rejects:
//
//   1. idempotency lookup        -> duplicate (success-shaped)
//   2. tenant gate               -> tenant_inactive | not_found
//   3. workflow + kill switch    -> not_found | workflow_disabled
//   4. rate limits               -> rate_limited (tenant, then tenant+vendor)
//   5. breaker gate (vendor)     -> breaker_open
//   6. persist                   -> unique violation maps to duplicate
//   7. dispatch detection        -> async; never fails ingestion

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{error, warn};
use uuid::Uuid;

use faultline_core::{
    AppConfig, Event, EventSubmission, IngestError, SubmissionOutcome, SubmissionStatus,
};
use faultline_safety::rate_limit::{tenant_key, tenant_vendor_key};
use faultline_safety::{CircuitBreaker, RateDecision, RateLimiter};
use faultline_storage::{CreateEvent, Database, InsertEventOutcome};

use crate::incidents::IncidentManager;

/// Deadline for the persist step; elapsing surfaces a retryable failure and
/// leaves no partial row behind (the insert is a single statement).
const STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Validated, gated, durable event ingestion.
pub struct IngestionPipeline {
    db: Database,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    manager: Arc<IncidentManager>,
    app_config: Arc<AppConfig>,
}

impl IngestionPipeline {
    pub fn new(
        db: Database,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        manager: Arc<IncidentManager>,
        app_config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            limiter,
            breaker,
            manager,
            app_config,
        }
    }

    /// Submit one event. Returns the accepted/duplicate outcome or a typed
    /// rejection; duplicates must be treated as success by the caller.
    pub async fn submit(
        &self,
        submission: EventSubmission,
        correlation_id: Option<String>,
    ) -> Result<SubmissionOutcome, IngestError> {
        let correlation_id =
            correlation_id.unwrap_or_else(|| Uuid::now_v7().simple().to_string());

        submission.validate()?;

        // 1. Idempotency: a known key short-circuits every later gate.
        let existing = self
            .db
            .find_event_by_idempotency_key(submission.tenant_id, &submission.idempotency_key)
            .await
            .map_err(IngestError::TransientStore)?;
        if let Some(row) = existing {
            return Ok(SubmissionOutcome {
                event_id: row.id,
                status: SubmissionStatus::Duplicate,
                correlation_id,
            });
        }

        // 2. Tenant gate.
        let tenant = self
            .db
            .get_tenant(submission.tenant_id)
            .await
            .map_err(IngestError::TransientStore)?
            .ok_or(IngestError::TenantNotFound)?;
        if !tenant.active {
            return Err(IngestError::TenantInactive);
        }

        // 3. Workflow gate, including kill switches.
        let workflow = self
            .db
            .get_workflow(submission.tenant_id, submission.workflow_id)
            .await
            .map_err(IngestError::TransientStore)?
            .ok_or(IngestError::WorkflowNotFound)?;
        if !workflow.active {
            return Err(IngestError::workflow_disabled("workflow is inactive"));
        }
        if let Some(switch) = self
            .db
            .find_active_kill_switch(submission.tenant_id, submission.workflow_id)
            .await
            .map_err(IngestError::TransientStore)?
        {
            return Err(IngestError::workflow_disabled(format!(
                "kill switch engaged: {}",
                switch.reason
            )));
        }

        // 4. Rate limits: tenant key always, tenant+vendor when the payload
        // names a vendor.
        let tenant_limit = self.app_config.tenant_rate_limit.per_minute;
        if let RateDecision::Rejected { retry_after } = self
            .limiter
            .check_per_minute(&tenant_key(submission.tenant_id), tenant_limit)
            .await
        {
            return Err(IngestError::RateLimited {
                key: format!("tenant:{}", submission.tenant_id),
                retry_after,
            });
        }

        let vendor = submission.vendor().map(str::to_string);
        if let Some(vendor_name) = &vendor {
            let vendor_config = self.app_config.vendor(vendor_name);
            if let RateDecision::Rejected { retry_after } = self
                .limiter
                .check_per_minute(
                    &tenant_vendor_key(submission.tenant_id, vendor_name),
                    vendor_config.rate_limit.per_minute,
                )
                .await
            {
                return Err(IngestError::RateLimited {
                    key: format!("tenant:{}:vendor:{vendor_name}", submission.tenant_id),
                    retry_after,
                });
            }

            // 5. Breaker gate.
            if !self
                .breaker
                .check(vendor_name, &vendor_config.breaker)
                .await
                .is_allowed()
            {
                return Err(IngestError::BreakerOpen {
                    vendor: vendor_name.clone(),
                });
            }
        }

        // 6. Persist. The unique index is the final duplicate guard; a
        // collision here is step 1's outcome.
        let insert = tokio::time::timeout(
            STORE_TIMEOUT,
            self.db.insert_event(CreateEvent {
                tenant_id: submission.tenant_id,
                workflow_id: submission.workflow_id,
                event_type: submission.event_type.clone(),
                payload: submission.payload.clone(),
                idempotency_key: submission.idempotency_key.clone(),
                occurred_at: submission.occurred_at,
                correlation_id: correlation_id.clone(),
                vendor: vendor.clone(),
                schema_version: submission.schema_version.clone(),
            }),
        )
        .await
        .map_err(|_| IngestError::TransientStore(anyhow!("event insert timed out")))?
        .map_err(IngestError::TransientStore)?;

        let row = match insert {
            InsertEventOutcome::Inserted(row) => row,
            InsertEventOutcome::Duplicate(existing) => {
                return Ok(SubmissionOutcome {
                    event_id: existing.id,
                    status: SubmissionStatus::Duplicate,
                    correlation_id,
                });
            }
        };

        // Clock-skew deviations are recorded, not enforced.
        let skew_tolerance = chrono::Duration::from_std(self.app_config.clock_skew_tolerance)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        if row.occurred_at > row.received_at + skew_tolerance {
            warn!(
                correlation_id = %correlation_id,
                event_id = %row.id,
                occurred_at = %row.occurred_at,
                received_at = %row.received_at,
                "event occurred_at is ahead of received_at beyond tolerance"
            );
        }

        // 7. Dispatch detection after commit. Detection failures never fail
        // ingestion; recovery catches up from persisted events.
        let manager = self.manager.clone();
        let event: Event = row.clone().into();
        tokio::spawn(async move {
            if let Err(e) = manager.on_event(event).await {
                error!(error = %e, "incident detection failed");
            }
        });

        Ok(SubmissionOutcome {
            event_id: row.id,
            status: SubmissionStatus::Accepted,
            correlation_id,
        })
    }
}
