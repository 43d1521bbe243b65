// Retry-budget enforcer
//
// Two budgets bound automated remediation: a per-(tenant, workflow) retry
// budget carried on the incident row, and a rolling-hour vendor failure
// budget in shared state. Exceeding either forces escalation rather than
// retry. Budget exhaustion never surfaces to the event caller; only the
// action coordinator observes it.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use faultline_cache::SharedState;
use faultline_core::{Clock, GlobalLimits, Incident};

use crate::DegradedFlag;

const VENDOR_BUDGET_WINDOW: Duration = Duration::from_secs(3600);

fn vendor_budget_key(vendor: &str) -> String {
    format!("budget:vendor:{vendor}")
}

/// Bounded allowance of automated retries.
pub struct RetryBudget {
    state: Arc<dyn SharedState>,
    clock: Arc<dyn Clock>,
    limits: GlobalLimits,
    degraded: DegradedFlag,
}

impl RetryBudget {
    pub fn new(
        state: Arc<dyn SharedState>,
        clock: Arc<dyn Clock>,
        limits: GlobalLimits,
        degraded: DegradedFlag,
    ) -> Self {
        Self {
            state,
            clock,
            limits,
            degraded,
        }
    }

    pub fn limits(&self) -> &GlobalLimits {
        &self.limits
    }

    /// True iff the incident has workflow retry budget left: the B_w-th
    /// retry is permitted, the (B_w+1)-th is not.
    pub fn permit_workflow_retry(&self, incident: &Incident) -> bool {
        (incident.retry_count as u32) < self.limits.max_retries_per_workflow
    }

    /// True iff vendor failures in the trailing hour are under the vendor
    /// budget. Cache loss fails closed here - this budget protects the
    /// vendor, so an unknown count means no more automated activity.
    pub async fn permit_vendor_activity(&self, vendor: &str) -> bool {
        let now = self.clock.now();
        match self
            .state
            .window_count(&vendor_budget_key(vendor), now, VENDOR_BUDGET_WINDOW)
            .await
        {
            Ok(count) => {
                self.degraded.clear();
                count < self.limits.max_retries_per_vendor_per_hour as u64
            }
            Err(e) => {
                self.degraded.set();
                warn!(vendor, error = %e, "shared state unavailable, vendor budget failing closed");
                false
            }
        }
    }

    /// Charge one vendor failure against the trailing-hour budget.
    pub async fn record_vendor_failure(&self, vendor: &str) {
        let now = self.clock.now();
        if let Err(e) = self
            .state
            .window_record(&vendor_budget_key(vendor), now, VENDOR_BUDGET_WINDOW)
            .await
        {
            self.degraded.set();
            warn!(vendor, error = %e, "failed to record vendor failure against budget");
        }
    }
}
