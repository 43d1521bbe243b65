// Tenant, workflow and kill-switch domain types
//
// All data in Faultline is tenant-scoped. A workflow belongs to a tenant and
// can be disabled independently of its `active` flag by a kill switch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// A tenant owning workflows, events and incidents.
/// Any write on behalf of an inactive tenant fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Tenant {
    /// Unique identifier for the tenant.
    pub id: Uuid,
    /// Display name of the tenant.
    pub name: String,
    /// Whether the tenant may submit events.
    pub active: bool,
    /// Timestamp when the tenant was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp when the tenant was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A tenant-scoped workflow whose failures are ingested.
/// A workflow may be kill-switched independently of `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Workflow {
    /// Unique identifier for the workflow.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Display name of the workflow.
    pub name: String,
    /// Whether the workflow accepts new events.
    pub active: bool,
    /// Timestamp when the workflow was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp when the workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Operator-controlled switch disabling ingestion for a workflow,
/// or tenant-wide when `workflow_id` is absent.
///
/// Kill switches are created by operators and deactivated explicitly;
/// deactivation keeps the row for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct KillSwitch {
    /// Unique identifier for the switch.
    pub id: Uuid,
    /// Tenant the switch applies to.
    pub tenant_id: Uuid,
    /// Workflow the switch applies to; tenant-wide when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    /// Whether the switch is currently engaged.
    pub active: bool,
    /// Operator-supplied reason, surfaced in rejections.
    pub reason: String,
    /// Identity of the operator who engaged the switch.
    pub activated_by: String,
    /// When the switch was engaged.
    pub activated_at: DateTime<Utc>,
    /// When the switch was released, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl KillSwitch {
    /// Whether this switch disables the given workflow.
    pub fn applies_to(&self, workflow_id: Uuid) -> bool {
        self.active && self.workflow_id.map_or(true, |w| w == workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch(workflow_id: Option<Uuid>, active: bool) -> KillSwitch {
        KillSwitch {
            id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            workflow_id,
            active,
            reason: "vendor incident".to_string(),
            activated_by: "ops@example.com".to_string(),
            activated_at: Utc::now(),
            deactivated_at: None,
        }
    }

    #[test]
    fn tenant_wide_switch_applies_to_any_workflow() {
        let s = switch(None, true);
        assert!(s.applies_to(Uuid::now_v7()));
    }

    #[test]
    fn workflow_switch_applies_only_to_its_workflow() {
        let wf = Uuid::now_v7();
        let s = switch(Some(wf), true);
        assert!(s.applies_to(wf));
        assert!(!s.applies_to(Uuid::now_v7()));
    }

    #[test]
    fn inactive_switch_applies_to_nothing() {
        let wf = Uuid::now_v7();
        let s = switch(Some(wf), false);
        assert!(!s.applies_to(wf));
    }
}
