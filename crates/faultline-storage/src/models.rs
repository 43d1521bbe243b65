// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use faultline_core::{
    Action, ActionKind, ActionStatus, BreakerState, Decision, DecisionKind, Event, Incident,
    IncidentStatus, KillSwitch, Recommendation, Severity, Tenant, Vendor, Workflow,
};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Tenant / workflow models
// ============================================

/// Tenant row from database
#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Tenant {
            id: row.id,
            name: row.name,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Input for creating a tenant
#[derive(Debug, Clone)]
pub struct CreateTenant {
    pub name: String,
    pub active: bool,
}

/// Workflow row from database
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkflowRow> for Workflow {
    fn from(row: WorkflowRow) -> Self {
        Workflow {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Input for creating a workflow
#[derive(Debug, Clone)]
pub struct CreateWorkflow {
    pub tenant_id: Uuid,
    pub name: String,
    pub active: bool,
}

// ============================================
// Kill switch models
// ============================================

/// Kill switch row from database
#[derive(Debug, Clone, FromRow)]
pub struct KillSwitchRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub active: bool,
    pub reason: String,
    pub activated_by: String,
    pub activated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl From<KillSwitchRow> for KillSwitch {
    fn from(row: KillSwitchRow) -> Self {
        KillSwitch {
            id: row.id,
            tenant_id: row.tenant_id,
            workflow_id: row.workflow_id,
            active: row.active,
            reason: row.reason,
            activated_by: row.activated_by,
            activated_at: row.activated_at,
            deactivated_at: row.deactivated_at,
        }
    }
}

/// Input for engaging a kill switch
#[derive(Debug, Clone)]
pub struct CreateKillSwitch {
    pub tenant_id: Uuid,
    /// Tenant-wide when `None`
    pub workflow_id: Option<Uuid>,
    pub reason: String,
    pub activated_by: String,
}

// ============================================
// Vendor models
// ============================================

/// Vendor row from database
#[derive(Debug, Clone, FromRow)]
pub struct VendorRow {
    pub id: Uuid,
    pub name: String,
    pub breaker_state: String,
    pub breaker_failure_count: i32,
    pub breaker_opened_at: Option<DateTime<Utc>>,
    pub rate_limit_per_minute: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<VendorRow> for Vendor {
    fn from(row: VendorRow) -> Self {
        Vendor {
            id: row.id,
            name: row.name,
            breaker_state: row.breaker_state.parse().unwrap_or(BreakerState::Closed),
            breaker_failure_count: row.breaker_failure_count,
            breaker_opened_at: row.breaker_opened_at,
            rate_limit_per_minute: row.rate_limit_per_minute,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Input for creating a vendor
#[derive(Debug, Clone)]
pub struct CreateVendor {
    pub name: String,
    pub rate_limit_per_minute: i32,
}

// ============================================
// Event models (append-only)
// ============================================

/// Event row from database. Never updated after insert.
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub correlation_id: String,
    pub vendor: Option<String>,
    pub schema_version: String,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            tenant_id: row.tenant_id,
            workflow_id: row.workflow_id,
            event_type: row.event_type,
            payload: row.payload,
            idempotency_key: row.idempotency_key,
            occurred_at: row.occurred_at,
            received_at: row.received_at,
            correlation_id: row.correlation_id,
            vendor: row.vendor,
            schema_version: row.schema_version,
        }
    }
}

/// Input for persisting an event
#[derive(Debug, Clone)]
pub struct CreateEvent {
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: String,
    pub vendor: Option<String>,
    pub schema_version: String,
}

// ============================================
// Incident models
// ============================================

/// Incident row from database
#[derive(Debug, Clone, FromRow)]
pub struct IncidentRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub signature: String,
    pub title: String,
    pub status: String,
    pub severity: String,
    pub event_count: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub retry_count: i32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<IncidentRow> for Incident {
    fn from(row: IncidentRow) -> Self {
        Incident {
            id: row.id,
            tenant_id: row.tenant_id,
            workflow_id: row.workflow_id,
            signature: row.signature,
            title: row.title,
            status: row.status.parse().unwrap_or(IncidentStatus::New),
            severity: row.severity.parse().unwrap_or(Severity::Medium),
            event_count: row.event_count,
            first_seen_at: row.first_seen_at,
            last_seen_at: row.last_seen_at,
            retry_count: row.retry_count,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Input for creating an incident from its first event
#[derive(Debug, Clone)]
pub struct CreateIncident {
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub signature: String,
    pub title: String,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
    /// Operational metadata seeded at creation (error_code, vendor).
    pub metadata: serde_json::Value,
}

// ============================================
// Decision models (immutable)
// ============================================

/// Decision row from database. Never updated after insert.
#[derive(Debug, Clone, FromRow)]
pub struct DecisionRow {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub kind: String,
    pub category: String,
    pub recommended: String,
    pub reasoning: String,
    pub confidence: f64,
    pub model_tag: String,
    pub created_at: DateTime<Utc>,
}

impl From<DecisionRow> for Decision {
    fn from(row: DecisionRow) -> Self {
        Decision {
            id: row.id,
            incident_id: row.incident_id,
            kind: row.kind.parse().unwrap_or(DecisionKind::Classification),
            category: row.category,
            recommended: row.recommended.parse().unwrap_or(Recommendation::Escalate),
            reasoning: row.reasoning,
            confidence: row.confidence,
            model_tag: row.model_tag,
            created_at: row.created_at,
        }
    }
}

/// Input for recording a decision
#[derive(Debug, Clone)]
pub struct CreateDecision {
    pub incident_id: Uuid,
    pub kind: DecisionKind,
    pub category: String,
    pub recommended: Recommendation,
    pub reasoning: String,
    pub confidence: f64,
    pub model_tag: String,
}

// ============================================
// Action models (state machine)
// ============================================

/// Action row from database
#[derive(Debug, Clone, FromRow)]
pub struct ActionRow {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub kind: String,
    pub status: String,
    pub parameters: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub reversible: bool,
    pub reversal_of: Option<Uuid>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub attempt_number: i32,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<ActionRow> for Action {
    fn from(row: ActionRow) -> Self {
        Action {
            id: row.id,
            incident_id: row.incident_id,
            kind: row.kind.parse().unwrap_or(ActionKind::Manual),
            status: row.status.parse().unwrap_or(ActionStatus::Pending),
            parameters: row.parameters,
            result: row.result,
            reversible: row.reversible,
            reversal_of: row.reversal_of,
            scheduled_for: row.scheduled_for,
            attempt_number: row.attempt_number,
            created_at: row.created_at,
            completed_at: row.completed_at,
        }
    }
}

/// Input for creating an action
#[derive(Debug, Clone)]
pub struct CreateAction {
    pub incident_id: Uuid,
    pub kind: ActionKind,
    pub parameters: serde_json::Value,
    pub reversible: bool,
    pub reversal_of: Option<Uuid>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub attempt_number: i32,
}
