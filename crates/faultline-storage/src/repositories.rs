// Repository layer for database operations
//
// The schema enforces the three load-bearing invariants; this layer maps
// constraint violations back to positive outcomes where the contract says so
// (duplicate events) or to typed conflicts (single-flight actions).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use faultline_core::{ActionStatus, BreakerState, IncidentStatus, Severity};

use crate::models::*;

/// Constraint backing idempotent ingest.
const EVENTS_IDEMPOTENCY_CONSTRAINT: &str = "events_tenant_id_idempotency_key_key";

/// Partial unique index backing the single-flight invariant.
const ACTIONS_SINGLE_FLIGHT_CONSTRAINT: &str = "actions_single_flight";

/// Outcome of an event insert.
#[derive(Debug, Clone)]
pub enum InsertEventOutcome {
    /// A new row was persisted.
    Inserted(EventRow),
    /// The idempotency key collided; here is the pre-existing row.
    Duplicate(EventRow),
}

/// Outcome of an action insert.
#[derive(Debug, Clone)]
pub enum InsertActionOutcome {
    Inserted(ActionRow),
    /// Another action already occupies the incident's single-flight slot.
    SingleFlightConflict,
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ============================================
    // Tenants
    // ============================================

    pub async fn create_tenant(&self, input: CreateTenant) -> Result<TenantRow> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            INSERT INTO tenants (id, name, active)
            VALUES ($1, $2, $3)
            RETURNING id, name, active, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.name)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_tenant(&self, id: Uuid) -> Result<Option<TenantRow>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, active, created_at, updated_at
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantRow>> {
        let rows = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, active, created_at, updated_at
            FROM tenants
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn set_tenant_active(&self, id: Uuid, active: bool) -> Result<Option<TenantRow>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            UPDATE tenants
            SET active = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, active, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Workflows
    // ============================================

    pub async fn create_workflow(&self, input: CreateWorkflow) -> Result<WorkflowRow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            INSERT INTO workflows (id, tenant_id, name, active)
            VALUES ($1, $2, $3, $4)
            RETURNING id, tenant_id, name, active, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Get a workflow scoped to its tenant; cross-tenant ids return None.
    pub async fn get_workflow(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<WorkflowRow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, tenant_id, name, active, created_at, updated_at
            FROM workflows
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_workflows(&self, tenant_id: Uuid) -> Result<Vec<WorkflowRow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, tenant_id, name, active, created_at, updated_at
            FROM workflows
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn set_workflow_active(&self, id: Uuid, active: bool) -> Result<Option<WorkflowRow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            UPDATE workflows
            SET active = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, tenant_id, name, active, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Kill switches
    // ============================================

    pub async fn engage_kill_switch(&self, input: CreateKillSwitch) -> Result<KillSwitchRow> {
        let row = sqlx::query_as::<_, KillSwitchRow>(
            r#"
            INSERT INTO kill_switches (id, tenant_id, workflow_id, active, reason, activated_by)
            VALUES ($1, $2, $3, TRUE, $4, $5)
            RETURNING id, tenant_id, workflow_id, active, reason, activated_by, activated_at, deactivated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.tenant_id)
        .bind(input.workflow_id)
        .bind(&input.reason)
        .bind(&input.activated_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn release_kill_switch(&self, id: Uuid) -> Result<Option<KillSwitchRow>> {
        let row = sqlx::query_as::<_, KillSwitchRow>(
            r#"
            UPDATE kill_switches
            SET active = FALSE, deactivated_at = NOW()
            WHERE id = $1 AND active
            RETURNING id, tenant_id, workflow_id, active, reason, activated_by, activated_at, deactivated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_kill_switches(&self, tenant_id: Uuid) -> Result<Vec<KillSwitchRow>> {
        let rows = sqlx::query_as::<_, KillSwitchRow>(
            r#"
            SELECT id, tenant_id, workflow_id, active, reason, activated_by, activated_at, deactivated_at
            FROM kill_switches
            WHERE tenant_id = $1
            ORDER BY activated_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// The active switch covering a workflow: workflow-specific or
    /// tenant-wide, whichever exists.
    pub async fn find_active_kill_switch(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
    ) -> Result<Option<KillSwitchRow>> {
        let row = sqlx::query_as::<_, KillSwitchRow>(
            r#"
            SELECT id, tenant_id, workflow_id, active, reason, activated_by, activated_at, deactivated_at
            FROM kill_switches
            WHERE tenant_id = $1
              AND active
              AND (workflow_id = $2 OR workflow_id IS NULL)
            ORDER BY workflow_id NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Vendors
    // ============================================

    pub async fn create_vendor(&self, input: CreateVendor) -> Result<VendorRow> {
        let row = sqlx::query_as::<_, VendorRow>(
            r#"
            INSERT INTO vendors (id, name, rate_limit_per_minute)
            VALUES ($1, $2, $3)
            RETURNING id, name, breaker_state, breaker_failure_count, breaker_opened_at,
                      rate_limit_per_minute, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.name)
        .bind(input.rate_limit_per_minute)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_vendor_by_name(&self, name: &str) -> Result<Option<VendorRow>> {
        let row = sqlx::query_as::<_, VendorRow>(
            r#"
            SELECT id, name, breaker_state, breaker_failure_count, breaker_opened_at,
                   rate_limit_per_minute, created_at, updated_at
            FROM vendors
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_vendors(&self) -> Result<Vec<VendorRow>> {
        let rows = sqlx::query_as::<_, VendorRow>(
            r#"
            SELECT id, name, breaker_state, breaker_failure_count, breaker_opened_at,
                   rate_limit_per_minute, created_at, updated_at
            FROM vendors
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Record the durable snapshot of a breaker transition.
    pub async fn update_vendor_breaker(
        &self,
        name: &str,
        state: BreakerState,
        failure_count: i32,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE vendors
            SET breaker_state = $2, breaker_failure_count = $3, breaker_opened_at = $4,
                updated_at = NOW()
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(state.to_string())
        .bind(failure_count)
        .bind(opened_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============================================
    // Events (append-only)
    // ============================================

    pub async fn find_event_by_idempotency_key(
        &self,
        tenant_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<EventRow>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, tenant_id, workflow_id, event_type, payload, idempotency_key,
                   occurred_at, received_at, correlation_id, vendor, schema_version
            FROM events
            WHERE tenant_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(tenant_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Insert an event. A unique-constraint collision is not an error: the
    /// pre-existing row is fetched and returned as `Duplicate`.
    pub async fn insert_event(&self, input: CreateEvent) -> Result<InsertEventOutcome> {
        let inserted = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO events (id, tenant_id, workflow_id, event_type, payload,
                                idempotency_key, occurred_at, correlation_id, vendor, schema_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, tenant_id, workflow_id, event_type, payload, idempotency_key,
                      occurred_at, received_at, correlation_id, vendor, schema_version
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.tenant_id)
        .bind(input.workflow_id)
        .bind(&input.event_type)
        .bind(&input.payload)
        .bind(&input.idempotency_key)
        .bind(input.occurred_at)
        .bind(&input.correlation_id)
        .bind(&input.vendor)
        .bind(&input.schema_version)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(InsertEventOutcome::Inserted(row)),
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some(EVENTS_IDEMPOTENCY_CONSTRAINT) =>
            {
                let existing = self
                    .find_event_by_idempotency_key(input.tenant_id, &input.idempotency_key)
                    .await?
                    .context("duplicate event row vanished after unique violation")?;
                Ok(InsertEventOutcome::Duplicate(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_event(&self, id: Uuid) -> Result<Option<EventRow>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, tenant_id, workflow_id, event_type, payload, idempotency_key,
                   occurred_at, received_at, correlation_id, vendor, schema_version
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Most recent correlated events for an incident, ordered by occurred_at
    /// (presentation order; storage order is insertion order).
    pub async fn recent_events_for_incident(
        &self,
        incident_id: Uuid,
        limit: i64,
    ) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT e.id, e.tenant_id, e.workflow_id, e.event_type, e.payload, e.idempotency_key,
                   e.occurred_at, e.received_at, e.correlation_id, e.vendor, e.schema_version
            FROM events e
            JOIN incident_events ie ON ie.event_id = e.id
            WHERE ie.incident_id = $1
            ORDER BY ie.occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(incident_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Incidents
    // ============================================

    /// Fold an event into its incident: atomically look up the open incident
    /// for the signature and increment it, or create a fresh one. Two
    /// concurrent events with the same signature cannot produce two
    /// incidents; the partial unique index is the tiebreaker and the loser
    /// of the race re-reads inside the same transaction.
    ///
    /// Returns the incident row and whether it was created by this call.
    pub async fn apply_event_to_incident(
        &self,
        input: CreateIncident,
        event_id: Uuid,
    ) -> Result<(IncidentRow, bool)> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, IncidentRow>(
            r#"
            SELECT id, tenant_id, workflow_id, signature, title, status, severity, event_count,
                   first_seen_at, last_seen_at, retry_count, metadata, created_at, updated_at
            FROM incidents
            WHERE tenant_id = $1 AND workflow_id = $2 AND signature = $3
              AND status NOT IN ('resolved', 'ignored')
            FOR UPDATE
            "#,
        )
        .bind(input.tenant_id)
        .bind(input.workflow_id)
        .bind(&input.signature)
        .fetch_optional(&mut *tx)
        .await?;

        let (row, created) = match existing {
            Some(open) => {
                let updated = Self::fold_event_tx(&mut tx, open.id, input.occurred_at).await?;
                (updated, false)
            }
            None => {
                let inserted = sqlx::query_as::<_, IncidentRow>(
                    r#"
                    INSERT INTO incidents (id, tenant_id, workflow_id, signature, title, status,
                                           severity, event_count, first_seen_at, last_seen_at, metadata)
                    VALUES ($1, $2, $3, $4, $5, 'new', $6, 1, $7, $7, $8)
                    ON CONFLICT (tenant_id, workflow_id, signature)
                        WHERE status NOT IN ('resolved', 'ignored')
                        DO NOTHING
                    RETURNING id, tenant_id, workflow_id, signature, title, status, severity,
                              event_count, first_seen_at, last_seen_at, retry_count, metadata,
                              created_at, updated_at
                    "#,
                )
                .bind(Uuid::now_v7())
                .bind(input.tenant_id)
                .bind(input.workflow_id)
                .bind(&input.signature)
                .bind(&input.title)
                .bind(input.severity.to_string())
                .bind(input.occurred_at)
                .bind(&input.metadata)
                .fetch_optional(&mut *tx)
                .await?;

                match inserted {
                    Some(fresh) => (fresh, true),
                    None => {
                        // Lost the create race; the winner's row is now
                        // visible and locked for us to fold into.
                        let open = sqlx::query_as::<_, IncidentRow>(
                            r#"
                            SELECT id, tenant_id, workflow_id, signature, title, status, severity,
                                   event_count, first_seen_at, last_seen_at, retry_count, metadata,
                                   created_at, updated_at
                            FROM incidents
                            WHERE tenant_id = $1 AND workflow_id = $2 AND signature = $3
                              AND status NOT IN ('resolved', 'ignored')
                            FOR UPDATE
                            "#,
                        )
                        .bind(input.tenant_id)
                        .bind(input.workflow_id)
                        .bind(&input.signature)
                        .fetch_one(&mut *tx)
                        .await?;

                        let updated =
                            Self::fold_event_tx(&mut tx, open.id, input.occurred_at).await?;
                        (updated, false)
                    }
                }
            }
        };

        sqlx::query(
            r#"
            INSERT INTO incident_events (incident_id, event_id, occurred_at)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(event_id)
        .bind(input.occurred_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((row, created))
    }

    async fn fold_event_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        incident_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<IncidentRow> {
        let row = sqlx::query_as::<_, IncidentRow>(
            r#"
            UPDATE incidents
            SET event_count = event_count + 1,
                first_seen_at = LEAST(first_seen_at, $2),
                last_seen_at = GREATEST(last_seen_at, $2),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, tenant_id, workflow_id, signature, title, status, severity, event_count,
                      first_seen_at, last_seen_at, retry_count, metadata, created_at, updated_at
            "#,
        )
        .bind(incident_id)
        .bind(occurred_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    pub async fn get_incident(&self, id: Uuid) -> Result<Option<IncidentRow>> {
        let row = sqlx::query_as::<_, IncidentRow>(
            r#"
            SELECT id, tenant_id, workflow_id, signature, title, status, severity, event_count,
                   first_seen_at, last_seen_at, retry_count, metadata, created_at, updated_at
            FROM incidents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_incidents(
        &self,
        tenant_id: Uuid,
        status: Option<IncidentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<IncidentRow>> {
        let rows = sqlx::query_as::<_, IncidentRow>(
            r#"
            SELECT id, tenant_id, workflow_id, signature, title, status, severity, event_count,
                   first_seen_at, last_seen_at, retry_count, metadata, created_at, updated_at
            FROM incidents
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY last_seen_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_incident_status(
        &self,
        id: Uuid,
        status: IncidentStatus,
    ) -> Result<Option<IncidentRow>> {
        let row = sqlx::query_as::<_, IncidentRow>(
            r#"
            UPDATE incidents
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, tenant_id, workflow_id, signature, title, status, severity, event_count,
                      first_seen_at, last_seen_at, retry_count, metadata, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Optimistic severity upgrade: only applies if the row still carries the
    /// severity the caller computed from. A lost race means another instance
    /// already upgraded, which is exactly once either way.
    pub async fn try_upgrade_severity(
        &self,
        id: Uuid,
        from: Severity,
        to: Severity,
    ) -> Result<Option<IncidentRow>> {
        let row = sqlx::query_as::<_, IncidentRow>(
            r#"
            UPDATE incidents
            SET severity = $3, updated_at = NOW()
            WHERE id = $1 AND severity = $2
            RETURNING id, tenant_id, workflow_id, signature, title, status, severity, event_count,
                      first_seen_at, last_seen_at, retry_count, metadata, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Atomically claim a one-shot metadata flag. Returns true for exactly
    /// one caller per (incident, flag); the severity-upgrade path uses this
    /// to fire once per threshold crossing regardless of racing instances.
    pub async fn claim_incident_flag(&self, id: Uuid, flag: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET metadata = metadata || jsonb_build_object($2::text, TRUE),
                updated_at = NOW()
            WHERE id = $1 AND NOT (metadata ? $2)
            "#,
        )
        .bind(id)
        .bind(flag)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Charge one failed remediation attempt against the workflow budget.
    /// Returns the post-increment count.
    pub async fn increment_incident_retry_count(&self, id: Uuid) -> Result<i32> {
        let (count,): (i32,) = sqlx::query_as(
            r#"
            UPDATE incidents
            SET retry_count = retry_count + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING retry_count
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // ============================================
    // Decisions (immutable)
    // ============================================

    pub async fn insert_decision(&self, input: CreateDecision) -> Result<DecisionRow> {
        let row = sqlx::query_as::<_, DecisionRow>(
            r#"
            INSERT INTO decisions (id, incident_id, kind, category, recommended, reasoning,
                                   confidence, model_tag)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, incident_id, kind, category, recommended, reasoning, confidence,
                      model_tag, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.incident_id)
        .bind(input.kind.to_string())
        .bind(&input.category)
        .bind(input.recommended.to_string())
        .bind(&input.reasoning)
        .bind(input.confidence)
        .bind(&input.model_tag)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_decisions_for_incident(&self, incident_id: Uuid) -> Result<Vec<DecisionRow>> {
        let rows = sqlx::query_as::<_, DecisionRow>(
            r#"
            SELECT id, incident_id, kind, category, recommended, reasoning, confidence,
                   model_tag, created_at
            FROM decisions
            WHERE incident_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Actions (state machine)
    // ============================================

    /// Insert an action. A single-flight collision is a typed outcome, not
    /// an error; the coordinator records a suppression note instead.
    pub async fn insert_action(&self, input: CreateAction) -> Result<InsertActionOutcome> {
        let inserted = sqlx::query_as::<_, ActionRow>(
            r#"
            INSERT INTO actions (id, incident_id, kind, status, parameters, reversible,
                                 reversal_of, scheduled_for, attempt_number)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8)
            RETURNING id, incident_id, kind, status, parameters, result, reversible, reversal_of,
                      scheduled_for, attempt_number, claimed_by, created_at, completed_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.incident_id)
        .bind(input.kind.to_string())
        .bind(&input.parameters)
        .bind(input.reversible)
        .bind(input.reversal_of)
        .bind(input.scheduled_for)
        .bind(input.attempt_number)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(InsertActionOutcome::Inserted(row)),
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some(ACTIONS_SINGLE_FLIGHT_CONSTRAINT) =>
            {
                Ok(InsertActionOutcome::SingleFlightConflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_action(&self, id: Uuid) -> Result<Option<ActionRow>> {
        let row = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT id, incident_id, kind, status, parameters, result, reversible, reversal_of,
                   scheduled_for, attempt_number, claimed_by, created_at, completed_at, updated_at
            FROM actions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_actions_for_incident(&self, incident_id: Uuid) -> Result<Vec<ActionRow>> {
        let rows = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT id, incident_id, kind, status, parameters, result, reversible, reversal_of,
                   scheduled_for, attempt_number, claimed_by, created_at, completed_at, updated_at
            FROM actions
            WHERE incident_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// The action currently occupying the incident's single-flight slot.
    pub async fn find_in_flight_action(&self, incident_id: Uuid) -> Result<Option<ActionRow>> {
        let row = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT id, incident_id, kind, status, parameters, result, reversible, reversal_of,
                   scheduled_for, attempt_number, claimed_by, created_at, completed_at, updated_at
            FROM actions
            WHERE incident_id = $1 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(incident_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Claim due pending actions with SKIP LOCKED so concurrent scheduler
    /// instances never double-claim. Claiming performs the
    /// pending -> in_progress transition atomically.
    pub async fn claim_due_actions(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        max_actions: i64,
    ) -> Result<Vec<ActionRow>> {
        let rows = sqlx::query_as::<_, ActionRow>(
            r#"
            WITH claimable AS (
                SELECT id
                FROM actions
                WHERE status = 'pending'
                  AND (scheduled_for IS NULL OR scheduled_for <= $2)
                ORDER BY scheduled_for NULLS FIRST, created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE actions a
            SET status = 'in_progress',
                claimed_by = $1,
                updated_at = NOW()
            FROM claimable c
            WHERE a.id = c.id
            RETURNING a.id, a.incident_id, a.kind, a.status, a.parameters, a.result, a.reversible,
                      a.reversal_of, a.scheduled_for, a.attempt_number, a.claimed_by, a.created_at,
                      a.completed_at, a.updated_at
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(max_actions)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Optimistic state transition: applies only if the row still carries
    /// `from`. Returns None when the precondition no longer holds, which the
    /// coordinator treats as an invariant breach by whoever moved it.
    pub async fn transition_action(
        &self,
        id: Uuid,
        from: ActionStatus,
        to: ActionStatus,
        result: Option<serde_json::Value>,
    ) -> Result<Option<ActionRow>> {
        let completed = to.is_terminal();
        let row = sqlx::query_as::<_, ActionRow>(
            r#"
            UPDATE actions
            SET status = $3,
                result = COALESCE($4, result),
                completed_at = CASE WHEN $5 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING id, incident_id, kind, status, parameters, result, reversible, reversal_of,
                      scheduled_for, attempt_number, claimed_by, created_at, completed_at, updated_at
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(result)
        .bind(completed)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Park an action for operator review after an invariant breach.
    pub async fn mark_action_invariant_violation(
        &self,
        id: Uuid,
        note: &str,
    ) -> Result<Option<ActionRow>> {
        let row = sqlx::query_as::<_, ActionRow>(
            r#"
            UPDATE actions
            SET status = 'invariant_violation',
                result = jsonb_build_object('invariant_violation', $2::text),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'in_progress')
            RETURNING id, incident_id, kind, status, parameters, result, reversible, reversal_of,
                      scheduled_for, attempt_number, claimed_by, created_at, completed_at, updated_at
            "#,
        )
        .bind(id)
        .bind(note)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Whether a later action on the incident has reached in_progress or
    /// beyond; such an action makes earlier successes irreversible.
    pub async fn has_started_action_after(
        &self,
        incident_id: Uuid,
        after: DateTime<Utc>,
    ) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM actions
                WHERE incident_id = $1
                  AND created_at > $2
                  AND status <> 'pending'
            )
            "#,
        )
        .bind(incident_id)
        .bind(after)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Existing reversal of an action, if one was already created.
    pub async fn find_reversal_of(&self, action_id: Uuid) -> Result<Option<ActionRow>> {
        let row = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT id, incident_id, kind, status, parameters, result, reversible, reversal_of,
                   scheduled_for, attempt_number, claimed_by, created_at, completed_at, updated_at
            FROM actions
            WHERE reversal_of = $1
            LIMIT 1
            "#,
        )
        .bind(action_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
