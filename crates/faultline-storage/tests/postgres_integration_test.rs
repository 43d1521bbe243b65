//! Integration tests for the Postgres repositories
//!
//! Run with: cargo test -p faultline-storage --test postgres_integration_test
//!
//! Requirements: PostgreSQL reachable via DATABASE_URL; migrations are
//! applied on connect. Tests skip silently when DATABASE_URL is not set.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use faultline_core::{ActionKind, ActionStatus, Severity};
use faultline_storage::{
    CreateAction, CreateEvent, CreateIncident, CreateKillSwitch, CreateTenant, CreateWorkflow,
    Database, InsertActionOutcome, InsertEventOutcome,
};

async fn test_db() -> Option<Database> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    let db = Database::from_url(&database_url)
        .await
        .expect("failed to connect to postgres");
    db.migrate().await.expect("failed to run migrations");
    Some(db)
}

async fn seed_tenant_workflow(db: &Database) -> (Uuid, Uuid) {
    let tenant = db
        .create_tenant(CreateTenant {
            name: format!("tenant-{}", Uuid::now_v7()),
            active: true,
        })
        .await
        .expect("create tenant");
    let workflow = db
        .create_workflow(CreateWorkflow {
            tenant_id: tenant.id,
            name: format!("workflow-{}", Uuid::now_v7()),
            active: true,
        })
        .await
        .expect("create workflow");
    (tenant.id, workflow.id)
}

fn event_input(tenant_id: Uuid, workflow_id: Uuid, key: &str) -> CreateEvent {
    CreateEvent {
        tenant_id,
        workflow_id,
        event_type: "payment.failed".to_string(),
        payload: json!({"error_code": "timeout"}),
        idempotency_key: key.to_string(),
        occurred_at: Utc::now(),
        correlation_id: "test".to_string(),
        vendor: None,
        schema_version: "1.0.0".to_string(),
    }
}

fn incident_input(tenant_id: Uuid, workflow_id: Uuid, signature: &str) -> CreateIncident {
    CreateIncident {
        tenant_id,
        workflow_id,
        signature: signature.to_string(),
        title: "payment.failed".to_string(),
        severity: Severity::Medium,
        occurred_at: Utc::now(),
        metadata: json!({"error_code": "timeout"}),
    }
}

// ============================================
// Events
// ============================================

#[tokio::test]
async fn duplicate_event_insert_returns_the_existing_row() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = seed_tenant_workflow(&db).await;

    let first = match db.insert_event(event_input(tenant, workflow, "dup-1")).await.unwrap() {
        InsertEventOutcome::Inserted(row) => row,
        InsertEventOutcome::Duplicate(_) => panic!("first insert cannot be a duplicate"),
    };

    match db.insert_event(event_input(tenant, workflow, "dup-1")).await.unwrap() {
        InsertEventOutcome::Duplicate(existing) => assert_eq!(existing.id, first.id),
        InsertEventOutcome::Inserted(_) => panic!("second insert must collide"),
    }

    // Same key under a different tenant is a fresh row.
    let (other_tenant, other_workflow) = seed_tenant_workflow(&db).await;
    match db
        .insert_event(event_input(other_tenant, other_workflow, "dup-1"))
        .await
        .unwrap()
    {
        InsertEventOutcome::Inserted(row) => assert_ne!(row.id, first.id),
        InsertEventOutcome::Duplicate(_) => panic!("idempotency keys are tenant-scoped"),
    }
}

// ============================================
// Incidents
// ============================================

#[tokio::test]
async fn apply_event_creates_then_folds() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = seed_tenant_workflow(&db).await;
    let signature = format!("payment.failed:timeout:{workflow}");

    let e1 = match db.insert_event(event_input(tenant, workflow, "i-1")).await.unwrap() {
        InsertEventOutcome::Inserted(row) => row,
        _ => panic!("insert"),
    };
    let e2 = match db.insert_event(event_input(tenant, workflow, "i-2")).await.unwrap() {
        InsertEventOutcome::Inserted(row) => row,
        _ => panic!("insert"),
    };

    let (created, was_created) = db
        .apply_event_to_incident(incident_input(tenant, workflow, &signature), e1.id)
        .await
        .unwrap();
    assert!(was_created);
    assert_eq!(created.event_count, 1);

    let (folded, was_created) = db
        .apply_event_to_incident(incident_input(tenant, workflow, &signature), e2.id)
        .await
        .unwrap();
    assert!(!was_created);
    assert_eq!(folded.id, created.id);
    assert_eq!(folded.event_count, 2);

    let correlated = db.recent_events_for_incident(created.id, 10).await.unwrap();
    assert_eq!(correlated.len(), 2);
}

#[tokio::test]
async fn incident_flag_claims_exactly_once() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = seed_tenant_workflow(&db).await;
    let signature = format!("payment.failed:timeout:{workflow}");

    let event = match db.insert_event(event_input(tenant, workflow, "f-1")).await.unwrap() {
        InsertEventOutcome::Inserted(row) => row,
        _ => panic!("insert"),
    };
    let (incident, _) = db
        .apply_event_to_incident(incident_input(tenant, workflow, &signature), event.id)
        .await
        .unwrap();

    assert!(db.claim_incident_flag(incident.id, "upgrade").await.unwrap());
    assert!(!db.claim_incident_flag(incident.id, "upgrade").await.unwrap());
    assert!(db.claim_incident_flag(incident.id, "another").await.unwrap());
}

// ============================================
// Actions
// ============================================

async fn seed_incident(db: &Database) -> Uuid {
    let (tenant, workflow) = seed_tenant_workflow(db).await;
    let signature = format!("payment.failed:timeout:{workflow}");
    let event = match db
        .insert_event(event_input(tenant, workflow, &format!("a-{}", Uuid::now_v7())))
        .await
        .unwrap()
    {
        InsertEventOutcome::Inserted(row) => row,
        _ => panic!("insert"),
    };
    let (incident, _) = db
        .apply_event_to_incident(incident_input(tenant, workflow, &signature), event.id)
        .await
        .unwrap();
    incident.id
}

fn action_input(incident_id: Uuid) -> CreateAction {
    CreateAction {
        incident_id,
        kind: ActionKind::Retry,
        parameters: json!({"retry_policy": "default"}),
        reversible: true,
        reversal_of: None,
        scheduled_for: Some(Utc::now()),
        attempt_number: 1,
    }
}

#[tokio::test]
async fn single_flight_index_rejects_a_second_action() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let incident_id = seed_incident(&db).await;

    match db.insert_action(action_input(incident_id)).await.unwrap() {
        InsertActionOutcome::Inserted(_) => {}
        InsertActionOutcome::SingleFlightConflict => panic!("slot was empty"),
    }

    match db.insert_action(action_input(incident_id)).await.unwrap() {
        InsertActionOutcome::SingleFlightConflict => {}
        InsertActionOutcome::Inserted(_) => panic!("single-flight must reject"),
    }
}

#[tokio::test]
async fn claiming_picks_up_due_actions_once() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let incident_id = seed_incident(&db).await;

    let action = match db.insert_action(action_input(incident_id)).await.unwrap() {
        InsertActionOutcome::Inserted(row) => row,
        _ => panic!("insert"),
    };

    // Not due yet: scheduled_for is now, claim at an earlier instant.
    let earlier = Utc::now() - chrono::Duration::hours(1);
    let none = db.claim_due_actions("w-1", earlier, 10).await.unwrap();
    assert!(none.iter().all(|a| a.id != action.id));

    let claimed = db.claim_due_actions("w-1", Utc::now(), 10).await.unwrap();
    let mine = claimed.iter().find(|a| a.id == action.id).expect("claimed");
    assert_eq!(mine.status, "in_progress");
    assert_eq!(mine.claimed_by.as_deref(), Some("w-1"));

    // Claimed rows are not handed out twice.
    let again = db.claim_due_actions("w-2", Utc::now(), 10).await.unwrap();
    assert!(again.iter().all(|a| a.id != action.id));
}

#[tokio::test]
async fn transitions_are_optimistic() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let incident_id = seed_incident(&db).await;

    let action = match db.insert_action(action_input(incident_id)).await.unwrap() {
        InsertActionOutcome::Inserted(row) => row,
        _ => panic!("insert"),
    };

    // Wrong precondition: the row is pending, not in_progress.
    let stale = db
        .transition_action(
            action.id,
            ActionStatus::InProgress,
            ActionStatus::Succeeded,
            None,
        )
        .await
        .unwrap();
    assert!(stale.is_none());

    let moved = db
        .transition_action(action.id, ActionStatus::Pending, ActionStatus::InProgress, None)
        .await
        .unwrap()
        .expect("legal transition applies");
    assert_eq!(moved.status, "in_progress");

    let done = db
        .transition_action(
            action.id,
            ActionStatus::InProgress,
            ActionStatus::Succeeded,
            Some(json!({"ok": true})),
        )
        .await
        .unwrap()
        .expect("terminal transition applies");
    assert_eq!(done.status, "succeeded");
    assert!(done.completed_at.is_some());
}

// ============================================
// Kill switches
// ============================================

#[tokio::test]
async fn one_active_switch_per_scope() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = seed_tenant_workflow(&db).await;

    let switch = db
        .engage_kill_switch(CreateKillSwitch {
            tenant_id: tenant,
            workflow_id: Some(workflow),
            reason: "maintenance".to_string(),
            activated_by: "ops".to_string(),
        })
        .await
        .expect("first switch engages");

    // Second active switch for the same scope violates the partial index.
    let second = db
        .engage_kill_switch(CreateKillSwitch {
            tenant_id: tenant,
            workflow_id: Some(workflow),
            reason: "again".to_string(),
            activated_by: "ops".to_string(),
        })
        .await;
    assert!(second.is_err());

    // Released switches free the scope.
    db.release_kill_switch(switch.id).await.unwrap().expect("released");
    db.engage_kill_switch(CreateKillSwitch {
        tenant_id: tenant,
        workflow_id: Some(workflow),
        reason: "fresh".to_string(),
        activated_by: "ops".to_string(),
    })
    .await
    .expect("scope is free again");

    // The workflow-scoped lookup also sees tenant-wide switches.
    db.engage_kill_switch(CreateKillSwitch {
        tenant_id: tenant,
        workflow_id: None,
        reason: "tenant-wide".to_string(),
        activated_by: "ops".to_string(),
    })
    .await
    .expect("tenant-wide switch engages");
    let found = db
        .find_active_kill_switch(tenant, Uuid::now_v7())
        .await
        .unwrap()
        .expect("tenant-wide switch covers every workflow");
    assert!(found.workflow_id.is_none());
}
