// End-to-end pipeline scenarios over Postgres
//
// Run with: cargo test -p faultline-pipeline --test scenarios
//
// Requirements: PostgreSQL reachable via DATABASE_URL with migrations
// applied (they are applied here on connect). Tests skip silently when
// DATABASE_URL is not set so the suite stays green without infrastructure.
//
// Shared state is the in-memory implementation and time is a manual clock,
// so breaker cooldowns and retry schedules are driven exactly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use faultline_cache::{InMemorySharedState, SharedState};
use faultline_coordinator::{
    ActionScheduler, ActionExecutor, Coordinator, FailingExecutor, LoggingExecutor, ReversalError,
    SchedulerConfig,
};
use faultline_core::{
    ActionKind, ActionStatus, AppConfig, BreakerConfig, Classifier, Clock, EventSubmission,
    GlobalLimits, IncidentStatus, IngestError, ManualClock, RateLimitConfig, SubmissionStatus,
    VendorConfig,
};
use faultline_pipeline::{
    IncidentManager, IncidentManagerConfig, IngestionPipeline, StaticClassifier,
};
use faultline_safety::{CircuitBreaker, DegradedFlag, RateLimiter, RetryBudget};
use faultline_storage::{CreateTenant, CreateWorkflow, Database};

struct Harness {
    db: Database,
    clock: Arc<ManualClock>,
    pipeline: IngestionPipeline,
    coordinator: Arc<Coordinator>,
    scheduler: ActionScheduler,
}

async fn harness(
    classifier: Arc<dyn Classifier>,
    executor: Arc<dyn ActionExecutor>,
    limits: GlobalLimits,
) -> Option<Harness> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    let db = Database::from_url(&database_url)
        .await
        .expect("failed to connect to postgres");
    db.migrate().await.expect("failed to run migrations");

    let shared: Arc<dyn SharedState> = Arc::new(InMemorySharedState::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let degraded = DegradedFlag::new();

    let mut app = AppConfig::default();
    app.tenant_rate_limit = RateLimitConfig { per_minute: 100_000 };
    app.limits = limits;
    app.vendors.insert(
        "v1".to_string(),
        VendorConfig {
            breaker: BreakerConfig {
                threshold: 3,
                cooldown: Duration::from_secs(60),
                window: Duration::from_secs(300),
                probe_cap: 1,
            },
            rate_limit: RateLimitConfig { per_minute: 100_000 },
        },
    );
    let app = Arc::new(app);

    let rules = Arc::new(app.rules_table());
    let policies = Arc::new(app.retry_policies());
    let budget = Arc::new(RetryBudget::new(
        shared.clone(),
        clock_dyn.clone(),
        limits,
        degraded.clone(),
    ));
    let breaker = Arc::new(CircuitBreaker::new(
        shared.clone(),
        clock_dyn.clone(),
        Some(db.clone()),
        degraded.clone(),
    ));
    let limiter = Arc::new(RateLimiter::new(shared, clock_dyn.clone(), degraded));

    let coordinator = Arc::new(Coordinator::new(
        db.clone(),
        budget.clone(),
        rules.clone(),
        policies,
        clock_dyn.clone(),
    ));
    let manager = Arc::new(IncidentManager::new(
        db.clone(),
        rules,
        app.clone(),
        breaker.clone(),
        budget.clone(),
        classifier,
        coordinator.clone(),
        IncidentManagerConfig::default(),
    ));
    let pipeline = IngestionPipeline::new(db.clone(), limiter, breaker, manager, app);
    let scheduler = ActionScheduler::new(
        db.clone(),
        coordinator.clone(),
        executor,
        budget,
        clock_dyn,
        SchedulerConfig {
            poll_jitter: 0.0,
            ..Default::default()
        },
    );

    Some(Harness {
        db,
        clock,
        pipeline,
        coordinator,
        scheduler,
    })
}

async fn fresh_tenant_workflow(db: &Database) -> (Uuid, Uuid) {
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

fn submission(
    tenant_id: Uuid,
    workflow_id: Uuid,
    key: &str,
    event_type: &str,
    payload: serde_json::Value,
) -> EventSubmission {
    EventSubmission {
        tenant_id,
        workflow_id,
        event_type: event_type.to_string(),
        payload,
        idempotency_key: key.to_string(),
        occurred_at: Utc::now(),
        schema_version: "1.0.0".to_string(),
    }
}

/// Poll until the condition yields Some, or panic after ~5s.
async fn wait_for<T, F, Fut>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..100 {
        if let Some(value) = probe().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within timeout");
}

// ============================================
// Scenario 1: duplicate submission
// ============================================

#[tokio::test]
async fn duplicate_submission_yields_one_row_and_one_incident() {
    let Some(h) = harness(
        Arc::new(StaticClassifier::recommending_retry()),
        Arc::new(LoggingExecutor),
        GlobalLimits::default(),
    )
    .await
    else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = fresh_tenant_workflow(&h.db).await;

    let first = h
        .pipeline
        .submit(
            submission(tenant, workflow, "k-1", "payment.failed", json!({"error_code": "timeout"})),
            None,
        )
        .await
        .expect("first submission accepted");
    assert_eq!(first.status, SubmissionStatus::Accepted);

    let second = h
        .pipeline
        .submit(
            submission(tenant, workflow, "k-1", "payment.failed", json!({"error_code": "timeout"})),
            None,
        )
        .await
        .expect("duplicate is success-shaped");
    assert_eq!(second.status, SubmissionStatus::Duplicate);
    assert_eq!(second.event_id, first.event_id);

    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events WHERE tenant_id = $1")
        .bind(tenant)
        .fetch_one(h.db.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let incident = wait_for(|| async {
        h.db.list_incidents(tenant, None, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .next()
    })
    .await;
    assert_eq!(incident.event_count, 1);
}

// ============================================
// Scenario 2: grouping by fingerprint
// ============================================

#[tokio::test]
async fn three_events_group_into_one_incident() {
    let Some(h) = harness(
        Arc::new(StaticClassifier::recommending_retry()),
        Arc::new(LoggingExecutor),
        GlobalLimits::default(),
    )
    .await
    else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = fresh_tenant_workflow(&h.db).await;

    // Truncate to microseconds so timestamptz round-trips compare equal.
    let t0 = chrono::DateTime::from_timestamp_micros(Utc::now().timestamp_micros())
        .expect("valid timestamp");
    for (i, key) in ["k-1", "k-2", "k-3"].iter().enumerate() {
        let mut s = submission(
            tenant,
            workflow,
            key,
            "payment.failed",
            json!({"error_code": "timeout"}),
        );
        s.occurred_at = t0 + chrono::Duration::seconds(i as i64);
        let outcome = h.pipeline.submit(s, None).await.expect("accepted");
        assert_eq!(outcome.status, SubmissionStatus::Accepted);
    }

    let incident = wait_for(|| async {
        h.db.list_incidents(tenant, None, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .find(|i| i.event_count == 3)
    })
    .await;

    assert_eq!(
        incident.signature,
        format!("payment.failed:timeout:{workflow}")
    );
    assert_eq!(incident.first_seen_at, t0);
    assert_eq!(incident.last_seen_at, t0 + chrono::Duration::seconds(2));

    let (incidents,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM incidents WHERE tenant_id = $1")
            .bind(tenant)
            .fetch_one(h.db.pool())
            .await
            .unwrap();
    assert_eq!(incidents, 1);
}

// ============================================
// Scenario 3: kill switch
// ============================================

#[tokio::test]
async fn kill_switch_rejects_without_persisting() {
    let Some(h) = harness(
        Arc::new(StaticClassifier::recommending_retry()),
        Arc::new(LoggingExecutor),
        GlobalLimits::default(),
    )
    .await
    else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = fresh_tenant_workflow(&h.db).await;

    h.db.engage_kill_switch(faultline_storage::CreateKillSwitch {
        tenant_id: tenant,
        workflow_id: Some(workflow),
        reason: "vendor maintenance".to_string(),
        activated_by: "ops@example.com".to_string(),
    })
    .await
    .expect("engage switch");

    let err = h
        .pipeline
        .submit(
            submission(tenant, workflow, "k-blocked", "payment.failed", json!({"error_code": "timeout"})),
            None,
        )
        .await
        .expect_err("kill switch rejects");
    assert!(matches!(err, IngestError::WorkflowDisabled { .. }));
    assert_eq!(err.code().as_str(), "workflow_disabled");

    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events WHERE tenant_id = $1")
        .bind(tenant)
        .fetch_one(h.db.pool())
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

// ============================================
// Scenario 4: breaker opens, probes, closes
// ============================================

#[tokio::test]
async fn vendor_breaker_opens_then_recovers_through_probe() {
    let Some(h) = harness(
        Arc::new(StaticClassifier::recommending_retry()),
        Arc::new(LoggingExecutor),
        GlobalLimits {
            max_retries_per_workflow: 3,
            max_retries_per_vendor_per_hour: 1_000,
        },
    )
    .await
    else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = fresh_tenant_workflow(&h.db).await;

    // Three vendor failures trip the threshold during detection.
    for key in ["b-1", "b-2", "b-3"] {
        h.pipeline
            .submit(
                submission(
                    tenant,
                    workflow,
                    key,
                    "payment.failed",
                    json!({"error_code": "timeout", "vendor": "v1"}),
                ),
                None,
            )
            .await
            .expect("accepted while breaker closed");
    }

    // Detection is async; wait until the rejection shows the breaker open.
    wait_for(|| async {
        let result = h
            .pipeline
            .submit(
                submission(
                    tenant,
                    workflow,
                    &format!("b-probe-{}", Uuid::now_v7()),
                    "payment.failed",
                    json!({"error_code": "timeout", "vendor": "v1"}),
                ),
                None,
            )
            .await;
        match result {
            Err(IngestError::BreakerOpen { .. }) => Some(()),
            _ => None,
        }
    })
    .await;

    // Past the cooldown, one probe is admitted; a successful vendor event
    // closes the breaker again.
    h.clock.advance(chrono::Duration::seconds(61));
    let probe = h
        .pipeline
        .submit(
            submission(
                tenant,
                workflow,
                "b-recovery",
                "payment.completed",
                json!({"vendor": "v1"}),
            ),
            None,
        )
        .await
        .expect("probe admitted in half-open");
    assert_eq!(probe.status, SubmissionStatus::Accepted);

    wait_for(|| async {
        let result = h
            .pipeline
            .submit(
                submission(
                    tenant,
                    workflow,
                    &format!("b-after-{}", Uuid::now_v7()),
                    "payment.completed",
                    json!({"vendor": "v1"}),
                ),
                None,
            )
            .await;
        match result {
            Ok(outcome) if outcome.status == SubmissionStatus::Accepted => Some(()),
            _ => None,
        }
    })
    .await;
}

// ============================================
// Scenario 5: retry exhaustion forces escalation
// ============================================

#[tokio::test]
async fn retry_budget_exhaustion_selects_escalation() {
    let executor = Arc::new(FailingExecutor::new(10));
    let Some(h) = harness(
        Arc::new(StaticClassifier::recommending_retry()),
        executor.clone(),
        GlobalLimits {
            max_retries_per_workflow: 2,
            max_retries_per_vendor_per_hour: 1_000,
        },
    )
    .await
    else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = fresh_tenant_workflow(&h.db).await;

    h.pipeline
        .submit(
            submission(tenant, workflow, "r-1", "payment.failed", json!({"error_code": "timeout"})),
            None,
        )
        .await
        .expect("accepted");

    // First retry action appears from detection.
    let incident = wait_for(|| async {
        h.db.list_incidents(tenant, None, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .next()
    })
    .await;
    wait_for(|| async {
        h.db.find_in_flight_action(incident.id)
            .await
            .unwrap()
            .filter(|a| a.kind == "retry")
    })
    .await;

    // Attempt 1 fails, attempt 2 is scheduled and fails, then selection
    // must escalate instead of retrying again.
    for _ in 0..2 {
        h.clock.advance(chrono::Duration::hours(2));
        h.scheduler.tick().await.expect("tick");
    }

    let escalation = wait_for(|| async {
        h.db.find_in_flight_action(incident.id)
            .await
            .unwrap()
            .filter(|a| a.kind == "escalate")
    })
    .await;
    assert_eq!(escalation.status, "pending");

    let refreshed = h.db.get_incident(incident.id).await.unwrap().unwrap();
    assert_eq!(refreshed.retry_count, 2);

    let kinds: Vec<String> = h
        .db
        .list_actions_for_incident(incident.id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.kind)
        .collect();
    assert_eq!(
        kinds.iter().filter(|k| k.as_str() == "retry").count(),
        2,
        "exactly two retry attempts were made: {kinds:?}"
    );
}

// ============================================
// Scenario 6: single-flight suppression
// ============================================

#[tokio::test]
async fn in_flight_action_suppresses_new_actions_but_not_folding() {
    let Some(h) = harness(
        Arc::new(StaticClassifier::recommending_retry()),
        Arc::new(LoggingExecutor),
        GlobalLimits::default(),
    )
    .await
    else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = fresh_tenant_workflow(&h.db).await;

    h.pipeline
        .submit(
            submission(tenant, workflow, "s-1", "payment.failed", json!({"error_code": "timeout"})),
            None,
        )
        .await
        .expect("accepted");

    let incident = wait_for(|| async {
        h.db.list_incidents(tenant, None, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .next()
    })
    .await;
    wait_for(|| async { h.db.find_in_flight_action(incident.id).await.unwrap() }).await;

    // A second event folds in while the retry is still pending.
    h.pipeline
        .submit(
            submission(tenant, workflow, "s-2", "payment.failed", json!({"error_code": "timeout"})),
            None,
        )
        .await
        .expect("accepted");

    let refreshed = wait_for(|| async {
        h.db.get_incident(incident.id)
            .await
            .unwrap()
            .filter(|i| i.event_count == 2)
    })
    .await;
    assert_eq!(refreshed.event_count, 2);

    let actions = h.db.list_actions_for_incident(incident.id).await.unwrap();
    assert_eq!(actions.len(), 1, "no second action under single-flight");

    let suppression = wait_for(|| async {
        h.db.list_decisions_for_incident(incident.id)
            .await
            .unwrap()
            .into_iter()
            .find(|d| d.category == "single_flight_suppression")
    })
    .await;
    assert_eq!(suppression.kind, "recommendation");
}

// ============================================
// Reversal round trip
// ============================================

#[tokio::test]
async fn reversal_round_trip_and_double_reversal_rejection() {
    let Some(h) = harness(
        Arc::new(StaticClassifier::recommending_retry()),
        Arc::new(LoggingExecutor),
        GlobalLimits::default(),
    )
    .await
    else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let (tenant, workflow) = fresh_tenant_workflow(&h.db).await;

    h.pipeline
        .submit(
            submission(tenant, workflow, "rv-1", "payment.failed", json!({"error_code": "timeout"})),
            None,
        )
        .await
        .expect("accepted");

    let incident = wait_for(|| async {
        h.db.list_incidents(tenant, None, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .next()
    })
    .await;
    let retry = wait_for(|| async {
        h.db.find_in_flight_action(incident.id)
            .await
            .unwrap()
            .filter(|a| a.kind == "retry")
    })
    .await;

    // Let the retry run to success.
    h.clock.advance(chrono::Duration::hours(2));
    h.scheduler.tick().await.expect("tick");
    let succeeded = h.db.get_action(retry.id).await.unwrap().unwrap();
    assert_eq!(succeeded.status, "succeeded");
    let resolved = h.db.get_incident(incident.id).await.unwrap().unwrap();
    assert_eq!(resolved.status, IncidentStatus::Resolved.to_string());

    // Reverse it.
    let reversal = h
        .coordinator
        .reverse_action(retry.id)
        .await
        .expect("reversal created");
    assert_eq!(reversal.kind, ActionKind::Reversal);
    assert_eq!(reversal.reversal_of, Some(retry.id));
    assert_eq!(reversal.status, ActionStatus::Pending);

    // Reversing the same action again is rejected.
    let err = h.coordinator.reverse_action(retry.id).await.unwrap_err();
    assert!(matches!(err, ReversalError::AlreadyReversed));
}
