// Faultline API server
// Decision: The API binary can run the action scheduler in-process
//   (FAULTLINE_SCHEDULER=inprocess, the default for single-node setups) or
//   leave it to dedicated faultline-worker processes (=external)

mod actions;
mod correlation;
mod error;
mod events;
mod incidents;
mod kill_switches;
mod tenants;
mod vendors;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use faultline_cache::{InMemorySharedState, RedisSharedState, SharedState};
use faultline_coordinator::{
    ActionScheduler, Coordinator, LoggingExecutor, SchedulerConfig,
};
use faultline_core::{
    Action, ActionKind, ActionStatus, AppConfig, BreakerState, Clock, Decision, DecisionKind,
    Incident, IncidentStatus, KillSwitch, Recommendation, Severity, SubmissionOutcome,
    SubmissionStatus, SystemClock, Tenant, Vendor, Workflow,
};
use faultline_pipeline::{
    IncidentManager, IncidentManagerConfig, IngestionPipeline, RuleBasedClassifier,
};
use faultline_safety::{CircuitBreaker, DegradedFlag, RateLimiter, RetryBudget};
use faultline_storage::Database;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub pipeline: Arc<IngestionPipeline>,
    pub coordinator: Arc<Coordinator>,
    pub degraded: DegradedFlag,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// True when the shared-state cache was recently unreachable and the
    /// gates are applying their degraded-mode policies.
    degraded: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        degraded: state.degraded.is_degraded(),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        events::submit_event,
        incidents::list_incidents,
        incidents::get_incident,
        incidents::update_incident_status,
        incidents::list_actions,
        incidents::list_decisions,
        actions::reverse_action,
        kill_switches::engage_kill_switch,
        kill_switches::list_kill_switches,
        kill_switches::release_kill_switch,
        tenants::create_tenant,
        tenants::list_tenants,
        tenants::set_tenant_active,
        tenants::create_workflow,
        tenants::list_workflows,
        tenants::set_workflow_active,
        vendors::create_vendor,
        vendors::list_vendors,
    ),
    components(
        schemas(
            Tenant, Workflow, KillSwitch,
            Vendor, BreakerState,
            Incident, IncidentStatus, Severity,
            Decision, DecisionKind, Recommendation,
            Action, ActionKind, ActionStatus,
            SubmissionOutcome, SubmissionStatus,
            events::SubmitEventRequest,
            incidents::UpdateIncidentStatusRequest,
            kill_switches::EngageKillSwitchRequest,
            tenants::CreateTenantRequest,
            tenants::CreateWorkflowRequest,
            tenants::SetActiveRequest,
            vendors::CreateVendorRequest,
            error::ErrorBody,
        )
    ),
    tags(
        (name = "events", description = "Event submission"),
        (name = "incidents", description = "Incident queries"),
        (name = "actions", description = "Action reversal"),
        (name = "kill-switches", description = "Operator kill switches"),
        (name = "tenants", description = "Tenant and workflow management"),
        (name = "vendors", description = "Vendor registry")
    ),
    info(
        title = "Faultline API",
        version = "0.2.0",
        description = "Workflow failure ingestion, incident correlation and bounded automated remediation",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "faultline_api=debug,faultline_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("faultline-api starting...");

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let db = Database::from_url(&database_url)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    tracing::info!("Connected to database");

    let shared_state: Arc<dyn SharedState> = match std::env::var("REDIS_URL") {
        Ok(url) => {
            let state = RedisSharedState::connect(&url)
                .await
                .context("Failed to connect to redis")?;
            tracing::info!("Connected to redis shared state");
            Arc::new(state)
        }
        Err(_) => {
            tracing::warn!(
                "REDIS_URL not set; using in-memory shared state (single instance only)"
            );
            Arc::new(InMemorySharedState::new())
        }
    };

    let app_config = match std::env::var("FAULTLINE_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            AppConfig::from_json(&raw)?
        }
        Err(_) => AppConfig::default(),
    };
    let app_config = Arc::new(app_config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let degraded = DegradedFlag::new();
    let rules = Arc::new(app_config.rules_table());
    let policies = Arc::new(app_config.retry_policies());

    let budget = Arc::new(RetryBudget::new(
        shared_state.clone(),
        clock.clone(),
        app_config.limits,
        degraded.clone(),
    ));
    let breaker = Arc::new(CircuitBreaker::new(
        shared_state.clone(),
        clock.clone(),
        Some(db.clone()),
        degraded.clone(),
    ));
    let limiter = Arc::new(RateLimiter::new(
        shared_state.clone(),
        clock.clone(),
        degraded.clone(),
    ));

    let coordinator = Arc::new(Coordinator::new(
        db.clone(),
        budget.clone(),
        rules.clone(),
        policies,
        clock.clone(),
    ));
    let classifier = Arc::new(RuleBasedClassifier::new(rules.clone()));
    let manager = Arc::new(IncidentManager::new(
        db.clone(),
        rules,
        app_config.clone(),
        breaker.clone(),
        budget.clone(),
        classifier,
        coordinator.clone(),
        IncidentManagerConfig::default(),
    ));
    let pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        limiter,
        breaker,
        manager,
        app_config,
    ));

    // Scheduler mode, following the runner-mode pattern: in-process for
    // single-node setups, external when dedicated workers poll.
    let scheduler_mode =
        std::env::var("FAULTLINE_SCHEDULER").unwrap_or_else(|_| "inprocess".to_string());
    let scheduler = if scheduler_mode == "inprocess" {
        let scheduler = Arc::new(ActionScheduler::new(
            db.clone(),
            coordinator.clone(),
            Arc::new(LoggingExecutor),
            budget,
            clock,
            SchedulerConfig::default(),
        ));
        let runner = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                tracing::error!(error = %e, "in-process scheduler stopped");
            }
        });
        tracing::info!("In-process action scheduler started");
        Some(scheduler)
    } else {
        tracing::info!("Scheduler mode external; faultline-worker processes drive actions");
        None
    };

    let state = AppState {
        db,
        pipeline,
        coordinator,
        degraded,
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health).with_state(state.clone()))
        .merge(events::routes(state.clone()))
        .merge(incidents::routes(state.clone()))
        .merge(actions::routes(state.clone()))
        .merge(kill_switches::routes(state.clone()))
        .merge(tenants::routes(state.clone()))
        .merge(vendors::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!("Listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown();
    }

    Ok(())
}
