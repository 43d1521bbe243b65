// Faultline worker: dedicated action scheduler process

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use faultline_cache::{InMemorySharedState, RedisSharedState, SharedState};
use faultline_coordinator::{ActionScheduler, Coordinator, LoggingExecutor, SchedulerConfig};
use faultline_core::{AppConfig, Clock, SystemClock};
use faultline_safety::{DegradedFlag, RetryBudget};
use faultline_storage::Database;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "faultline_coordinator=debug,faultline_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("faultline-worker starting...");

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let db = Database::from_url(&database_url)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    tracing::info!("Connected to database");

    let shared_state: Arc<dyn SharedState> = match std::env::var("REDIS_URL") {
        Ok(url) => Arc::new(
            RedisSharedState::connect(&url)
                .await
                .context("Failed to connect to redis")?,
        ),
        Err(_) => {
            tracing::warn!("REDIS_URL not set; using in-memory shared state (single instance only)");
            Arc::new(InMemorySharedState::new())
        }
    };

    let config = match std::env::var("FAULTLINE_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            AppConfig::from_json(&raw)?
        }
        Err(_) => AppConfig::default(),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let degraded = DegradedFlag::new();
    let budget = Arc::new(RetryBudget::new(
        shared_state.clone(),
        clock.clone(),
        config.limits,
        degraded.clone(),
    ));
    let rules = Arc::new(config.rules_table());
    let policies = Arc::new(config.retry_policies());

    let coordinator = Arc::new(Coordinator::new(
        db.clone(),
        budget.clone(),
        rules,
        policies,
        clock.clone(),
    ));

    let scheduler = Arc::new(ActionScheduler::new(
        db,
        coordinator,
        Arc::new(LoggingExecutor),
        budget,
        clock,
        SchedulerConfig::default(),
    ));

    let runner = scheduler.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    scheduler.shutdown();
    handle.await??;

    Ok(())
}
