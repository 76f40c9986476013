//! # Job Service
//!
//! Runs the job service against PostgreSQL: applies migrations, starts the
//! delayed job scheduler, the completion batcher and the tracking consumer,
//! and stops them cleanly on Ctrl-C.
//!
//! Configuration is read from `config/job-service.toml`, the environment file
//! selected by `JOB_SERVICE_ENV`, and `JOB_SERVICE__*` variables.

use anyhow::Context;
use job_service::config::{loader::mask_database_url, ConfigManager};
use job_service::logging::init_structured_logging;
use job_service::orchestration::JobServiceSystem;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let manager = ConfigManager::load().context("failed to load configuration")?;
    info!(
        environment = %manager.environment(),
        config_directory = %manager.config_directory().display(),
        database_url = %mask_database_url(&manager.config().database.url),
        "📋 Starting job service"
    );

    let system = JobServiceSystem::connect(manager.config().clone())
        .await
        .context("failed to connect the job service")?;

    let health = system.health.check().await;
    anyhow::ensure!(health.healthy, "job store is unhealthy: {}", health.message);

    let handle = system.start();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    handle.shutdown().await;
    Ok(())
}
