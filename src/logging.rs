//! # Structured Logging Module
//!
//! Environment-aware structured logging for the job service. Console output is
//! human readable by default and switches to JSON lines when
//! `JOB_SERVICE_LOG_FORMAT=json` is set.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if use_json_format() {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A subscriber may already be installed by an embedding application
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("JOB_SERVICE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format() -> bool {
    std::env::var("JOB_SERVICE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log structured data for client-initiated job operations
pub fn log_job_operation(
    operation: &str,
    partition_id: &str,
    job_id: &str,
    status: &str,
    correlation_id: Option<&str>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        partition_id = %partition_id,
        job_id = %job_id,
        status = %status,
        correlation_id = correlation_id,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for pipeline feedback handled by the tracking proxy
pub fn log_tracking_operation(
    operation: &str,
    job_task_id: &str,
    signal: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_task_id = %job_task_id,
        signal = %signal,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🛰️ TRACKING_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
