#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Job Service Core
//!
//! Multi-tenant job orchestration: clients submit jobs that each carry one
//! task, the service dispatches that task to a worker pipeline once its
//! prerequisites have completed and any delay has elapsed, and a tracking
//! proxy follows the task through the pipeline to keep job status current.
//!
//! ## Architecture
//!
//! - [`store`] - the [`JobStore`] trait with in-memory and PostgreSQL backends
//! - [`orchestration`] - lifecycle operations, the dependency cascade, the
//!   dispatcher and the delayed job scheduler
//! - [`tracking`] - the job tracking proxy, completion batching and the queue consumer
//! - [`messaging`] - task envelopes and the queue gateway over pgmq
//! - [`state_machine`] - the job status transition table
//! - [`query_builder`] - filter, sort and pagination for job listings
//! - [`models`] - jobs, task definitions, labels, failures and job task ids
//! - [`config`] - layered TOML configuration with environment overrides
//! - [`database`] - connection pooling and schema migrations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use job_service::config::JobServiceConfig;
//! use job_service::models::{NewJob, TaskDefinition};
//! use job_service::orchestration::JobServiceSystem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (system, _queues) = JobServiceSystem::in_memory(JobServiceConfig::default());
//!
//! let job = NewJob::new(TaskDefinition {
//!     task_classifier: "Report".to_string(),
//!     task_api_version: 1,
//!     task_data: br#"{"month":"2024-01"}"#.to_vec(),
//!     task_pipe: "report-worker".to_string(),
//!     target_pipe: "report-output".to_string(),
//! });
//! system.lifecycle.create_job("tenant-a", "report-jan", job, None).await?;
//!
//! let status = system.lifecycle.get_job_status("tenant-a", "report-jan").await?;
//! println!("report-jan is {status}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                              # Unit and in-memory integration tests
//! DATABASE_URL=... cargo test -- --ignored # PostgreSQL store tests
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod query_builder;
pub mod state_machine;
pub mod store;
pub mod tracking;
pub mod validation;

pub use config::{ConfigManager, JobServiceConfig};
pub use error::{JobServiceError, Result};
pub use models::{ExpirationPolicy, Job, JobExpiration, JobTaskId, NewJob, TaskDefinition};
pub use orchestration::{JobLifecycleManager, JobServiceSystem};
pub use state_machine::{JobEvent, JobStatus};
pub use store::{InMemoryJobStore, JobStore, PgJobStore};
pub use tracking::JobTrackingProxy;
