//! # Job Tracking
//!
//! Pipeline feedback for jobs in flight.
//!
//! - [`proxy`] - [`JobTrackingProxy`], explicit reports and transparent interception
//! - [`batcher`] - size- and time-bounded completion batching
//! - [`consumer`] - queue polling loop feeding the proxy and the resume handler
//! - [`report`] - explicit tracking report payloads
//! - [`health`] - store connectivity probe
//!
//! ## Example
//!
//! ```rust
//! use job_service::config::JobServiceConfig;
//! use job_service::messaging::TaskStatus;
//! use job_service::models::{NewJob, TaskDefinition};
//! use job_service::orchestration::JobServiceSystem;
//! use job_service::state_machine::JobStatus;
//!
//! # tokio_test::block_on(async {
//! let (system, queues) = JobServiceSystem::in_memory(JobServiceConfig::default());
//! let task = TaskDefinition {
//!     task_classifier: "Resize".to_string(),
//!     task_api_version: 1,
//!     task_data: b"image-42".to_vec(),
//!     task_pipe: "resize-in".to_string(),
//!     target_pipe: "resize-out".to_string(),
//! };
//! system.lifecycle.create_job("media", "img-42", NewJob::new(task), None).await.unwrap();
//!
//! // A worker finishes and addresses its result to the target queue
//! let mut result = queues.messages("resize-in").remove(0);
//! result.task_status = TaskStatus::ResultSuccess;
//! result.to = Some("resize-out".to_string());
//! system.proxy.handle_envelope(result).await.unwrap();
//!
//! let status = system.lifecycle.get_job_status("media", "img-42").await.unwrap();
//! assert_eq!(status, JobStatus::Completed);
//! assert!(queues.messages("resize-out")[0].tracking.is_none());
//! # });
//! ```

pub mod batcher;
pub mod consumer;
pub mod health;
pub mod proxy;
pub mod report;

pub use batcher::CompletionBatcher;
pub use consumer::TrackingConsumer;
pub use health::{HealthProbe, HealthStatus};
pub use proxy::{infer_signal, JobTrackingProxy, PipelineInterceptor, TrackingSignal};
pub use report::{
    ReportedFailure, TrackingReport, TrackingReportStatus, TrackingReportTask,
    TRACKING_REPORT_API_VERSION, TRACKING_REPORT_CLASSIFIER,
};
