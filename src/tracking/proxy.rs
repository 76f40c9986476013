//! # Job Tracking Proxy
//!
//! Receives every envelope routed to the tracking queue and reports what it
//! observes to the job store.
//!
//! ## Modes
//!
//! **Explicit**: envelopes classified [`TRACKING_REPORT_CLASSIFIER`] carry a
//! [`TrackingReportTask`]. Each report is applied; completions go through the
//! [`CompletionBatcher`]. Nothing is forwarded.
//!
//! **Transparent**: any other envelope is inspected for a [`TrackingSignal`],
//! the signal is reported, and the envelope is forwarded unmodified to its
//! nominal destination. Tracking is stripped once `trackTo` equals `to`.
//!
//! A transient store error aborts handling so the message is redelivered.
//! Reports for unknown jobs are logged and skipped.

use super::batcher::CompletionBatcher;
use super::report::{TrackingReportStatus, TrackingReportTask, TRACKING_REPORT_CLASSIFIER};
use crate::config::TrackingConfig;
use crate::constants::{headers, sources};
use crate::error::{JobServiceError, Result};
use crate::logging::log_tracking_operation;
use crate::messaging::{TaskEnvelope, TaskQueueGateway, TaskStatus};
use crate::models::{Failure, JobTaskId};
use crate::orchestration::DependencyResolver;
use crate::store::{CompletionBatch, JobStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// What an intercepted envelope says about its job
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingSignal {
    Progress { job_task_id: JobTaskId },
    /// The envelope has reached its final destination
    Complete { job_task_id: JobTaskId },
    Rejected { job_task_id: JobTaskId, failure: Failure },
    Retry { job_task_id: JobTaskId, retry_details: String },
    /// No usable tracking metadata; forward without reporting
    Untracked { reason: String },
}

impl TrackingSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Complete { .. } => "complete",
            Self::Rejected { .. } => "rejected",
            Self::Retry { .. } => "retry",
            Self::Untracked { .. } => "untracked",
        }
    }
}

/// Middleware stage between the queue consumer and an envelope's destination
#[async_trait]
pub trait PipelineInterceptor: Send + Sync {
    fn inspect(&self, envelope: &TaskEnvelope) -> TrackingSignal;

    async fn forward(&self, envelope: TaskEnvelope) -> Result<()>;
}

/// Worker name for failure sources
fn failure_source(envelope: &TaskEnvelope) -> String {
    match &envelope.source_info {
        None => sources::UNKNOWN_NO_SOURCE_INFO.to_string(),
        Some(info) => info
            .name
            .clone()
            .unwrap_or_else(|| sources::UNKNOWN_WORKER_NAME.to_string()),
    }
}

fn retry_count(envelope: &TaskEnvelope) -> u32 {
    envelope
        .header(headers::WORKER_RETRY)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Signal inference from status and headers
pub fn infer_signal(envelope: &TaskEnvelope) -> TrackingSignal {
    let untracked = |reason: &str| TrackingSignal::Untracked {
        reason: reason.to_string(),
    };
    let Some(tracking) = &envelope.tracking else {
        return untracked("no tracking info");
    };
    let Some(raw_id) = tracking.job_task_id.as_deref() else {
        return untracked("no job task id");
    };
    let Some(track_to) = tracking.track_to.as_deref() else {
        return untracked("no trackTo queue");
    };
    let job_task_id = match JobTaskId::parse(raw_id) {
        Ok(id) => id,
        Err(err) => return untracked(err.message()),
    };

    match envelope.task_status {
        TaskStatus::NewTask | TaskStatus::ResultSuccess | TaskStatus::ResultFailure => {
            let arrived = envelope
                .to
                .as_deref()
                .is_some_and(|to| to.eq_ignore_ascii_case(track_to));
            if arrived {
                TrackingSignal::Complete { job_task_id }
            } else {
                TrackingSignal::Progress { job_task_id }
            }
        }
        TaskStatus::ResultException | TaskStatus::InvalidTask => TrackingSignal::Rejected {
            failure: Failure::new(
                envelope.task_status.as_str(),
                failure_source(envelope),
                String::from_utf8_lossy(&envelope.task_data),
            ),
            job_task_id,
        },
        TaskStatus::Unknown => {
            let retries = retry_count(envelope);
            match envelope.header(headers::WORKER_REJECTED) {
                Some(rejected) => TrackingSignal::Rejected {
                    failure: Failure::new(
                        envelope.task_status.as_str(),
                        failure_source(envelope),
                        format!("{rejected}. Execution of this job task was retried {retries} times."),
                    ),
                    job_task_id,
                },
                None => TrackingSignal::Retry {
                    retry_details: format!(
                        "This job task encountered a problem and will be retried. This will be retry attempt number {retries} for this job task."
                    ),
                    job_task_id,
                },
            }
        }
    }
}

/// True once the envelope is addressed to its `trackTo` queue
fn at_final_destination(envelope: &TaskEnvelope) -> bool {
    match (&envelope.tracking, envelope.to.as_deref()) {
        (Some(tracking), Some(to)) => tracking
            .track_to
            .as_deref()
            .is_some_and(|track_to| track_to.eq_ignore_ascii_case(to)),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct JobTrackingProxy {
    store: Arc<dyn JobStore>,
    resolver: Arc<DependencyResolver>,
    batcher: Arc<CompletionBatcher>,
    gateway: Arc<dyn TaskQueueGateway>,
    config: TrackingConfig,
}

impl JobTrackingProxy {
    pub fn new(
        store: Arc<dyn JobStore>,
        resolver: Arc<DependencyResolver>,
        batcher: Arc<CompletionBatcher>,
        gateway: Arc<dyn TaskQueueGateway>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            batcher,
            gateway,
            config,
        }
    }

    pub fn batcher(&self) -> &Arc<CompletionBatcher> {
        &self.batcher
    }

    /// Route an envelope from the tracking queue to the matching mode
    pub async fn handle_envelope(&self, envelope: TaskEnvelope) -> Result<()> {
        if envelope.task_classifier == TRACKING_REPORT_CLASSIFIER {
            let task = TrackingReportTask::from_payload(&envelope.task_data).map_err(|e| {
                JobServiceError::bad_request(format!("Invalid tracking report payload: {e}"))
            })?;
            self.handle_report_task(&task).await
        } else {
            self.intercept(envelope).await
        }
    }

    /// Explicit mode
    #[instrument(skip(self, task), fields(reports = task.tracking_reports.len()))]
    pub async fn handle_report_task(&self, task: &TrackingReportTask) -> Result<()> {
        for report in &task.tracking_reports {
            let job_task_id = match JobTaskId::parse(&report.job_task_id) {
                Ok(id) => id,
                Err(err) => {
                    warn!(error = %err, "Skipping tracking report");
                    continue;
                }
            };
            let (partition_id, job_id) = (job_task_id.partition_id(), job_task_id.job_id());

            let outcome = match report.status {
                TrackingReportStatus::Progress => self
                    .store
                    .report_progress(partition_id, job_id, report.estimated_percentage_completed)
                    .await
                    .map(|_| ()),
                TrackingReportStatus::Complete => self.batcher.add(job_task_id.clone()).await,
                TrackingReportStatus::Failed => self
                    .store
                    .report_failure(partition_id, job_id, report.failure_or_default(job_id))
                    .await,
                TrackingReportStatus::Retry => self
                    .store
                    .report_retry(partition_id, job_id, &report.retry_details())
                    .await
                    .map(|_| ()),
            };

            log_tracking_operation(
                "report",
                &report.job_task_id,
                &format!("{:?}", report.status),
                None,
            );
            self.absorb(outcome, &job_task_id)?;
        }
        Ok(())
    }

    /// Transparent mode: report, then forward
    #[instrument(skip(self, envelope), fields(task_id = %envelope.task_id, status = %envelope.task_status))]
    pub async fn intercept(&self, envelope: TaskEnvelope) -> Result<()> {
        let signal = self.inspect(&envelope);
        self.report_signal(&signal).await?;
        self.forward(envelope).await
    }

    async fn report_signal(&self, signal: &TrackingSignal) -> Result<()> {
        let (job_task_id, outcome) = match signal {
            TrackingSignal::Untracked { reason } => {
                warn!(reason = %reason, "⚠️ Forwarding envelope without tracking");
                return Ok(());
            }
            TrackingSignal::Progress { job_task_id } => (
                job_task_id,
                self.store
                    .report_progress(job_task_id.partition_id(), job_task_id.job_id(), None)
                    .await
                    .map(|_| ()),
            ),
            TrackingSignal::Complete { job_task_id } => (
                job_task_id,
                self.resolver
                    .complete_tasks(&CompletionBatch::single(job_task_id.clone()))
                    .await
                    .map(|_| ()),
            ),
            TrackingSignal::Rejected {
                job_task_id,
                failure,
            } => {
                let (partition_id, job_id) = (job_task_id.partition_id(), job_task_id.job_id());
                let outcome = if self.config.fail_jobs_on_rejection {
                    self.store
                        .fail_job(partition_id, job_id, failure.clone())
                        .await
                        .map(|_| ())
                } else {
                    self.store
                        .report_failure(partition_id, job_id, failure.clone())
                        .await
                };
                (job_task_id, outcome)
            }
            TrackingSignal::Retry {
                job_task_id,
                retry_details,
            } => (
                job_task_id,
                self.store
                    .report_retry(job_task_id.partition_id(), job_task_id.job_id(), retry_details)
                    .await
                    .map(|_| ()),
            ),
        };

        log_tracking_operation("intercept", &job_task_id.to_string(), signal.name(), None);
        self.absorb(outcome, job_task_id)
    }

    /// Propagate transient errors; log and drop the rest
    fn absorb(&self, outcome: Result<()>, job_task_id: &JobTaskId) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(err) if err.is_transient() => Err(err),
            Err(JobServiceError::NotFound { message }) => {
                warn!(job_task_id = %job_task_id, error = %message, "Tracking report for unknown job skipped");
                Ok(())
            }
            Err(err) => {
                error!(job_task_id = %job_task_id, error = %err, "❌ Tracking report rejected");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PipelineInterceptor for JobTrackingProxy {
    fn inspect(&self, envelope: &TaskEnvelope) -> TrackingSignal {
        infer_signal(envelope)
    }

    async fn forward(&self, mut envelope: TaskEnvelope) -> Result<()> {
        let Some(destination) = envelope.to.clone() else {
            return Err(JobServiceError::bad_request(format!(
                "Envelope {} has no destination queue.",
                envelope.task_id
            )));
        };
        if at_final_destination(&envelope) {
            envelope.tracking = None;
        }

        self.gateway
            .publish(&destination, &envelope)
            .await
            .map_err(JobServiceError::from)?;
        debug!(queue = %destination, task_id = %envelope.task_id, "📨 Envelope forwarded");
        Ok(())
    }
}
