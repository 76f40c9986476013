//! # Task Dispatcher
//!
//! Turns a released [`JobTaskTemplate`] into a tracked [`TaskEnvelope`] and
//! publishes it on the task's queue. Every dispatched envelope routes back
//! through the tracking queue until it reaches its target queue.
//!
//! A failed publish is never dropped: the failure is appended to the job with
//! a caller-specific source before the error is returned.

use crate::config::QueueConfig;
use crate::constants::failures;
use crate::error::{JobServiceError, Result};
use crate::messaging::{url_encode, ResumeJobMessage, TaskEnvelope, TaskQueueGateway, TrackingInfo};
use crate::models::{Failure, JobTaskId, JobTaskTemplate};
use crate::store::JobStore;
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Builds the failure source recorded when a publish fails
pub type FailureSource = fn(&str) -> String;

#[derive(Debug, Clone)]
pub struct TaskDispatcher {
    gateway: Arc<dyn TaskQueueGateway>,
    store: Arc<dyn JobStore>,
    queues: QueueConfig,
}

impl TaskDispatcher {
    pub fn new(gateway: Arc<dyn TaskQueueGateway>, store: Arc<dyn JobStore>, queues: QueueConfig) -> Self {
        Self {
            gateway,
            store,
            queues,
        }
    }

    pub fn queues(&self) -> &QueueConfig {
        &self.queues
    }

    /// `{base}/partitions/{partition}/jobs/{jobId}/isActive`
    pub fn status_check_url(&self, partition_id: &str, job_id: &str) -> String {
        format!(
            "{}/partitions/{}/jobs/{}/isActive",
            self.queues.status_check_url.trim_end_matches('/'),
            partition_id,
            url_encode(job_id)
        )
    }

    pub fn build_envelope(&self, template: &JobTaskTemplate, correlation_id: Option<&str>) -> TaskEnvelope {
        let task = &template.task;
        let status_check_interval =
            Duration::seconds(i64::try_from(self.queues.status_check_interval_seconds).unwrap_or(i64::MAX));

        TaskEnvelope::new_task(&task.task_classifier, task.task_api_version, task.task_data.clone())
            .to_queue(&task.task_pipe)
            .with_correlation_id(correlation_id.map(str::to_string))
            .with_tracking(TrackingInfo {
                job_task_id: Some(JobTaskId::root(&template.partition_id, &template.job_id).to_string()),
                status_check_time: Utc::now().checked_add_signed(status_check_interval),
                status_check_url: Some(self.status_check_url(&template.partition_id, &template.job_id)),
                tracking_pipe: Some(self.queues.tracking_queue.clone()),
                track_to: Some(task.target_pipe.clone()),
            })
    }

    /// Publish the template's task; no failure bookkeeping
    #[instrument(skip(self, template), fields(partition_id = %template.partition_id, job_id = %template.job_id))]
    pub async fn dispatch(&self, template: &JobTaskTemplate, correlation_id: Option<&str>) -> Result<()> {
        let envelope = self.build_envelope(template, correlation_id);
        debug!(queue = %template.task.task_pipe, task_id = %envelope.task_id, "📤 Dispatching task");
        self.gateway
            .publish(&template.task.task_pipe, &envelope)
            .await
            .map_err(JobServiceError::from)?;
        Ok(())
    }

    /// Publish, appending an `ADD_TO_QUEUE_FAILURE` to the job when the publish fails
    pub async fn dispatch_or_record(
        &self,
        template: &JobTaskTemplate,
        correlation_id: Option<&str>,
        source: FailureSource,
    ) -> Result<()> {
        let Err(err) = self.dispatch(template, correlation_id).await else {
            return Ok(());
        };

        error!(
            partition_id = %template.partition_id,
            job_id = %template.job_id,
            error = %err,
            "❌ Failed to add task data to the queue"
        );
        let failure = Failure::new(
            failures::ADD_TO_QUEUE_FAILURE,
            source(&template.job_id),
            err.message(),
        );
        if let Err(record_err) = self
            .store
            .report_failure(&template.partition_id, &template.job_id, failure)
            .await
        {
            warn!(
                job_id = %template.job_id,
                error = %record_err,
                "Unable to record dispatch failure against job"
            );
        }
        Err(err)
    }

    /// Dispatch every released dependent; one failure does not stop the rest
    pub async fn dispatch_all(
        &self,
        templates: &[JobTaskTemplate],
        correlation_id: Option<&str>,
        source: FailureSource,
    ) -> usize {
        let outcomes = join_all(
            templates
                .iter()
                .map(|template| self.dispatch_or_record(template, correlation_id, source)),
        )
        .await;
        let dispatched = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        if dispatched < templates.len() {
            warn!(
                dispatched,
                failed = templates.len() - dispatched,
                "⚠️ Some released jobs could not be dispatched"
            );
        }
        dispatched
    }

    /// Publish the resume trigger for a job that just left Paused
    #[instrument(skip(self))]
    pub async fn publish_resume_trigger(&self, partition_id: &str, job_id: &str) -> Result<()> {
        let envelope = ResumeJobMessage::new(partition_id, job_id).into_envelope(
            &self.queues.resume_job_task_classifier,
            self.queues.resume_job_task_api_version,
            &self.queues.resume_job_queue,
        );
        self.gateway
            .publish(&self.queues.resume_job_queue, &envelope)
            .await
            .map_err(JobServiceError::from)?;
        info!(queue = %self.queues.resume_job_queue, "▶️ Resume trigger published");
        Ok(())
    }
}
