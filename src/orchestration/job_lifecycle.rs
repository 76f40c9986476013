//! # Job Lifecycle Manager
//!
//! Client-facing operations on jobs: create, read, list, delete, expiry
//! lookup, and the cancel/pause/resume/fail transitions. Every call validates its inputs first
//! and fails `BadRequest` without touching the store when they are malformed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use job_service::orchestration::JobLifecycleManager;
//! use job_service::models::NewJob;
//!
//! # async fn example(manager: JobLifecycleManager, job: NewJob) -> job_service::error::Result<()> {
//! manager.create_job("tenant-a", "nightly-report", job, Some("corr-1")).await?;
//! let status = manager.get_job_status("tenant-a", "nightly-report").await?;
//! manager.pause_job("tenant-a", "nightly-report", Some("corr-2")).await?;
//! # Ok(())
//! # }
//! ```

use super::task_dispatcher::TaskDispatcher;
use crate::config::SuspendedPartitions;
use crate::constants::sources;
use crate::error::{JobServiceError, Result};
use crate::logging::log_job_operation;
use crate::models::{ExpirationPolicy, Failure, Job, JobActivity, JobExpiration, NewJob};
use crate::query_builder::JobQuery;
use crate::state_machine::{JobEvent, JobStatus, TransitionDecision};
use crate::store::{CreateJobRecord, CreateOutcome, JobStore};
use crate::validation::{validate_job_id, validate_new_job, validate_partition_id};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Result of a create request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCreation {
    Created,
    /// The same definition was already stored
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct JobLifecycleManager {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<TaskDispatcher>,
    suspended: SuspendedPartitions,
    default_expiry: ExpirationPolicy,
}

impl JobLifecycleManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<TaskDispatcher>,
        suspended: SuspendedPartitions,
    ) -> Self {
        Self {
            store,
            dispatcher,
            suspended,
            default_expiry: ExpirationPolicy::default(),
        }
    }

    /// Policy for jobs created without one
    pub fn with_default_expiry(mut self, default_expiry: ExpirationPolicy) -> Self {
        self.default_expiry = default_expiry;
        self
    }

    /// Create a job, dispatching its task immediately when nothing blocks it
    #[instrument(skip(self, job), fields(partition_id = %partition_id, job_id = %job_id, correlation_id = ?correlation_id))]
    pub async fn create_job(
        &self,
        partition_id: &str,
        job_id: &str,
        job: NewJob,
        correlation_id: Option<&str>,
    ) -> Result<JobCreation> {
        let prerequisites = validate_new_job(partition_id, job_id, &job)?;
        let expiration = job
            .expiry
            .as_ref()
            .unwrap_or(&self.default_expiry)
            .resolve(Utc::now())?;
        let record = CreateJobRecord::new(
            partition_id,
            job_id,
            job,
            prerequisites,
            self.suspended.is_suspended(partition_id),
        )
        .with_expiration(expiration);

        match self.store.create_job(record).await? {
            CreateOutcome::Unchanged => {
                log_job_operation("create", partition_id, job_id, "unchanged", correlation_id, None);
                Ok(JobCreation::Unchanged)
            }
            CreateOutcome::Created { dispatch: None } => {
                log_job_operation("create", partition_id, job_id, "waiting", correlation_id, None);
                Ok(JobCreation::Created)
            }
            CreateOutcome::Created {
                dispatch: Some(template),
            } => {
                if let Err(err) = self
                    .dispatcher
                    .dispatch_or_record(&template, correlation_id, sources::create_job)
                    .await
                {
                    error!(error = %err, "❌ Job created but its task could not be queued");
                    return Err(JobServiceError::service_unavailable(
                        "Failed to add task data to the queue.",
                    ));
                }
                log_job_operation("create", partition_id, job_id, "dispatched", correlation_id, None);
                Ok(JobCreation::Created)
            }
        }
    }

    pub async fn get_job(&self, partition_id: &str, job_id: &str) -> Result<Job> {
        validate_partition_id(partition_id)?;
        validate_job_id(job_id)?;
        self.store.get_job(partition_id, job_id).await
    }

    pub async fn list_jobs(&self, partition_id: &str, query: &JobQuery) -> Result<Vec<Job>> {
        validate_partition_id(partition_id)?;
        self.store.list_jobs(partition_id, query).await
    }

    pub async fn count_jobs(&self, partition_id: &str, query: &JobQuery) -> Result<i64> {
        validate_partition_id(partition_id)?;
        self.store.count_jobs(partition_id, query).await
    }

    #[instrument(skip(self), fields(correlation_id = ?correlation_id))]
    pub async fn delete_job(&self, partition_id: &str, job_id: &str, correlation_id: Option<&str>) -> Result<()> {
        validate_partition_id(partition_id)?;
        validate_job_id(job_id)?;
        self.store.delete_job(partition_id, job_id).await?;
        log_job_operation("delete", partition_id, job_id, "deleted", correlation_id, None);
        Ok(())
    }

    #[instrument(skip(self), fields(correlation_id = ?correlation_id))]
    pub async fn cancel_job(
        &self,
        partition_id: &str,
        job_id: &str,
        correlation_id: Option<&str>,
    ) -> Result<TransitionDecision> {
        self.apply_client_event(partition_id, job_id, JobEvent::Cancel, correlation_id)
            .await
    }

    #[instrument(skip(self), fields(correlation_id = ?correlation_id))]
    pub async fn pause_job(
        &self,
        partition_id: &str,
        job_id: &str,
        correlation_id: Option<&str>,
    ) -> Result<TransitionDecision> {
        self.apply_client_event(partition_id, job_id, JobEvent::Pause, correlation_id)
            .await
    }

    /// Move a paused job back to Active and publish its resume trigger
    #[instrument(skip(self), fields(correlation_id = ?correlation_id))]
    pub async fn resume_job(
        &self,
        partition_id: &str,
        job_id: &str,
        correlation_id: Option<&str>,
    ) -> Result<TransitionDecision> {
        let decision = self
            .apply_client_event(partition_id, job_id, JobEvent::Resume, correlation_id)
            .await?;

        if decision.is_transition() {
            // The scheduler poll still releases the job if the trigger is lost
            if let Err(err) = self
                .dispatcher
                .publish_resume_trigger(partition_id, job_id)
                .await
            {
                warn!(error = %err, "⚠️ Resume trigger could not be published");
            }
        }
        Ok(decision)
    }

    /// Explicit transition to Failed, appending the failure
    #[instrument(skip(self, failure), fields(failure_id = %failure.failure_id, correlation_id = ?correlation_id))]
    pub async fn fail_job(
        &self,
        partition_id: &str,
        job_id: &str,
        failure: Failure,
        correlation_id: Option<&str>,
    ) -> Result<TransitionDecision> {
        validate_partition_id(partition_id)?;
        validate_job_id(job_id)?;
        let decision = self.store.fail_job(partition_id, job_id, failure).await?;
        log_job_operation(
            "fail",
            partition_id,
            job_id,
            decision.resulting_status().as_str(),
            correlation_id,
            None,
        );
        Ok(decision)
    }

    /// The expiration policy stored with the job
    pub async fn get_job_expiry(&self, partition_id: &str, job_id: &str) -> Result<JobExpiration> {
        validate_partition_id(partition_id)?;
        validate_job_id(job_id)?;
        self.store.job_expiration(partition_id, job_id).await
    }

    /// The policy a job created now without its own would receive
    pub fn default_expiration(&self) -> Result<JobExpiration> {
        self.default_expiry.resolve(Utc::now())
    }

    pub async fn get_job_status(&self, partition_id: &str, job_id: &str) -> Result<JobStatus> {
        Ok(self.get_job(partition_id, job_id).await?.status)
    }

    /// Status-check answer for workers; unknown jobs report inactive
    pub async fn is_job_active(&self, partition_id: &str, job_id: &str) -> Result<JobActivity> {
        let active = match self.get_job(partition_id, job_id).await {
            Ok(job) => job.status.is_active(),
            Err(JobServiceError::NotFound { .. }) => false,
            Err(err) => return Err(err),
        };
        Ok(JobActivity {
            active,
            status_check_interval_seconds: self.dispatcher.queues().status_check_interval_seconds,
        })
    }

    async fn apply_client_event(
        &self,
        partition_id: &str,
        job_id: &str,
        event: JobEvent,
        correlation_id: Option<&str>,
    ) -> Result<TransitionDecision> {
        validate_partition_id(partition_id)?;
        validate_job_id(job_id)?;
        let decision = self.store.apply_event(partition_id, job_id, event).await?;

        match decision {
            TransitionDecision::Transition { from, to } => {
                let details = format!("{from} -> {to}");
                log_job_operation(
                    event.event_type(),
                    partition_id,
                    job_id,
                    to.as_str(),
                    correlation_id,
                    Some(&details),
                );
            }
            TransitionDecision::NoOp(status) => {
                debug!(event = event.event_type(), status = %status, "Event left job unchanged");
            }
        }
        Ok(decision)
    }
}
