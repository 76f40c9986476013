//! # Job Store
//!
//! Durable record of jobs, their prerequisite graph, labels, pending task
//! templates and completed subtask ids.
//!
//! ## Overview
//!
//! [`JobStore`] is the only write path for job state. Every mutation that must
//! be atomic with respect to concurrent callers (create, edge deletion plus the
//! eligibility check, failure appends) runs as a single unit inside the
//! implementation:
//!
//! - [`InMemoryJobStore`] holds all state behind one `parking_lot::Mutex` and
//!   never awaits while the lock is held.
//! - [`PgJobStore`] runs each operation in one PostgreSQL transaction and locks
//!   the affected job rows with `SELECT ... FOR UPDATE`.
//!
//! Both share the pure decision logic in [`crate::state_machine`] and
//! [`crate::orchestration::dependency_resolver`], so they agree on every
//! transition and release.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;

use crate::config::SuspendedPartitions;
use crate::error::Result;
use crate::models::{
    Failure, Job, JobDependency, JobExpiration, JobTaskId, JobTaskTemplate, LabelMap, NewJob,
    TaskDefinition,
};
use crate::query_builder::JobQuery;
use crate::state_machine::{JobEvent, JobStatus, TransitionDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// A validated create request, ready for the store
#[derive(Debug, Clone, PartialEq)]
pub struct CreateJobRecord {
    pub partition_id: String,
    pub job_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub external_data: Option<String>,
    pub task: TaskDefinition,
    /// Normalized: trimmed, non-blank, de-duplicated
    pub prerequisite_job_ids: Vec<String>,
    pub delay_seconds: i32,
    pub labels: LabelMap,
    pub partition_suspended: bool,
    pub expiration: JobExpiration,
}

impl CreateJobRecord {
    pub fn new(
        partition_id: impl Into<String>,
        job_id: impl Into<String>,
        job: NewJob,
        prerequisite_job_ids: Vec<String>,
        partition_suspended: bool,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            job_id: job_id.into(),
            name: job.name,
            description: job.description,
            external_data: job.external_data,
            task: job.task,
            prerequisite_job_ids,
            delay_seconds: job.delay_seconds,
            labels: job.labels,
            partition_suspended,
            expiration: JobExpiration::default(),
        }
    }

    pub fn with_expiration(mut self, expiration: JobExpiration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn job_hash(&self) -> String {
        self.task.definition_hash()
    }

    /// Template handed back for immediate dispatch when nothing blocks the job
    pub fn template(&self) -> JobTaskTemplate {
        JobTaskTemplate::new(&self.partition_id, &self.job_id, self.task.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new job row was written. `dispatch` is set when the job is
    /// immediately eligible; otherwise the template was persisted.
    Created { dispatch: Option<JobTaskTemplate> },
    /// A job with the same definition already exists
    Unchanged,
}

/// Task ids completed under one job, reported together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionBatch {
    pub partition_id: String,
    pub job_id: String,
    pub task_ids: BTreeSet<JobTaskId>,
}

impl CompletionBatch {
    pub fn new(partition_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            job_id: job_id.into(),
            task_ids: BTreeSet::new(),
        }
    }

    /// Batch holding a single task id
    pub fn single(task_id: JobTaskId) -> Self {
        let mut batch = Self::new(task_id.partition_id(), task_id.job_id());
        batch.task_ids.insert(task_id);
        batch
    }

    pub fn add(&mut self, task_id: JobTaskId) -> bool {
        self.task_ids.insert(task_id)
    }

    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// Status after the batch was applied
    pub status: JobStatus,
    /// True only when this batch moved the job to Completed
    pub job_completed: bool,
    /// Dependents that became eligible and must now be dispatched
    pub released: Vec<JobTaskTemplate>,
}

/// Result of one expiration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirationOutcome {
    /// `(partition_id, job_id)` moved to Expired
    pub expired: Vec<(String, String)>,
    /// `(partition_id, job_id)` removed by a delete policy
    pub deleted: Vec<(String, String)>,
    /// Dependents failed because a prerequisite expired or was deleted
    pub failed_dependents: Vec<(String, String)>,
}

impl ExpirationOutcome {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.deleted.is_empty() && self.failed_dependents.is_empty()
    }
}

#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Insert a job with its edges, labels and (when blocked) template.
    /// Fails Forbidden when the job exists with a different definition.
    async fn create_job(&self, record: CreateJobRecord) -> Result<CreateOutcome>;

    async fn get_job(&self, partition_id: &str, job_id: &str) -> Result<Job>;

    async fn list_jobs(&self, partition_id: &str, query: &JobQuery) -> Result<Vec<Job>>;

    /// Number of jobs matching the query, ignoring pagination
    async fn count_jobs(&self, partition_id: &str, query: &JobQuery) -> Result<i64>;

    /// Remove the job, its template, its own edges and labels. Edges of other
    /// jobs naming it as a prerequisite are left in place.
    async fn delete_job(&self, partition_id: &str, job_id: &str) -> Result<()>;

    /// Apply a client event (cancel, pause, resume). Terminal transitions
    /// discard any pending template.
    async fn apply_event(
        &self,
        partition_id: &str,
        job_id: &str,
        event: JobEvent,
    ) -> Result<TransitionDecision>;

    /// Append the failure and move the job to Failed
    async fn fail_job(
        &self,
        partition_id: &str,
        job_id: &str,
        failure: Failure,
    ) -> Result<TransitionDecision>;

    async fn report_progress(
        &self,
        partition_id: &str,
        job_id: &str,
        percentage_complete: Option<f32>,
    ) -> Result<TransitionDecision>;

    /// Retry details are not persisted; the report counts as progress
    async fn report_retry(
        &self,
        partition_id: &str,
        job_id: &str,
        retry_details: &str,
    ) -> Result<TransitionDecision> {
        tracing::debug!(
            partition_id = %partition_id,
            job_id = %job_id,
            retry_details = %retry_details,
            "🔁 Job task retry reported"
        );
        self.report_progress(partition_id, job_id, None).await
    }

    /// Append a failure without changing status
    async fn report_failure(&self, partition_id: &str, job_id: &str, failure: Failure) -> Result<()>;

    /// Record completed task ids and, if the job's task set collapses to its
    /// root, complete the job and release its dependents in the same unit.
    async fn report_completions(
        &self,
        batch: &CompletionBatch,
        suspended: &SuspendedPartitions,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome>;

    /// Delete every edge naming `prerequisite_job_id` and release the
    /// dependents that became eligible. Invoked once per prerequisite reaching
    /// Completed.
    async fn release_dependents(
        &self,
        partition_id: &str,
        prerequisite_job_id: &str,
        partition_suspended: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobTaskTemplate>>;

    /// Re-evaluate a single job's template, releasing it if eligible
    async fn release_job(
        &self,
        partition_id: &str,
        job_id: &str,
        partition_suspended: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<JobTaskTemplate>>;

    /// Release up to `limit` templated jobs whose delay has elapsed
    async fn release_eligible_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        suspended: &SuspendedPartitions,
    ) -> Result<Vec<JobTaskTemplate>>;

    /// Outstanding edges of a dependent job
    async fn dependency_edges(&self, partition_id: &str, job_id: &str) -> Result<Vec<JobDependency>>;

    /// The persisted template of a blocked job, if any
    async fn task_template(&self, partition_id: &str, job_id: &str) -> Result<Option<JobTaskTemplate>>;

    /// Expiration policy stored with the job
    async fn job_expiration(&self, partition_id: &str, job_id: &str) -> Result<JobExpiration>;

    /// Expire or delete up to `limit` jobs whose policy for their current
    /// status is due at `now`. With `propagate_failures`, non-terminal
    /// dependents of those jobs are failed, transitively.
    async fn apply_expiration_policies(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        propagate_failures: bool,
    ) -> Result<ExpirationOutcome>;

    /// Cheap round-trip that touches no job state
    async fn health_check(&self) -> Result<()>;
}
