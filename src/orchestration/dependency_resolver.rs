//! # Dependency Resolver
//!
//! Decides when a blocked job may dispatch, and runs the cascade that releases
//! dependents once a prerequisite completes.
//!
//! ## Eligibility
//!
//! [`EligibilityCheck::evaluate`] is the single decision function used by both
//! job stores, at create time and on every cascade, scheduler poll or resume
//! trigger. For a job that still owns a template the rules apply in order:
//!
//! 1. open prerequisite edges keep it blocked
//! 2. a suspended partition keeps it blocked
//! 3. an unexpired delay defers it and pins `eligible_to_run_date`
//! 4. a paused job is held, keeping its template for the resume trigger
//! 5. a waiting or active job is released
//!
//! Finished jobs are never released.
//!
//! ## Cascade
//!
//! [`DependencyResolver`] applies completion batches through the store (which
//! deletes edges and evaluates dependents in the same transaction) and
//! dispatches whatever the store released. A failed dispatch is recorded on the
//! dependent and does not stop the remaining dispatches.

use super::task_dispatcher::TaskDispatcher;
use crate::config::SuspendedPartitions;
use crate::constants::sources;
use crate::error::Result;
use crate::models::JobTaskTemplate;
use crate::state_machine::JobStatus;
use crate::store::{CompletionBatch, CompletionOutcome, JobStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Outcome of evaluating a templated job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Open edges or a suspended partition
    Blocked,
    /// Delay not yet elapsed; persist `eligible_at`
    Deferred { eligible_at: DateTime<Utc> },
    /// Eligible but paused; persist `eligible_at` and keep the template
    Held { eligible_at: DateTime<Utc> },
    /// Delete the template, mark Active and dispatch
    Release,
    /// Finished jobs never dispatch
    Never,
}

/// Inputs to the eligibility rules for one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityCheck {
    pub open_edges: i64,
    pub partition_suspended: bool,
    pub status: JobStatus,
    pub delay_seconds: i32,
    pub eligible_to_run_date: Option<DateTime<Utc>>,
}

impl EligibilityCheck {
    /// Placement of a freshly created job, before any row exists
    pub fn for_new_job(open_edges: i64, partition_suspended: bool, delay_seconds: i32) -> Self {
        Self {
            open_edges,
            partition_suspended,
            status: JobStatus::Waiting,
            delay_seconds,
            eligible_to_run_date: None,
        }
    }

    pub fn evaluate(&self, now: DateTime<Utc>) -> Eligibility {
        if self.status.is_terminal() {
            return Eligibility::Never;
        }
        if self.open_edges > 0 || self.partition_suspended {
            return Eligibility::Blocked;
        }

        let eligible_at = self
            .eligible_to_run_date
            .unwrap_or_else(|| now + Duration::seconds(i64::from(self.delay_seconds.max(0))));
        if eligible_at > now {
            return Eligibility::Deferred { eligible_at };
        }

        match self.status {
            JobStatus::Paused => Eligibility::Held { eligible_at },
            JobStatus::Waiting | JobStatus::Active => Eligibility::Release,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed | JobStatus::Expired => {
                Eligibility::Never
            }
        }
    }
}

/// Applies completions and dispatches the dependents they release
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<TaskDispatcher>,
    suspended: SuspendedPartitions,
}

impl DependencyResolver {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<TaskDispatcher>,
        suspended: SuspendedPartitions,
    ) -> Self {
        Self {
            store,
            dispatcher,
            suspended,
        }
    }

    /// Apply a batch of completed task ids for one job and dispatch released dependents
    #[instrument(skip(self, batch), fields(partition_id = %batch.partition_id, job_id = %batch.job_id, tasks = batch.len()))]
    pub async fn complete_tasks(&self, batch: &CompletionBatch) -> Result<CompletionOutcome> {
        let outcome = self
            .store
            .report_completions(batch, &self.suspended, Utc::now())
            .await?;

        if outcome.job_completed {
            info!(
                partition_id = %batch.partition_id,
                job_id = %batch.job_id,
                released = outcome.released.len(),
                "✅ Job completed"
            );
        } else {
            debug!(status = %outcome.status, "Completion batch applied");
        }

        self.dispatch_released(&outcome.released).await;
        Ok(outcome)
    }

    /// Cascade for a prerequisite that reached Completed outside a batch
    #[instrument(skip(self))]
    pub async fn on_prerequisite_satisfied(
        &self,
        partition_id: &str,
        prerequisite_job_id: &str,
    ) -> Result<Vec<JobTaskTemplate>> {
        let released = self
            .store
            .release_dependents(
                partition_id,
                prerequisite_job_id,
                self.suspended.is_suspended(partition_id),
                Utc::now(),
            )
            .await?;
        self.dispatch_released(&released).await;
        Ok(released)
    }

    async fn dispatch_released(&self, released: &[JobTaskTemplate]) {
        if released.is_empty() {
            return;
        }
        info!(count = released.len(), "🔓 Releasing dependent jobs");
        self.dispatcher
            .dispatch_all(released, None, sources::tracking_proxy)
            .await;
    }
}
