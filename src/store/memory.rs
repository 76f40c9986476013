//! In-process job store.
//!
//! All state sits behind one `parking_lot::Mutex`; every operation takes the
//! lock once, does its work synchronously and releases it, which gives each
//! operation the same atomicity a PostgreSQL transaction gives [`super::PgJobStore`].

use super::{
    CompletionBatch, CompletionOutcome, CreateJobRecord, CreateOutcome, ExpirationOutcome, JobStore,
};
use crate::config::{QueryConfig, SuspendedPartitions};
use crate::constants::{failures, sources};
use crate::error::{JobServiceError, Result};
use crate::models::{
    CompletedTaskSet, ExpirationOperation, Failure, Job, JobDependency, JobExpiration,
    JobTaskTemplate, TaskDefinition,
};
use crate::orchestration::dependency_resolver::{Eligibility, EligibilityCheck};
use crate::query_builder::JobQuery;
use crate::state_machine::{evaluate, JobEvent, JobStatus, TransitionDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

type JobKey = (String, String);

fn key(partition_id: &str, job_id: &str) -> JobKey {
    (partition_id.to_string(), job_id.to_string())
}

/// Append unless the same failure was already recorded
fn append_once(failures: &mut Vec<Failure>, failure: Failure) -> bool {
    if failures.iter().any(|existing| existing.repeats(&failure)) {
        return false;
    }
    failures.push(failure);
    true
}

#[derive(Debug, Default)]
struct StoreState {
    jobs: BTreeMap<JobKey, Job>,
    edges: BTreeSet<JobDependency>,
    templates: BTreeMap<JobKey, TaskDefinition>,
    completed_tasks: BTreeMap<JobKey, CompletedTaskSet>,
    expirations: BTreeMap<JobKey, JobExpiration>,
}

impl StoreState {
    fn job(&self, partition_id: &str, job_id: &str) -> Result<&Job> {
        self.jobs
            .get(&key(partition_id, job_id))
            .ok_or_else(|| JobServiceError::job_not_found(job_id))
    }

    fn job_mut(&mut self, partition_id: &str, job_id: &str) -> Result<&mut Job> {
        self.jobs
            .get_mut(&key(partition_id, job_id))
            .ok_or_else(|| JobServiceError::job_not_found(job_id))
    }

    fn open_edges(&self, partition_id: &str, job_id: &str) -> i64 {
        self.edges
            .iter()
            .filter(|edge| edge.partition_id == partition_id && edge.job_id == job_id)
            .count() as i64
    }

    fn discard_pending_work(&mut self, job_key: &JobKey) {
        self.templates.remove(job_key);
        self.completed_tasks.remove(job_key);
    }

    /// Drop the job and everything it owns. Edges of other jobs naming it stay.
    fn remove_job(&mut self, job_key: &JobKey) -> bool {
        if self.jobs.remove(job_key).is_none() {
            return false;
        }
        self.discard_pending_work(job_key);
        self.expirations.remove(job_key);
        let (partition_id, job_id) = job_key;
        self.edges
            .retain(|edge| !(&edge.partition_id == partition_id && &edge.job_id == job_id));
        true
    }

    /// Fail every non-terminal job depending on `prerequisite`, transitively
    fn fail_dependents(&mut self, prerequisite: &JobKey, now: DateTime<Utc>) -> Vec<JobKey> {
        let mut failed = Vec::new();
        let mut pending = vec![prerequisite.clone()];

        while let Some((partition_id, prerequisite_job_id)) = pending.pop() {
            let dependents: BTreeSet<String> = self
                .edges
                .iter()
                .filter(|edge| {
                    edge.partition_id == partition_id && edge.prerequisite_job_id == prerequisite_job_id
                })
                .map(|edge| edge.job_id.clone())
                .collect();

            for dependent in dependents {
                let dependent_key = key(&partition_id, &dependent);
                let Some(job) = self.jobs.get_mut(&dependent_key) else {
                    continue;
                };
                let Ok(TransitionDecision::Transition { to, .. }) =
                    evaluate(&dependent, job.status, JobEvent::Fail)
                else {
                    continue;
                };
                job.status = to;
                job.last_update_time = now;
                append_once(
                    &mut job.failures,
                    Failure::new(
                        failures::PREREQUISITE_EXPIRED,
                        sources::scheduled_executor(&dependent),
                        format!("Prerequisite job {prerequisite_job_id} expired before it completed."),
                    ),
                );
                self.discard_pending_work(&dependent_key);
                failed.push(dependent_key.clone());
                pending.push(dependent_key);
            }
        }
        failed
    }

    /// Run the eligibility rules on a templated job and apply the result
    fn evaluate_template(
        &mut self,
        partition_id: &str,
        job_id: &str,
        partition_suspended: bool,
        now: DateTime<Utc>,
    ) -> Option<JobTaskTemplate> {
        let job_key = key(partition_id, job_id);
        if !self.templates.contains_key(&job_key) {
            return None;
        }
        let open_edges = self.open_edges(partition_id, job_id);
        let job = self.jobs.get_mut(&job_key)?;

        let check = EligibilityCheck {
            open_edges,
            partition_suspended,
            status: job.status,
            delay_seconds: job.delay_seconds,
            eligible_to_run_date: job.eligible_to_run_date,
        };
        match check.evaluate(now) {
            Eligibility::Blocked | Eligibility::Never => None,
            Eligibility::Deferred { eligible_at } | Eligibility::Held { eligible_at } => {
                job.eligible_to_run_date = Some(eligible_at);
                None
            }
            Eligibility::Release => {
                job.status = JobStatus::Active;
                job.last_update_time = now;
                let task = self.templates.remove(&job_key)?;
                Some(JobTaskTemplate::new(partition_id, job_id, task))
            }
        }
    }

    fn release_dependents(
        &mut self,
        partition_id: &str,
        prerequisite_job_id: &str,
        partition_suspended: bool,
        now: DateTime<Utc>,
    ) -> Vec<JobTaskTemplate> {
        let satisfied: Vec<JobDependency> = self
            .edges
            .iter()
            .filter(|edge| {
                edge.partition_id == partition_id && edge.prerequisite_job_id == prerequisite_job_id
            })
            .cloned()
            .collect();

        let mut dependents = BTreeSet::new();
        for edge in satisfied {
            self.edges.remove(&edge);
            dependents.insert(edge.job_id);
        }

        dependents
            .into_iter()
            .filter_map(|dependent| {
                self.evaluate_template(partition_id, &dependent, partition_suspended, now)
            })
            .collect()
    }
}

/// Job store kept entirely in process memory
#[derive(Debug, Clone)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<StoreState>>,
    query: QueryConfig,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_query_config(QueryConfig::default())
    }

    pub fn with_query_config(query: QueryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            query,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate losing the backing store; every call then fails ServiceUnavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(JobServiceError::service_unavailable(
                "The job store is currently unavailable.",
            ))
        }
    }

    /// Number of stored jobs across all partitions
    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    #[instrument(skip(self, record), fields(partition_id = %record.partition_id, job_id = %record.job_id))]
    async fn create_job(&self, record: CreateJobRecord) -> Result<CreateOutcome> {
        self.ensure_available()?;
        let job_hash = record.job_hash();
        let job_key = key(&record.partition_id, &record.job_id);
        let mut state = self.state.lock();

        if let Some(existing) = state.jobs.get(&job_key) {
            if existing.job_hash == job_hash {
                debug!("Matching job already exists so nothing to do");
                return Ok(CreateOutcome::Unchanged);
            }
            return Err(JobServiceError::forbidden(format!(
                "job_id {} already exists with a different task definition.",
                record.job_id
            )));
        }

        let now = Utc::now();
        for prerequisite in &record.prerequisite_job_ids {
            let completed = state
                .jobs
                .get(&key(&record.partition_id, prerequisite))
                .is_some_and(|job| job.status == JobStatus::Completed);
            if !completed {
                state.edges.insert(JobDependency::new(
                    &record.partition_id,
                    &record.job_id,
                    prerequisite,
                ));
            }
        }
        let open_edges = state.open_edges(&record.partition_id, &record.job_id);
        state.expirations.insert(job_key.clone(), record.expiration);

        let placement =
            EligibilityCheck::for_new_job(open_edges, record.partition_suspended, record.delay_seconds)
                .evaluate(now);
        let (status, eligible_to_run_date) = match placement {
            Eligibility::Release => (JobStatus::Active, None),
            Eligibility::Deferred { eligible_at } => (JobStatus::Waiting, Some(eligible_at)),
            _ => (JobStatus::Waiting, None),
        };

        let dispatch = if placement == Eligibility::Release {
            Some(record.template())
        } else {
            state.templates.insert(job_key.clone(), record.task.clone());
            None
        };

        state.jobs.insert(
            job_key,
            Job {
                partition_id: record.partition_id,
                job_id: record.job_id,
                name: record.name,
                description: record.description,
                external_data: record.external_data,
                status,
                percentage_complete: 0.0,
                failures: Vec::new(),
                labels: record.labels,
                create_time: now,
                last_update_time: now,
                job_hash,
                delay_seconds: record.delay_seconds,
                eligible_to_run_date,
            },
        );

        info!(status = %status, open_edges, "✅ Job created");
        Ok(CreateOutcome::Created { dispatch })
    }

    async fn get_job(&self, partition_id: &str, job_id: &str) -> Result<Job> {
        self.ensure_available()?;
        self.state.lock().job(partition_id, job_id).cloned()
    }

    async fn list_jobs(&self, partition_id: &str, query: &JobQuery) -> Result<Vec<Job>> {
        self.ensure_available()?;
        let jobs: Vec<Job> = self
            .state
            .lock()
            .jobs
            .values()
            .filter(|job| job.partition_id == partition_id)
            .cloned()
            .collect();
        Ok(query.apply(jobs, self.query.default_page_size, self.query.max_page_size))
    }

    async fn count_jobs(&self, partition_id: &str, query: &JobQuery) -> Result<i64> {
        self.ensure_available()?;
        let count = self
            .state
            .lock()
            .jobs
            .values()
            .filter(|job| job.partition_id == partition_id && query.matches(job))
            .count();
        Ok(count as i64)
    }

    #[instrument(skip(self))]
    async fn delete_job(&self, partition_id: &str, job_id: &str) -> Result<()> {
        self.ensure_available()?;
        if !self.state.lock().remove_job(&key(partition_id, job_id)) {
            return Err(JobServiceError::job_not_found(job_id));
        }
        info!("🗑️ Job deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(event = event.event_type()))]
    async fn apply_event(
        &self,
        partition_id: &str,
        job_id: &str,
        event: JobEvent,
    ) -> Result<TransitionDecision> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        let job = state.job_mut(partition_id, job_id)?;
        let decision = evaluate(job_id, job.status, event)?;

        if let TransitionDecision::Transition { to, .. } = decision {
            job.status = to;
            job.last_update_time = Utc::now();
            if to.is_terminal() {
                state.discard_pending_work(&key(partition_id, job_id));
            }
        }
        Ok(decision)
    }

    #[instrument(skip(self, failure), fields(failure_id = %failure.failure_id))]
    async fn fail_job(
        &self,
        partition_id: &str,
        job_id: &str,
        failure: Failure,
    ) -> Result<TransitionDecision> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        let job = state.job_mut(partition_id, job_id)?;
        let decision = evaluate(job_id, job.status, JobEvent::Fail)?;

        let appended = append_once(&mut job.failures, failure);
        if appended || decision.is_transition() {
            job.last_update_time = Utc::now();
        }
        if let TransitionDecision::Transition { to, .. } = decision {
            job.status = to;
            state.discard_pending_work(&key(partition_id, job_id));
        }
        Ok(decision)
    }

    async fn report_progress(
        &self,
        partition_id: &str,
        job_id: &str,
        percentage_complete: Option<f32>,
    ) -> Result<TransitionDecision> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        let job = state.job_mut(partition_id, job_id)?;
        let decision = evaluate(job_id, job.status, JobEvent::Progress)?;

        let mut changed = false;
        if let TransitionDecision::Transition { to, .. } = decision {
            job.status = to;
            changed = true;
        }
        if let Some(percentage) = percentage_complete {
            if !job.status.is_terminal() {
                job.percentage_complete = percentage.clamp(0.0, 100.0);
                changed = true;
            }
        }
        if changed {
            job.last_update_time = Utc::now();
        }
        Ok(decision)
    }

    async fn report_failure(&self, partition_id: &str, job_id: &str, failure: Failure) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        let job = state.job_mut(partition_id, job_id)?;
        if append_once(&mut job.failures, failure) {
            job.last_update_time = Utc::now();
        } else {
            debug!(partition_id = %partition_id, job_id = %job_id, "Failure already recorded");
        }
        Ok(())
    }

    #[instrument(skip(self, batch, suspended), fields(partition_id = %batch.partition_id, job_id = %batch.job_id))]
    async fn report_completions(
        &self,
        batch: &CompletionBatch,
        suspended: &SuspendedPartitions,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        self.ensure_available()?;
        let (partition_id, job_id) = (batch.partition_id.as_str(), batch.job_id.as_str());
        let job_key = key(partition_id, job_id);
        let mut state = self.state.lock();

        let status = state.job(partition_id, job_id)?.status;
        if status.is_terminal() {
            return Ok(CompletionOutcome {
                status,
                job_completed: false,
                released: Vec::new(),
            });
        }

        let root_reported = batch.task_ids.iter().any(|task_id| task_id.is_root());
        let collapsed_to_root = {
            let completed = state.completed_tasks.entry(job_key.clone()).or_default();
            for task_id in &batch.task_ids {
                completed.insert(task_id);
            }
            completed.collapse();
            completed.is_complete()
        };

        if !(root_reported || collapsed_to_root) {
            let job = state.job_mut(partition_id, job_id)?;
            let decision = evaluate(job_id, job.status, JobEvent::Progress)?;
            if let TransitionDecision::Transition { to, .. } = decision {
                job.status = to;
                job.last_update_time = now;
            }
            return Ok(CompletionOutcome {
                status: job.status,
                job_completed: false,
                released: Vec::new(),
            });
        }

        let job = state.job_mut(partition_id, job_id)?;
        evaluate(job_id, job.status, JobEvent::Complete)?;
        job.status = JobStatus::Completed;
        job.percentage_complete = 100.0;
        job.last_update_time = now;
        state.discard_pending_work(&job_key);

        let released =
            state.release_dependents(partition_id, job_id, suspended.is_suspended(partition_id), now);
        Ok(CompletionOutcome {
            status: JobStatus::Completed,
            job_completed: true,
            released,
        })
    }

    async fn release_dependents(
        &self,
        partition_id: &str,
        prerequisite_job_id: &str,
        partition_suspended: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobTaskTemplate>> {
        self.ensure_available()?;
        Ok(self
            .state
            .lock()
            .release_dependents(partition_id, prerequisite_job_id, partition_suspended, now))
    }

    async fn release_job(
        &self,
        partition_id: &str,
        job_id: &str,
        partition_suspended: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<JobTaskTemplate>> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        state.job(partition_id, job_id)?;
        Ok(state.evaluate_template(partition_id, job_id, partition_suspended, now))
    }

    async fn release_eligible_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        suspended: &SuspendedPartitions,
    ) -> Result<Vec<JobTaskTemplate>> {
        self.ensure_available()?;
        let mut state = self.state.lock();

        let candidates: Vec<JobKey> = state
            .templates
            .keys()
            .filter(|(partition_id, job_id)| {
                !suspended.is_suspended(partition_id)
                    && state.open_edges(partition_id, job_id) == 0
                    && state.jobs.get(&key(partition_id, job_id)).is_some_and(|job| {
                        job.status.accepts_dispatch()
                            && job.eligible_to_run_date.map_or(true, |date| date <= now)
                    })
            })
            .cloned()
            .collect();

        let mut released = Vec::new();
        for (partition_id, job_id) in candidates {
            if released.len() as i64 >= limit {
                break;
            }
            if let Some(template) = state.evaluate_template(&partition_id, &job_id, false, now) {
                released.push(template);
            }
        }
        Ok(released)
    }

    async fn dependency_edges(&self, partition_id: &str, job_id: &str) -> Result<Vec<JobDependency>> {
        self.ensure_available()?;
        Ok(self
            .state
            .lock()
            .edges
            .iter()
            .filter(|edge| edge.partition_id == partition_id && edge.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn task_template(&self, partition_id: &str, job_id: &str) -> Result<Option<JobTaskTemplate>> {
        self.ensure_available()?;
        Ok(self
            .state
            .lock()
            .templates
            .get(&key(partition_id, job_id))
            .map(|task| JobTaskTemplate::new(partition_id, job_id, task.clone())))
    }

    async fn job_expiration(&self, partition_id: &str, job_id: &str) -> Result<JobExpiration> {
        self.ensure_available()?;
        let state = self.state.lock();
        state.job(partition_id, job_id)?;
        Ok(state
            .expirations
            .get(&key(partition_id, job_id))
            .copied()
            .unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn apply_expiration_policies(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        propagate_failures: bool,
    ) -> Result<ExpirationOutcome> {
        self.ensure_available()?;
        let mut state = self.state.lock();

        let due: Vec<(JobKey, ExpirationOperation)> = state
            .jobs
            .iter()
            .filter_map(|(job_key, job)| {
                let expiration = state.expirations.get(job_key).copied().unwrap_or_default();
                expiration
                    .due_operation(job.status, job.create_time, job.last_update_time, now)
                    .map(|operation| (job_key.clone(), operation))
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();

        let mut outcome = ExpirationOutcome::default();
        for (job_key, operation) in due {
            match operation {
                ExpirationOperation::Expire => {
                    let job = state.job_mut(&job_key.0, &job_key.1)?;
                    match evaluate(&job_key.1, job.status, JobEvent::Expire) {
                        Ok(TransitionDecision::Transition { to, .. }) => {
                            job.status = to;
                            job.last_update_time = now;
                            state.discard_pending_work(&job_key);
                            outcome.expired.push(job_key.clone());
                        }
                        Ok(TransitionDecision::NoOp(_)) => continue,
                        Err(err) => {
                            warn!(job_id = %job_key.1, error = %err, "Skipping job expiry");
                            continue;
                        }
                    }
                }
                ExpirationOperation::Delete => {
                    state.remove_job(&job_key);
                    outcome.deleted.push(job_key.clone());
                }
            }
            if propagate_failures {
                outcome
                    .failed_dependents
                    .extend(state.fail_dependents(&job_key, now));
            }
        }

        if !outcome.is_empty() {
            info!(
                expired = outcome.expired.len(),
                deleted = outcome.deleted.len(),
                failed_dependents = outcome.failed_dependents.len(),
                "⌛ Expiration policies applied"
            );
        }
        Ok(outcome)
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_available()
    }
}
