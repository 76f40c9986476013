//! PostgreSQL-backed job store.
//!
//! Every trait operation runs in one transaction. Rows whose state is read and
//! then rewritten are locked with `SELECT ... FOR UPDATE`, so concurrent
//! cascades, client events and completion batches serialize per job.

use super::{
    CompletionBatch, CompletionOutcome, CreateJobRecord, CreateOutcome, ExpirationOutcome, JobStore,
};
use crate::config::{QueryConfig, SuspendedPartitions};
use crate::constants::{failures, sources};
use crate::error::{JobServiceError, Result};
use crate::models::{
    group_label_rows, CompletedTaskSet, ExpirationOperation, ExpirationPolicyRow, Failure, Job,
    JobDependency, JobExpiration, JobRow, JobTaskTemplate, LabelMap, LabelRow, TaskDefinition,
};
use crate::orchestration::dependency_resolver::{Eligibility, EligibilityCheck};
use crate::query_builder::JobQuery;
use crate::state_machine::{evaluate, JobEvent, JobStatus, TransitionDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

const JOB_COLUMNS: &str = "j.partition_id, j.job_id, j.name, j.description, j.data, j.status, \
     j.percentage_complete, j.failure_details, j.create_date, j.last_update_date, j.job_hash, \
     j.delay, j.eligible_to_run_date";

#[derive(Debug, sqlx::FromRow)]
struct TaskDataRow {
    task_classifier: String,
    task_api_version: i32,
    task_data: Vec<u8>,
    task_pipe: String,
    target_pipe: String,
}

impl TaskDataRow {
    fn into_definition(self) -> Result<TaskDefinition> {
        Ok(TaskDefinition {
            task_classifier: self.task_classifier,
            task_api_version: u32::try_from(self.task_api_version).map_err(|_| {
                JobServiceError::internal(format!(
                    "Stored task api version is negative: {}",
                    self.task_api_version
                ))
            })?,
            task_data: self.task_data,
            task_pipe: self.task_pipe,
            target_pipe: self.target_pipe,
        })
    }
}

fn api_version_column(task: &TaskDefinition) -> Result<i32> {
    i32::try_from(task.task_api_version).map_err(|_| {
        JobServiceError::bad_request(format!(
            "The task api version {} is out of range.",
            task.task_api_version
        ))
    })
}

fn parse_status(raw: &str) -> Result<JobStatus> {
    raw.parse::<JobStatus>().map_err(JobServiceError::internal)
}

/// Lock and return the job row, failing NotFound when it is absent
async fn lock_job(conn: &mut PgConnection, partition_id: &str, job_id: &str) -> Result<JobRow> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM job j WHERE j.partition_id = $1 AND j.job_id = $2 FOR UPDATE"
    );
    sqlx::query_as::<_, JobRow>(&sql)
        .bind(partition_id)
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| JobServiceError::job_not_found(job_id))
}

async fn set_status(
    conn: &mut PgConnection,
    partition_id: &str,
    job_id: &str,
    status: JobStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE job SET status = $3, last_update_date = $4 WHERE partition_id = $1 AND job_id = $2",
    )
    .bind(partition_id)
    .bind(job_id)
    .bind(status.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Append the failure unless an entry with the same id, source and message
/// is already recorded. Returns whether a row changed.
async fn append_failure(
    conn: &mut PgConnection,
    partition_id: &str,
    job_id: &str,
    failure: Failure,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE job
        SET failure_details = failure_details || $3::jsonb, last_update_date = $4
        WHERE partition_id = $1 AND job_id = $2
          AND NOT failure_details @> jsonb_build_array(jsonb_build_object(
              'failureId', $5::text, 'failureSource', $6::text, 'failureMessage', $7::text))
        "#,
    )
    .bind(partition_id)
    .bind(job_id)
    .bind(Json(vec![&failure]))
    .bind(now)
    .bind(&failure.failure_id)
    .bind(&failure.failure_source)
    .bind(&failure.failure_message)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn open_edges(conn: &mut PgConnection, partition_id: &str, job_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM job_dependency WHERE partition_id = $1 AND job_id = $2",
    )
    .bind(partition_id)
    .bind(job_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Remove the template and completed-task rows of a job
async fn discard_pending_work(conn: &mut PgConnection, partition_id: &str, job_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM job_task_data WHERE partition_id = $1 AND job_id = $2")
        .bind(partition_id)
        .bind(job_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM completed_subtask_report WHERE partition_id = $1 AND job_id = $2")
        .bind(partition_id)
        .bind(job_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn load_template(
    conn: &mut PgConnection,
    partition_id: &str,
    job_id: &str,
) -> Result<Option<TaskDefinition>> {
    sqlx::query_as::<_, TaskDataRow>(
        r#"
        SELECT task_classifier, task_api_version, task_data, task_pipe, target_pipe
        FROM job_task_data
        WHERE partition_id = $1 AND job_id = $2
        "#,
    )
    .bind(partition_id)
    .bind(job_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(TaskDataRow::into_definition)
    .transpose()
}

async fn insert_template(
    conn: &mut PgConnection,
    partition_id: &str,
    job_id: &str,
    task: &TaskDefinition,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO job_task_data
            (partition_id, job_id, task_classifier, task_api_version, task_data, task_pipe, target_pipe)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (partition_id, job_id) DO NOTHING
        "#,
    )
    .bind(partition_id)
    .bind(job_id)
    .bind(&task.task_classifier)
    .bind(api_version_column(task)?)
    .bind(&task.task_data)
    .bind(&task.task_pipe)
    .bind(&task.target_pipe)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Run the eligibility rules on a templated job and persist the result
async fn evaluate_template(
    conn: &mut PgConnection,
    partition_id: &str,
    job_id: &str,
    partition_suspended: bool,
    now: DateTime<Utc>,
) -> Result<Option<JobTaskTemplate>> {
    let row = match lock_job(conn, partition_id, job_id).await {
        Ok(row) => row,
        // Dependent was deleted while its edge was still open
        Err(JobServiceError::NotFound { .. }) => return Ok(None),
        Err(err) => return Err(err),
    };
    let Some(task) = load_template(conn, partition_id, job_id).await? else {
        return Ok(None);
    };

    let check = EligibilityCheck {
        open_edges: open_edges(conn, partition_id, job_id).await?,
        partition_suspended,
        status: parse_status(&row.status)?,
        delay_seconds: row.delay,
        eligible_to_run_date: row.eligible_to_run_date,
    };

    match check.evaluate(now) {
        Eligibility::Blocked | Eligibility::Never => Ok(None),
        Eligibility::Deferred { eligible_at } | Eligibility::Held { eligible_at } => {
            if row.eligible_to_run_date != Some(eligible_at) {
                sqlx::query(
                    "UPDATE job SET eligible_to_run_date = $3 WHERE partition_id = $1 AND job_id = $2",
                )
                .bind(partition_id)
                .bind(job_id)
                .bind(eligible_at)
                .execute(&mut *conn)
                .await?;
            }
            Ok(None)
        }
        Eligibility::Release => {
            set_status(conn, partition_id, job_id, JobStatus::Active, now).await?;
            sqlx::query("DELETE FROM job_task_data WHERE partition_id = $1 AND job_id = $2")
                .bind(partition_id)
                .bind(job_id)
                .execute(&mut *conn)
                .await?;
            debug!(partition_id = %partition_id, job_id = %job_id, "🔓 Job released");
            Ok(Some(JobTaskTemplate::new(partition_id, job_id, task)))
        }
    }
}

/// Delete every edge on a prerequisite and evaluate the affected dependents
async fn release_dependents_in(
    conn: &mut PgConnection,
    partition_id: &str,
    prerequisite_job_id: &str,
    partition_suspended: bool,
    now: DateTime<Utc>,
) -> Result<Vec<JobTaskTemplate>> {
    let dependents: BTreeSet<String> = sqlx::query_scalar::<_, String>(
        r#"
        DELETE FROM job_dependency
        WHERE partition_id = $1 AND prerequisite_job_id = $2
        RETURNING job_id
        "#,
    )
    .bind(partition_id)
    .bind(prerequisite_job_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .collect();

    let mut released = Vec::new();
    for dependent in dependents {
        if let Some(template) =
            evaluate_template(conn, partition_id, &dependent, partition_suspended, now).await?
        {
            released.push(template);
        }
    }
    Ok(released)
}

async fn insert_expiration(
    conn: &mut PgConnection,
    partition_id: &str,
    job_id: &str,
    expiration: &JobExpiration,
) -> Result<()> {
    for (status, policy) in expiration.policies() {
        let (reference, minutes, at) = ExpirationPolicyRow::columns(&policy);
        sqlx::query(
            r#"
            INSERT INTO job_expiration_policy
                (partition_id, job_id, job_status, operation, expiry_reference, expiry_minutes, expiry_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (partition_id, job_id, job_status) DO NOTHING
            "#,
        )
        .bind(partition_id)
        .bind(job_id)
        .bind(status.as_str())
        .bind(policy.operation.as_str())
        .bind(reference)
        .bind(minutes)
        .bind(at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Remove a job row and everything it owns. Edges of other jobs naming it stay.
async fn remove_job(conn: &mut PgConnection, partition_id: &str, job_id: &str) -> Result<bool> {
    let deleted = sqlx::query("DELETE FROM job WHERE partition_id = $1 AND job_id = $2")
        .bind(partition_id)
        .bind(job_id)
        .execute(&mut *conn)
        .await?;
    if deleted.rows_affected() == 0 {
        return Ok(false);
    }

    discard_pending_work(conn, partition_id, job_id).await?;
    for table in ["job_dependency", "label", "job_expiration_policy"] {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE partition_id = $1 AND job_id = $2"
        ))
        .bind(partition_id)
        .bind(job_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(true)
}

/// Fail every non-terminal job depending on the prerequisite, transitively
async fn fail_dependents_in(
    conn: &mut PgConnection,
    partition_id: &str,
    prerequisite_job_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>> {
    let mut failed = Vec::new();
    let mut pending = vec![prerequisite_job_id.to_string()];

    while let Some(prerequisite) = pending.pop() {
        let dependents: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT job_id FROM job_dependency
            WHERE partition_id = $1 AND prerequisite_job_id = $2
            ORDER BY job_id
            "#,
        )
        .bind(partition_id)
        .bind(&prerequisite)
        .fetch_all(&mut *conn)
        .await?;

        for dependent in dependents {
            let row = match lock_job(conn, partition_id, &dependent).await {
                Ok(row) => row,
                Err(JobServiceError::NotFound { .. }) => continue,
                Err(err) => return Err(err),
            };
            let Ok(TransitionDecision::Transition { to, .. }) =
                evaluate(&dependent, parse_status(&row.status)?, JobEvent::Fail)
            else {
                continue;
            };

            let failure = Failure::new(
                failures::PREREQUISITE_EXPIRED,
                sources::scheduled_executor(&dependent),
                format!("Prerequisite job {prerequisite} expired before it completed."),
            );
            append_failure(conn, partition_id, &dependent, failure, now).await?;
            set_status(conn, partition_id, &dependent, to, now).await?;
            discard_pending_work(conn, partition_id, &dependent).await?;
            failed.push((partition_id.to_string(), dependent.clone()));
            pending.push(dependent);
        }
    }
    Ok(failed)
}

async fn load_labels(
    conn: &mut PgConnection,
    partition_id: &str,
    job_ids: Vec<String>,
) -> Result<BTreeMap<String, LabelMap>> {
    if job_ids.is_empty() {
        return Ok(BTreeMap::new());
    }
    let rows = sqlx::query_as::<_, LabelRow>(
        r#"
        SELECT partition_id, job_id, label, value
        FROM label
        WHERE partition_id = $1 AND job_id = ANY($2)
        "#,
    )
    .bind(partition_id)
    .bind(job_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(group_label_rows(rows))
}

/// Job store on PostgreSQL
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
    query: QueryConfig,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_query_config(pool, QueryConfig::default())
    }

    pub fn with_query_config(pool: PgPool, query: QueryConfig) -> Self {
        Self { pool, query }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Resolve a lost insert race by comparing the winner's hash
    async fn existing_outcome(&self, record: &CreateJobRecord, job_hash: &str) -> Result<CreateOutcome> {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT job_hash FROM job WHERE partition_id = $1 AND job_id = $2",
        )
        .bind(&record.partition_id)
        .bind(&record.job_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(hash) if hash == job_hash => {
                debug!("Matching job already exists so nothing to do");
                Ok(CreateOutcome::Unchanged)
            }
            Some(_) => Err(JobServiceError::forbidden(format!(
                "job_id {} already exists with a different task definition.",
                record.job_id
            ))),
            None => Err(JobServiceError::service_unavailable(format!(
                "job_id {} was removed while being created; retry the request.",
                record.job_id
            ))),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, record), fields(partition_id = %record.partition_id, job_id = %record.job_id))]
    async fn create_job(&self, record: CreateJobRecord) -> Result<CreateOutcome> {
        let job_hash = record.job_hash();
        let (partition_id, job_id) = (record.partition_id.as_str(), record.job_id.as_str());
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT job_hash FROM job WHERE partition_id = $1 AND job_id = $2 FOR UPDATE",
        )
        .bind(partition_id)
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            tx.rollback().await?;
            return self.existing_outcome(&record, &job_hash).await;
        }

        // Shared locks hold off a concurrent completion of any prerequisite
        // until this job's edges are committed, so its cascade sees them.
        let prerequisites: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT job_id, status FROM job
            WHERE partition_id = $1 AND job_id = ANY($2)
            ORDER BY job_id
            FOR SHARE
            "#,
        )
        .bind(partition_id)
        .bind(record.prerequisite_job_ids.clone())
        .fetch_all(&mut *tx)
        .await?;
        let completed: BTreeSet<String> = prerequisites
            .into_iter()
            .filter(|(_, status)| status == JobStatus::Completed.as_str())
            .map(|(prerequisite, _)| prerequisite)
            .collect();
        let open: Vec<&String> = record
            .prerequisite_job_ids
            .iter()
            .filter(|prerequisite| !completed.contains(*prerequisite))
            .collect();

        let now = Utc::now();
        let placement = EligibilityCheck::for_new_job(
            open.len() as i64,
            record.partition_suspended,
            record.delay_seconds,
        )
        .evaluate(now);
        let (status, eligible_to_run_date) = match placement {
            Eligibility::Release => (JobStatus::Active, None),
            Eligibility::Deferred { eligible_at } => (JobStatus::Waiting, Some(eligible_at)),
            _ => (JobStatus::Waiting, None),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO job
                (partition_id, job_id, name, description, data, create_date, last_update_date,
                 status, percentage_complete, failure_details, job_hash, delay, eligible_to_run_date)
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7, 0, '[]'::jsonb, $8, $9, $10)
            ON CONFLICT (partition_id, job_id) DO NOTHING
            "#,
        )
        .bind(partition_id)
        .bind(job_id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.external_data)
        .bind(now)
        .bind(status.as_str())
        .bind(&job_hash)
        .bind(record.delay_seconds)
        .bind(eligible_to_run_date)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return self.existing_outcome(&record, &job_hash).await;
        }

        for prerequisite in &open {
            sqlx::query(
                r#"
                INSERT INTO job_dependency (partition_id, job_id, prerequisite_job_id)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(partition_id)
            .bind(job_id)
            .bind(prerequisite.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for (label, value) in &record.labels {
            sqlx::query(
                "INSERT INTO label (partition_id, job_id, label, value) VALUES ($1, $2, $3, $4)",
            )
            .bind(partition_id)
            .bind(job_id)
            .bind(label)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        insert_expiration(&mut tx, partition_id, job_id, &record.expiration).await?;

        let dispatch = if placement == Eligibility::Release {
            Some(record.template())
        } else {
            insert_template(&mut tx, partition_id, job_id, &record.task).await?;
            None
        };

        tx.commit().await?;
        info!(status = %status, open_edges = open.len(), "✅ Job created");
        Ok(CreateOutcome::Created { dispatch })
    }

    async fn get_job(&self, partition_id: &str, job_id: &str) -> Result<Job> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {JOB_COLUMNS} FROM job j WHERE j.partition_id = $1 AND j.job_id = $2");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(partition_id)
            .bind(job_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| JobServiceError::job_not_found(job_id))?;

        let mut labels = load_labels(&mut conn, partition_id, vec![job_id.to_string()]).await?;
        row.into_job(labels.remove(job_id).unwrap_or_default())
    }

    #[instrument(skip(self, query))]
    async fn list_jobs(&self, partition_id: &str, query: &JobQuery) -> Result<Vec<Job>> {
        let mut conn = self.pool.acquire().await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {JOB_COLUMNS} FROM job j"));
        query.push_where(&mut qb, partition_id);
        query.sort.push_sql(&mut qb);
        query
            .pagination
            .push_sql(&mut qb, self.query.default_page_size, self.query.max_page_size);

        let rows: Vec<JobRow> = qb.build_query_as().fetch_all(&mut *conn).await?;
        let job_ids = rows.iter().map(|row| row.job_id.clone()).collect();
        let mut labels = load_labels(&mut conn, partition_id, job_ids).await?;

        rows.into_iter()
            .map(|row| {
                let job_labels = labels.remove(&row.job_id).unwrap_or_default();
                row.into_job(job_labels)
            })
            .collect()
    }

    async fn count_jobs(&self, partition_id: &str, query: &JobQuery) -> Result<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM job j");
        query.push_where(&mut qb, partition_id);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn delete_job(&self, partition_id: &str, job_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if !remove_job(&mut tx, partition_id, job_id).await? {
            return Err(JobServiceError::job_not_found(job_id));
        }
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let row = lock_job(&mut tx, partition_id, job_id).await?;
        let decision = evaluate(job_id, parse_status(&row.status)?, event)?;

        if let TransitionDecision::Transition { to, .. } = decision {
            set_status(&mut tx, partition_id, job_id, to, Utc::now()).await?;
            if to.is_terminal() {
                discard_pending_work(&mut tx, partition_id, job_id).await?;
            }
        }
        tx.commit().await?;
        Ok(decision)
    }

    #[instrument(skip(self, failure), fields(failure_id = %failure.failure_id))]
    async fn fail_job(
        &self,
        partition_id: &str,
        job_id: &str,
        failure: Failure,
    ) -> Result<TransitionDecision> {
        let mut tx = self.pool.begin().await?;
        let row = lock_job(&mut tx, partition_id, job_id).await?;
        let decision = evaluate(job_id, parse_status(&row.status)?, JobEvent::Fail)?;

        let now = Utc::now();
        append_failure(&mut tx, partition_id, job_id, failure, now).await?;
        if let TransitionDecision::Transition { to, .. } = decision {
            set_status(&mut tx, partition_id, job_id, to, now).await?;
            discard_pending_work(&mut tx, partition_id, job_id).await?;
        }
        tx.commit().await?;
        Ok(decision)
    }

    async fn report_progress(
        &self,
        partition_id: &str,
        job_id: &str,
        percentage_complete: Option<f32>,
    ) -> Result<TransitionDecision> {
        let mut tx = self.pool.begin().await?;
        let row = lock_job(&mut tx, partition_id, job_id).await?;
        let current = parse_status(&row.status)?;
        let decision = evaluate(job_id, current, JobEvent::Progress)?;

        let now = Utc::now();
        let status = match decision {
            TransitionDecision::Transition { to, .. } => {
                set_status(&mut tx, partition_id, job_id, to, now).await?;
                to
            }
            TransitionDecision::NoOp(status) => status,
        };
        if let Some(percentage) = percentage_complete {
            if !status.is_terminal() {
                sqlx::query(
                    r#"
                    UPDATE job SET percentage_complete = $3, last_update_date = $4
                    WHERE partition_id = $1 AND job_id = $2
                    "#,
                )
                .bind(partition_id)
                .bind(job_id)
                .bind(percentage.clamp(0.0, 100.0))
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(decision)
    }

    async fn report_failure(&self, partition_id: &str, job_id: &str, failure: Failure) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_job(&mut tx, partition_id, job_id).await?;
        if !append_failure(&mut tx, partition_id, job_id, failure, Utc::now()).await? {
            debug!(partition_id = %partition_id, job_id = %job_id, "Failure already recorded");
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, batch, suspended), fields(partition_id = %batch.partition_id, job_id = %batch.job_id))]
    async fn report_completions(
        &self,
        batch: &CompletionBatch,
        suspended: &SuspendedPartitions,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        let (partition_id, job_id) = (batch.partition_id.as_str(), batch.job_id.as_str());
        let mut tx = self.pool.begin().await?;

        let row = lock_job(&mut tx, partition_id, job_id).await?;
        let status = parse_status(&row.status)?;
        if status.is_terminal() {
            tx.rollback().await?;
            return Ok(CompletionOutcome {
                status,
                job_completed: false,
                released: Vec::new(),
            });
        }

        let stored: Vec<String> = sqlx::query_scalar(
            "SELECT task_path FROM completed_subtask_report WHERE partition_id = $1 AND job_id = $2",
        )
        .bind(partition_id)
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await?;
        let mut completed = CompletedTaskSet::from_path_strings(&stored)?;
        for task_id in &batch.task_ids {
            completed.insert(task_id);
        }
        completed.collapse();

        let root_reported = batch.task_ids.iter().any(|task_id| task_id.is_root());
        if !(root_reported || completed.is_complete()) {
            let decision = evaluate(job_id, status, JobEvent::Progress)?;
            let status = match decision {
                TransitionDecision::Transition { to, .. } => {
                    set_status(&mut tx, partition_id, job_id, to, now).await?;
                    to
                }
                TransitionDecision::NoOp(status) => status,
            };

            sqlx::query(
                "DELETE FROM completed_subtask_report WHERE partition_id = $1 AND job_id = $2",
            )
            .bind(partition_id)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
            for path in completed.path_strings() {
                sqlx::query(
                    r#"
                    INSERT INTO completed_subtask_report (partition_id, job_id, task_path)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(partition_id)
                .bind(job_id)
                .bind(path)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            return Ok(CompletionOutcome {
                status,
                job_completed: false,
                released: Vec::new(),
            });
        }

        evaluate(job_id, status, JobEvent::Complete)?;
        sqlx::query(
            r#"
            UPDATE job SET status = $3, percentage_complete = 100, last_update_date = $4
            WHERE partition_id = $1 AND job_id = $2
            "#,
        )
        .bind(partition_id)
        .bind(job_id)
        .bind(JobStatus::Completed.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        discard_pending_work(&mut tx, partition_id, job_id).await?;

        let released = release_dependents_in(
            &mut tx,
            partition_id,
            job_id,
            suspended.is_suspended(partition_id),
            now,
        )
        .await?;
        tx.commit().await?;

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
        let mut tx = self.pool.begin().await?;
        let released =
            release_dependents_in(&mut tx, partition_id, prerequisite_job_id, partition_suspended, now)
                .await?;
        tx.commit().await?;
        Ok(released)
    }

    async fn release_job(
        &self,
        partition_id: &str,
        job_id: &str,
        partition_suspended: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<JobTaskTemplate>> {
        let mut tx = self.pool.begin().await?;
        lock_job(&mut tx, partition_id, job_id).await?;
        let released = evaluate_template(&mut tx, partition_id, job_id, partition_suspended, now).await?;
        tx.commit().await?;
        Ok(released)
    }

    #[instrument(skip(self, suspended))]
    async fn release_eligible_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        suspended: &SuspendedPartitions,
    ) -> Result<Vec<JobTaskTemplate>> {
        let mut tx = self.pool.begin().await?;
        let candidates: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT j.partition_id, j.job_id
            FROM job j
            JOIN job_task_data d ON d.partition_id = j.partition_id AND d.job_id = j.job_id
            WHERE j.status IN ('Waiting', 'Active')
              AND (j.eligible_to_run_date IS NULL OR j.eligible_to_run_date <= $1)
              AND j.partition_id <> ALL($2)
              AND NOT EXISTS (
                  SELECT 1 FROM job_dependency e
                  WHERE e.partition_id = j.partition_id AND e.job_id = j.job_id
              )
            ORDER BY j.eligible_to_run_date NULLS FIRST
            LIMIT $3
            FOR UPDATE OF j SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(suspended.to_vec())
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut released = Vec::new();
        for (partition_id, job_id) in candidates {
            if let Some(template) = evaluate_template(&mut tx, &partition_id, &job_id, false, now).await? {
                released.push(template);
            }
        }
        tx.commit().await?;
        Ok(released)
    }

    async fn dependency_edges(&self, partition_id: &str, job_id: &str) -> Result<Vec<JobDependency>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT partition_id, job_id, prerequisite_job_id
            FROM job_dependency
            WHERE partition_id = $1 AND job_id = $2
            ORDER BY prerequisite_job_id
            "#,
        )
        .bind(partition_id)
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(partition_id, job_id, prerequisite)| {
                JobDependency::new(partition_id, job_id, prerequisite)
            })
            .collect())
    }

    async fn task_template(&self, partition_id: &str, job_id: &str) -> Result<Option<JobTaskTemplate>> {
        let mut conn = self.pool.acquire().await?;
        Ok(load_template(&mut conn, partition_id, job_id)
            .await?
            .map(|task| JobTaskTemplate::new(partition_id, job_id, task)))
    }

    async fn job_expiration(&self, partition_id: &str, job_id: &str) -> Result<JobExpiration> {
        let mut conn = self.pool.acquire().await?;
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM job WHERE partition_id = $1 AND job_id = $2")
                .bind(partition_id)
                .bind(job_id)
                .fetch_optional(&mut *conn)
                .await?;
        if exists.is_none() {
            return Err(JobServiceError::job_not_found(job_id));
        }

        let rows = sqlx::query_as::<_, ExpirationPolicyRow>(
            r#"
            SELECT job_status, operation, expiry_reference, expiry_minutes, expiry_at
            FROM job_expiration_policy
            WHERE partition_id = $1 AND job_id = $2
            "#,
        )
        .bind(partition_id)
        .bind(job_id)
        .fetch_all(&mut *conn)
        .await?;
        let policies = rows
            .into_iter()
            .map(ExpirationPolicyRow::into_policy)
            .collect::<Result<Vec<_>>>()?;
        Ok(JobExpiration::from_policies(policies))
    }

    #[instrument(skip(self))]
    async fn apply_expiration_policies(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        propagate_failures: bool,
    ) -> Result<ExpirationOutcome> {
        let mut tx = self.pool.begin().await?;
        let due: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT j.partition_id, j.job_id, j.status, p.operation
            FROM job j
            JOIN job_expiration_policy p
              ON p.partition_id = j.partition_id AND p.job_id = j.job_id AND p.job_status = j.status
            WHERE (p.expiry_at IS NOT NULL OR p.expiry_minutes IS NOT NULL)
              AND COALESCE(
                    p.expiry_at,
                    CASE p.expiry_reference
                        WHEN 'createTime' THEN j.create_date
                        ELSE j.last_update_date
                    END + make_interval(mins => p.expiry_minutes::int)
                  ) <= $1
            ORDER BY j.partition_id, j.job_id
            LIMIT $2
            FOR UPDATE OF j SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut outcome = ExpirationOutcome::default();
        for (partition_id, job_id, status, operation) in due {
            let operation = operation
                .parse::<ExpirationOperation>()
                .map_err(|e| JobServiceError::internal(e.message().to_string()))?;
            match operation {
                ExpirationOperation::Expire => {
                    match evaluate(&job_id, parse_status(&status)?, JobEvent::Expire) {
                        Ok(TransitionDecision::Transition { to, .. }) => {
                            set_status(&mut tx, &partition_id, &job_id, to, now).await?;
                            discard_pending_work(&mut tx, &partition_id, &job_id).await?;
                            outcome.expired.push((partition_id.clone(), job_id.clone()));
                        }
                        Ok(TransitionDecision::NoOp(_)) => continue,
                        Err(err) => {
                            warn!(job_id = %job_id, error = %err, "Skipping job expiry");
                            continue;
                        }
                    }
                }
                ExpirationOperation::Delete => {
                    remove_job(&mut tx, &partition_id, &job_id).await?;
                    outcome.deleted.push((partition_id.clone(), job_id.clone()));
                }
            }
            if propagate_failures {
                let failed = fail_dependents_in(&mut tx, &partition_id, &job_id, now).await?;
                outcome.failed_dependents.extend(failed);
            }
        }
        tx.commit().await?;

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
        crate::database::health_check(&self.pool).await?;
        Ok(())
    }
}
