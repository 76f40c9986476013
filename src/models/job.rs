//! # Job Model
//!
//! A job is identified by `(partition_id, job_id)` and wraps exactly one
//! dispatchable task. `create_time == last_update_time` until the first
//! state-changing mutation.

use super::expiration::ExpirationPolicy;
use super::failure::Failure;
use super::label::LabelMap;
use super::task_definition::TaskDefinition;
use crate::error::{JobServiceError, Result};
use crate::state_machine::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub partition_id: String,
    #[serde(rename = "id")]
    pub job_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Opaque caller data carried with the job
    pub external_data: Option<String>,
    pub status: JobStatus,
    pub percentage_complete: f32,
    pub failures: Vec<Failure>,
    pub labels: LabelMap,
    pub create_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub job_hash: String,
    pub delay_seconds: i32,
    pub eligible_to_run_date: Option<DateTime<Utc>>,
}

/// Client-submitted job definition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewJob {
    pub name: Option<String>,
    pub description: Option<String>,
    pub external_data: Option<String>,
    pub task: TaskDefinition,
    pub prerequisite_job_ids: Vec<String>,
    pub delay_seconds: i32,
    pub labels: LabelMap,
    /// Falls back to the configured default policy when absent
    pub expiry: Option<ExpirationPolicy>,
}

impl NewJob {
    pub fn new(task: TaskDefinition) -> Self {
        Self {
            task,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_prerequisites<I, S>(mut self, job_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisite_job_ids = job_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delay(mut self, delay_seconds: i32) -> Self {
        self.delay_seconds = delay_seconds;
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn with_expiry(mut self, expiry: ExpirationPolicy) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

/// Database row for the `job` table; failures and labels are attached separately
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub partition_id: String,
    pub job_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub data: Option<String>,
    pub status: String,
    pub percentage_complete: f32,
    pub failure_details: serde_json::Value,
    pub create_date: DateTime<Utc>,
    pub last_update_date: DateTime<Utc>,
    pub job_hash: String,
    pub delay: i32,
    pub eligible_to_run_date: Option<DateTime<Utc>>,
}

impl JobRow {
    pub fn into_job(self, labels: LabelMap) -> Result<Job> {
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(JobServiceError::internal)?;
        let failures: Vec<Failure> = serde_json::from_value(self.failure_details)?;

        Ok(Job {
            partition_id: self.partition_id,
            job_id: self.job_id,
            name: self.name,
            description: self.description,
            external_data: self.data,
            status,
            percentage_complete: self.percentage_complete,
            failures,
            labels,
            create_time: self.create_date,
            last_update_time: self.last_update_date,
            job_hash: self.job_hash,
            delay_seconds: self.delay,
            eligible_to_run_date: self.eligible_to_run_date,
        })
    }
}

/// Answer for status-check callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobActivity {
    pub active: bool,
    /// How long the caller may cache the answer
    pub status_check_interval_seconds: u64,
}
