//! Explicit tracking reports sent to the tracking queue by workers that
//! report on their own subtasks.

use crate::constants::sources;
use crate::models::Failure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classifier of envelopes whose payload is a [`TrackingReportTask`]
pub const TRACKING_REPORT_CLASSIFIER: &str = "TrackingReport";
pub const TRACKING_REPORT_API_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingReportStatus {
    Progress,
    Complete,
    Failed,
    Retry,
}

/// Failure details as workers send them; the time is optional on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedFailure {
    pub failure_id: String,
    #[serde(default)]
    pub failure_time: Option<DateTime<Utc>>,
    pub failure_source: String,
    pub failure_message: String,
    /// Source of the worker that wraps this failure as its root cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
}

impl ReportedFailure {
    pub fn new(
        failure_id: impl Into<String>,
        failure_source: impl Into<String>,
        failure_message: impl Into<String>,
    ) -> Self {
        Self {
            failure_id: failure_id.into(),
            failure_time: None,
            failure_source: failure_source.into(),
            failure_message: failure_message.into(),
            root_cause: None,
        }
    }

    pub fn with_root_cause(mut self, root_source: impl Into<String>) -> Self {
        self.root_cause = Some(root_source.into());
        self
    }

    pub fn into_failure(self) -> Failure {
        let inner = Failure {
            failure_id: self.failure_id,
            failure_time: self.failure_time.unwrap_or_else(Utc::now),
            failure_source: self.failure_source,
            failure_message: self.failure_message,
        };
        match self.root_cause {
            Some(root_source) => Failure::with_root_cause(&root_source, inner),
            None => inner,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingReport {
    pub job_task_id: String,
    pub status: TrackingReportStatus,
    #[serde(default)]
    pub estimated_percentage_completed: Option<f32>,
    #[serde(default)]
    pub failure: Option<ReportedFailure>,
    #[serde(default)]
    pub retries: Option<u32>,
}

impl TrackingReport {
    pub fn new(job_task_id: impl Into<String>, status: TrackingReportStatus) -> Self {
        Self {
            job_task_id: job_task_id.into(),
            status,
            estimated_percentage_completed: None,
            failure: None,
            retries: None,
        }
    }

    /// Failure to record for a Failed report, filling in a placeholder when none was sent
    pub fn failure_or_default(&self, job_id: &str) -> Failure {
        match &self.failure {
            Some(reported) => reported.clone().into_failure(),
            None => Failure::new(
                "FAILED",
                sources::tracking_proxy(job_id),
                "The job task failed without reporting failure details.",
            ),
        }
    }

    pub fn retry_details(&self) -> String {
        format!(
            "This job task encountered a problem and will be retried. This will be retry attempt number {} for this job task.",
            self.retries.unwrap_or(0)
        )
    }
}

/// Payload of an explicit tracking envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingReportTask {
    pub tracking_reports: Vec<TrackingReport>,
}

impl TrackingReportTask {
    pub fn from_payload(task_data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(task_data)
    }

    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
