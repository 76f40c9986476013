//! # Task Envelopes
//!
//! Wire format of every message the core publishes or consumes. Envelopes are
//! JSON objects with camelCase keys; the payload is carried as opaque bytes and
//! never inspected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle status carried by an envelope as it moves between workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    NewTask,
    ResultSuccess,
    ResultFailure,
    ResultException,
    InvalidTask,
    /// Any status this build does not know about
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewTask => "NEW_TASK",
            Self::ResultSuccess => "RESULT_SUCCESS",
            Self::ResultFailure => "RESULT_FAILURE",
            Self::ResultException => "RESULT_EXCEPTION",
            Self::InvalidTask => "INVALID_TASK",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing metadata that sends an envelope back through the tracking proxy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    /// `partition:jobId[.path]`
    pub job_task_id: Option<String>,
    pub status_check_time: Option<DateTime<Utc>>,
    pub status_check_url: Option<String>,
    /// Queue of the tracking proxy
    pub tracking_pipe: Option<String>,
    /// Final destination; tracking stops once the envelope is addressed here
    pub track_to: Option<String>,
}

/// The worker that produced an envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnvelope {
    pub task_id: String,
    pub task_classifier: String,
    pub task_api_version: u32,
    #[serde(default)]
    pub task_data: Vec<u8>,
    pub task_status: TaskStatus,
    /// Nominal destination queue
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub tracking: Option<TrackingInfo>,
    #[serde(default)]
    pub source_info: Option<SourceInfo>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Broker headers, e.g. `x-worker-retry`
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub custom_data: BTreeMap<String, String>,
}

impl TaskEnvelope {
    /// A NEW_TASK envelope with a fresh random task id
    pub fn new_task(task_classifier: impl Into<String>, task_api_version: u32, task_data: Vec<u8>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_classifier: task_classifier.into(),
            task_api_version,
            task_data,
            task_status: TaskStatus::NewTask,
            to: None,
            tracking: None,
            source_info: None,
            correlation_id: None,
            headers: BTreeMap::new(),
            custom_data: BTreeMap::new(),
        }
    }

    pub fn to_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.to = Some(queue_name.into());
        self
    }

    pub fn with_tracking(mut self, tracking: TrackingInfo) -> Self {
        self.tracking = Some(tracking);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Resume trigger published when a paused job is resumed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeJobMessage {
    pub partition_id: String,
    pub job_id: String,
}

impl ResumeJobMessage {
    const PARTITION_ID_KEY: &'static str = "partitionId";
    const JOB_ID_KEY: &'static str = "jobId";

    pub fn new(partition_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            job_id: job_id.into(),
        }
    }

    /// Empty-payload envelope carrying the job key in custom data
    pub fn into_envelope(self, task_classifier: &str, task_api_version: u32, queue_name: &str) -> TaskEnvelope {
        let mut envelope = TaskEnvelope::new_task(task_classifier, task_api_version, Vec::new())
            .to_queue(queue_name);
        envelope
            .custom_data
            .insert(Self::PARTITION_ID_KEY.to_string(), self.partition_id);
        envelope
            .custom_data
            .insert(Self::JOB_ID_KEY.to_string(), self.job_id);
        envelope
    }

    pub fn from_envelope(envelope: &TaskEnvelope) -> Option<Self> {
        let partition_id = envelope.custom_data.get(Self::PARTITION_ID_KEY)?;
        let job_id = envelope.custom_data.get(Self::JOB_ID_KEY)?;
        Some(Self::new(partition_id.clone(), job_id.clone()))
    }
}

/// `application/x-www-form-urlencoded` encoding of a single value
pub fn url_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'*' | b'_' => {
                encoded.push(char::from(byte));
            }
            b' ' => encoded.push('+'),
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}
