use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A failure appended to a job's failure list; never overwritten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub failure_id: String,
    pub failure_time: DateTime<Utc>,
    pub failure_source: String,
    pub failure_message: String,
}

impl Failure {
    pub fn new(
        failure_id: impl Into<String>,
        failure_source: impl Into<String>,
        failure_message: impl Into<String>,
    ) -> Self {
        Self {
            failure_id: failure_id.into(),
            failure_time: Utc::now(),
            failure_source: failure_source.into(),
            failure_message: failure_message.into(),
        }
    }

    /// Same failure reported again; the time is ignored
    pub fn repeats(&self, other: &Failure) -> bool {
        self.failure_id == other.failure_id
            && self.failure_source == other.failure_source
            && self.failure_message == other.failure_message
    }

    /// Wrap an inner failure under a root cause; the source becomes `root:innerSource`
    pub fn with_root_cause(root_source: &str, inner: Failure) -> Self {
        Self {
            failure_source: format!("{root_source}:{}", inner.failure_source),
            ..inner
        }
    }
}
