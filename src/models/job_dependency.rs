use serde::{Deserialize, Serialize};

/// Directed edge: `job_id` cannot dispatch until `prerequisite_job_id` completes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDependency {
    pub partition_id: String,
    /// The dependent job
    pub job_id: String,
    pub prerequisite_job_id: String,
}

impl JobDependency {
    pub fn new(
        partition_id: impl Into<String>,
        job_id: impl Into<String>,
        prerequisite_job_id: impl Into<String>,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            job_id: job_id.into(),
            prerequisite_job_id: prerequisite_job_id.into(),
        }
    }
}

/// Trim, drop blanks and de-duplicate prerequisite ids, keeping first-seen order
pub fn normalize_prerequisites<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for id in ids {
        let id = id.as_ref().trim();
        if !id.is_empty() && !normalized.iter().any(|existing| existing == id) {
            normalized.push(id.to_string());
        }
    }
    normalized
}
