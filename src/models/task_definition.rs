//! Task definitions and the templates persisted for blocked jobs.

use serde::{Deserialize, Serialize};

/// The single dispatchable task a job wraps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Worker classifier the task is addressed to
    pub task_classifier: String,
    pub task_api_version: u32,
    /// Opaque payload; never inspected
    pub task_data: Vec<u8>,
    /// Queue the task is dispatched to
    pub task_pipe: String,
    /// Queue where the task's final result lands
    pub target_pipe: String,
}

impl TaskDefinition {
    /// Deterministic content hash used to detect redefinition of an existing job
    pub fn definition_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hash_field(&mut hasher, self.task_classifier.as_bytes());
        hash_field(&mut hasher, &self.task_api_version.to_le_bytes());
        hash_field(&mut hasher, &self.task_data);
        hash_field(&mut hasher, self.task_pipe.as_bytes());
        hash_field(&mut hasher, self.target_pipe.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Length-prefix each field so adjacent fields cannot bleed into each other
fn hash_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// A not-yet-dispatched task, owned by exactly one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTaskTemplate {
    pub partition_id: String,
    pub job_id: String,
    pub task: TaskDefinition,
}

impl JobTaskTemplate {
    pub fn new(partition_id: impl Into<String>, job_id: impl Into<String>, task: TaskDefinition) -> Self {
        Self {
            partition_id: partition_id.into(),
            job_id: job_id.into(),
            task,
        }
    }
}
