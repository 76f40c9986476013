//! # Job Task Identities
//!
//! Every envelope that belongs to a job carries a job task id of the form
//! `partition:jobId[.n[*]]*`. A worker that splits a task into subtasks
//! appends `.1`, `.2`, ... and marks the last sibling with `*`. A job is
//! complete once the set of completed task ids collapses back to its root.
//!
//! ## Collapse
//!
//! A parent collapses when a final child `k*` is present and every sibling
//! `1..=k` is present. Collapsing repeats until nothing changes:
//!
//! ```text
//! {job.1.1, job.1.2*, job.2*}  ->  {job.1, job.2*}  ->  {job}
//! ```

use crate::constants::DEFAULT_PARTITION_ID;
use crate::error::{JobServiceError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One level of a subtask path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskSegment {
    pub index: u32,
    /// Last sibling at this level
    pub is_final: bool,
}

impl fmt::Display for TaskSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_final {
            write!(f, "{}*", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

pub type TaskPath = Vec<TaskSegment>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobTaskId {
    partition_id: String,
    job_id: String,
    path: TaskPath,
}

impl JobTaskId {
    /// Id of the job's root task
    pub fn root(partition_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            job_id: job_id.into(),
            path: Vec::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || JobServiceError::bad_request(format!("Invalid job task id: {raw}"));

        let (partition_id, rest) = match raw.split_once(':') {
            Some((partition, rest)) => (partition, rest),
            None => (DEFAULT_PARTITION_ID, raw),
        };
        if partition_id.is_empty() {
            return Err(invalid());
        }

        let (job_id, subtasks) = match rest.split_once('.') {
            Some((job_id, subtasks)) => (job_id, Some(subtasks)),
            None => (rest, None),
        };
        if job_id.is_empty() {
            return Err(invalid());
        }

        let path = match subtasks {
            Some(subtasks) => parse_path(subtasks).ok_or_else(invalid)?,
            None => Vec::new(),
        };

        Ok(Self {
            partition_id: partition_id.to_string(),
            job_id: job_id.to_string(),
            path,
        })
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn path(&self) -> &[TaskSegment] {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Subtask path without the job id, e.g. `1.2*`; empty for the root
    pub fn path_string(&self) -> String {
        format_path(&self.path)
    }

    /// Child task id one level down
    pub fn subtask(&self, index: u32, is_final: bool) -> Self {
        let mut path = self.path.clone();
        path.push(TaskSegment { index, is_final });
        Self {
            partition_id: self.partition_id.clone(),
            job_id: self.job_id.clone(),
            path,
        }
    }
}

impl fmt::Display for JobTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition_id, self.job_id)?;
        for segment in &self.path {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for JobTaskId {
    type Err = JobServiceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse `1.2*.3` into segments; `None` when any segment is malformed
pub fn parse_path(raw: &str) -> Option<TaskPath> {
    raw.split('.')
        .map(|segment| {
            let (digits, is_final) = match segment.strip_suffix('*') {
                Some(digits) => (digits, true),
                None => (segment, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let index = digits.parse::<u32>().ok().filter(|i| *i > 0)?;
            Some(TaskSegment { index, is_final })
        })
        .collect()
}

pub fn format_path(path: &[TaskSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Completed task paths for a single job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedTaskSet {
    paths: BTreeSet<TaskPath>,
}

impl CompletedTaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted path strings (see [`JobTaskId::path_string`])
    pub fn from_path_strings<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for raw in paths {
            let raw = raw.as_ref();
            if raw.is_empty() {
                set.paths.insert(Vec::new());
            } else {
                let path = parse_path(raw).ok_or_else(|| {
                    JobServiceError::internal(format!("Invalid stored task path: {raw}"))
                })?;
                set.paths.insert(path);
            }
        }
        Ok(set)
    }

    pub fn insert(&mut self, task_id: &JobTaskId) -> bool {
        self.paths.insert(task_id.path.clone())
    }

    pub fn insert_path(&mut self, path: TaskPath) -> bool {
        self.paths.insert(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// True once the set has collapsed to the job's root task
    pub fn is_complete(&self) -> bool {
        self.paths.contains(&Vec::new())
    }

    /// Collapse complete sibling groups into their parents until stable
    pub fn collapse(&mut self) {
        if self.is_complete() {
            self.paths = BTreeSet::from([Vec::new()]);
            return;
        }

        loop {
            let mut groups: BTreeMap<TaskPath, Vec<TaskSegment>> = BTreeMap::new();
            for path in &self.paths {
                if let Some((last, parent)) = path.split_last() {
                    groups.entry(parent.to_vec()).or_default().push(*last);
                }
            }

            let collapsible: Vec<TaskPath> = groups
                .into_iter()
                .filter(|(_, children)| siblings_complete(children))
                .map(|(parent, _)| parent)
                .collect();

            if collapsible.is_empty() {
                break;
            }

            for parent in collapsible {
                self.paths.retain(|path| {
                    path.len() != parent.len() + 1 || !path.starts_with(&parent)
                });
                self.paths.insert(parent);
            }

            if self.is_complete() {
                self.paths = BTreeSet::from([Vec::new()]);
                break;
            }
        }
    }

    /// Path strings for persistence
    pub fn path_strings(&self) -> Vec<String> {
        self.paths.iter().map(|p| format_path(p)).collect()
    }

    /// Render as job-local task ids, e.g. `job.1` or `job.7*`
    pub fn task_ids(&self, job_id: &str) -> Vec<String> {
        self.paths
            .iter()
            .map(|path| {
                if path.is_empty() {
                    job_id.to_string()
                } else {
                    format!("{job_id}.{}", format_path(path))
                }
            })
            .collect()
    }
}

/// A sibling group is complete when a final child `k*` exists and `1..=k` are all present
fn siblings_complete(children: &[TaskSegment]) -> bool {
    let Some(last) = children
        .iter()
        .filter(|segment| segment.is_final)
        .map(|segment| segment.index)
        .min()
    else {
        return false;
    };
    let present: BTreeSet<u32> = children.iter().map(|segment| segment.index).collect();
    (1..=last).all(|index| present.contains(&index))
}
