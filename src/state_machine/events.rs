use serde::{Deserialize, Serialize};

/// Events that can trigger job state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    /// Prerequisites satisfied, delay elapsed and partition active
    Release,
    /// Pipeline reported progress or a retry
    Progress,
    /// The job's task set collapsed to the root
    Complete,
    /// Explicit failure trigger
    Fail,
    Cancel,
    Pause,
    Resume,
    /// The job's expiration policy fell due
    Expire,
}

impl JobEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Progress => "progress",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Expire => "expire",
        }
    }

    /// Client-initiated events reject illegal transitions; pipeline events ignore them
    pub fn is_client_initiated(&self) -> bool {
        matches!(self, Self::Cancel | Self::Pause | Self::Resume | Self::Fail)
    }
}
