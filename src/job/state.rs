//! Job state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current state of a job.
///
/// `Ready -> InProgress -> {Successful, Skipped, Failed}`. The last three are
/// terminal; a job is never retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[default]
    Ready,
    InProgress,
    Successful,
    /// Nothing to merge: every referenced source was missing.
    Skipped,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Successful | Self::Skipped | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ready => "ready",
            Self::InProgress => "in progress",
            Self::Successful => "successful",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_ready() {
        assert_eq!(JobState::default(), JobState::Ready);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Ready.is_terminal());
        assert!(!JobState::InProgress.is_terminal());
        assert!(JobState::Successful.is_terminal());
        assert!(JobState::Skipped.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }
}
