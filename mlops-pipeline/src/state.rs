//! Task and DAG-run states as stored in the run history

use crate::error::{PipelineError, Result};
use std::fmt;
use std::str::FromStr;

/// Terminal state of a task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Success,
    Failed,
    Skipped,
    UpstreamFailed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Success => "success",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
            TaskState::UpstreamFailed => "upstream_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::UpstreamFailed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(TaskState::Success),
            "failed" => Ok(TaskState::Failed),
            "skipped" => Ok(TaskState::Skipped),
            "upstream_failed" => Ok(TaskState::UpstreamFailed),
            other => Err(PipelineError::InvalidDag(format!("unknown task state '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagRunState {
    Running,
    Success,
    Failed,
}

impl DagRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DagRunState::Running => "running",
            DagRunState::Success => "success",
            DagRunState::Failed => "failed",
        }
    }

    /// A run succeeds when none of its tasks failed
    pub fn from_tasks<'a>(states: impl IntoIterator<Item = &'a TaskState>) -> Self {
        if states.into_iter().any(|s| s.is_failure()) {
            DagRunState::Failed
        } else {
            DagRunState::Success
        }
    }
}

impl fmt::Display for DagRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DagRunState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(DagRunState::Running),
            "success" => Ok(DagRunState::Success),
            "failed" => Ok(DagRunState::Failed),
            other => Err(PipelineError::InvalidDag(format!("unknown run state '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_from_tasks() {
        let ok = [TaskState::Success, TaskState::Skipped];
        assert_eq!(DagRunState::from_tasks(&ok), DagRunState::Success);

        let bad = [TaskState::Success, TaskState::UpstreamFailed];
        assert_eq!(DagRunState::from_tasks(&bad), DagRunState::Failed);
    }

    #[test]
    fn test_state_strings_parse_back() {
        for state in [
            TaskState::Success,
            TaskState::Failed,
            TaskState::Skipped,
            TaskState::UpstreamFailed,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("queued".parse::<TaskState>().is_err());
    }
}
