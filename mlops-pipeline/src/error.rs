//! Pipeline error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// DAG definition is inconsistent
    #[error("Invalid DAG: {0}")]
    InvalidDag(String),

    /// A command step could not be started
    #[error("Failed to spawn {task}: {source}")]
    Spawn {
        task: String,
        #[source]
        source: std::io::Error,
    },

    /// A command step exited unsuccessfully
    #[error("Step {task} failed with {status}")]
    StepFailed { task: String, status: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
