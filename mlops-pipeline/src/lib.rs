//! mlops-pipeline library - the scheduled training and labelling pipeline
//!
//! A DAG of subprocess steps with trigger rules, a branch that gates training
//! on the time since the last successful training, and a SQLite run history.

pub mod branch;
pub mod dag;
pub mod error;
pub mod history;
pub mod runner;
pub mod state;

pub use dag::{Dag, Task, TaskKind, TriggerRule};
pub use error::{PipelineError, Result};
pub use history::{DagRunRecord, HistoryStore, TaskRecord};
pub use runner::{DagRunSummary, DryRunExecutor, ProcessExecutor, Runner, StepExecutor};
pub use state::{DagRunState, TaskState};
