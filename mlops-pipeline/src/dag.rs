//! DAG definition
//!
//! Tasks declare their upstream dependencies and a trigger rule deciding,
//! once every upstream task is terminal, whether they run, are skipped or
//! inherit an upstream failure.

use crate::error::{PipelineError, Result};
use crate::state::TaskState;
use mlops_common::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

pub const CRAWL_DATA: &str = "crawl_data";
pub const PREPROCESS_DATA: &str = "preprocess_data";
pub const CHECK_TRAINING: &str = "check_training_condition";
pub const TRAIN_MODEL: &str = "train_model";
pub const SKIP_TRAINING: &str = "skip_training";
pub const MODEL_DEPLOY: &str = "model_deploy";
pub const MODEL_VALIDATE: &str = "model_validate";
pub const MODEL_SERVE: &str = "model_serve";
pub const PREDICT_DATA: &str = "predict_data";
pub const VALIDATE_DATA: &str = "validate_data";
pub const INGEST_DATA: &str = "ingest_data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    /// Every upstream task succeeded
    #[default]
    AllSuccess,
    /// Every upstream task is terminal, whatever its state
    AllDone,
    /// No upstream failure and at least one upstream success
    NoneFailedMinOneSuccess,
}

/// What a trigger rule makes of the upstream states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Run,
    Skip,
    UpstreamFailed,
}

impl TriggerRule {
    pub fn evaluate(&self, upstream: &[TaskState]) -> Readiness {
        if upstream.is_empty() {
            return Readiness::Run;
        }
        let failed = upstream.iter().any(|s| s.is_failure());
        let any_success = upstream.iter().any(|s| *s == TaskState::Success);
        let all_success = upstream.iter().all(|s| *s == TaskState::Success);

        match self {
            TriggerRule::AllDone => Readiness::Run,
            TriggerRule::AllSuccess if all_success => Readiness::Run,
            TriggerRule::AllSuccess if failed => Readiness::UpstreamFailed,
            TriggerRule::AllSuccess => Readiness::Skip,
            TriggerRule::NoneFailedMinOneSuccess if failed => Readiness::UpstreamFailed,
            TriggerRule::NoneFailedMinOneSuccess if any_success => Readiness::Run,
            TriggerRule::NoneFailedMinOneSuccess => Readiness::Skip,
        }
    }
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerRule::AllSuccess => "all_success",
            TriggerRule::AllDone => "all_done",
            TriggerRule::NoneFailedMinOneSuccess => "none_failed_min_one_success",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// External program; argv[0] is the executable
    Command(Vec<String>),
    /// Decides whether to train; follows `train` or `skip`
    TrainingBranch { train: String, skip: String },
    /// No-op join point
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub trigger_rule: TriggerRule,
    pub upstream: Vec<String>,
}

impl Task {
    pub fn command(id: &str, argv: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            kind: TaskKind::Command(argv),
            trigger_rule: TriggerRule::AllSuccess,
            upstream: Vec::new(),
        }
    }

    pub fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: TaskKind::Empty,
            trigger_rule: TriggerRule::AllSuccess,
            upstream: Vec::new(),
        }
    }

    pub fn after(mut self, upstream: &[&str]) -> Self {
        self.upstream = upstream.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn rule(mut self, rule: TriggerRule) -> Self {
        self.trigger_rule = rule;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Dag {
    pub id: String,
    tasks: Vec<Task>,
}

impl Dag {
    /// Build and validate a DAG
    pub fn new(id: impl Into<String>, tasks: Vec<Task>) -> Result<Self> {
        let dag = Self { id: id.into(), tasks };
        dag.validate()?;
        Ok(dag)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Tasks listing `id` as upstream
    pub fn downstream(&self, id: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.upstream.iter().any(|u| u == id))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(PipelineError::InvalidDag(format!("duplicate task {}", task.id)));
            }
        }
        for task in &self.tasks {
            if let Some(missing) = task.upstream.iter().find(|u| !seen.contains(u.as_str())) {
                return Err(PipelineError::InvalidDag(format!(
                    "{} depends on unknown task {}",
                    task.id, missing
                )));
            }
            if let TaskKind::TrainingBranch { train, skip } = &task.kind {
                for target in [train, skip] {
                    let direct = self
                        .task(target)
                        .map(|t| t.upstream.contains(&task.id))
                        .unwrap_or(false);
                    if !direct {
                        return Err(PipelineError::InvalidDag(format!(
                            "branch {} target {} is not a direct downstream task",
                            task.id, target
                        )));
                    }
                }
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm; ties keep declaration order
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let mut indegree: HashMap<&str, usize> = self
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), t.upstream.len()))
            .collect();
        let mut ready: VecDeque<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.upstream.is_empty())
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(task) = ready.pop_front() {
            order.push(task);
            for next in self.downstream(&task.id) {
                if let Some(count) = indegree.get_mut(next.id.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(next);
                    }
                }
            }
        }

        if order.len() != self.tasks.len() {
            return Err(PipelineError::InvalidDag(format!("{} contains a cycle", self.id)));
        }
        Ok(order)
    }

    /// The sentiment pipeline, with commands taken from `config.steps`
    ///
    /// ```text
    /// crawl_data -> preprocess_data -> check_training_condition
    ///   -> train_model -> model_deploy -> model_validate -> model_serve
    ///   -> skip_training ----------------------------------> model_serve
    /// model_serve (all_done) -> predict_data -> validate_data -> ingest_data
    /// ```
    pub fn sentiment_pipeline(config: &PipelineConfig) -> Result<Self> {
        let step = |id: &str| -> Result<Task> {
            let argv = config
                .steps
                .get(id)
                .filter(|argv| !argv.is_empty())
                .cloned()
                .ok_or_else(|| PipelineError::InvalidDag(format!("no command configured for {}", id)))?;
            Ok(Task::command(id, argv))
        };

        let branch = Task {
            id: CHECK_TRAINING.to_string(),
            kind: TaskKind::TrainingBranch {
                train: TRAIN_MODEL.to_string(),
                skip: SKIP_TRAINING.to_string(),
            },
            trigger_rule: TriggerRule::AllSuccess,
            upstream: vec![PREPROCESS_DATA.to_string()],
        };

        Dag::new(
            config.dag_id.clone(),
            vec![
                step(CRAWL_DATA)?,
                step(PREPROCESS_DATA)?.after(&[CRAWL_DATA]),
                branch,
                step(TRAIN_MODEL)?.after(&[CHECK_TRAINING]),
                Task::empty(SKIP_TRAINING).after(&[CHECK_TRAINING]),
                step(MODEL_DEPLOY)?.after(&[TRAIN_MODEL]),
                step(MODEL_VALIDATE)?.after(&[MODEL_DEPLOY]),
                step(MODEL_SERVE)?
                    .after(&[MODEL_VALIDATE, SKIP_TRAINING])
                    .rule(TriggerRule::AllDone),
                step(PREDICT_DATA)?
                    .after(&[MODEL_SERVE])
                    .rule(TriggerRule::NoneFailedMinOneSuccess),
                step(VALIDATE_DATA)?
                    .after(&[PREDICT_DATA])
                    .rule(TriggerRule::NoneFailedMinOneSuccess),
                step(INGEST_DATA)?
                    .after(&[VALIDATE_DATA])
                    .rule(TriggerRule::NoneFailedMinOneSuccess),
            ],
        )
    }
}
