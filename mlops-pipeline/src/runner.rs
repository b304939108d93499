//! DAG run execution
//!
//! Tasks run one at a time in topological order. A task is evaluated only
//! once all of its upstream tasks are terminal, so join points such as
//! `model_serve` see the final state of both branches.

use crate::branch::{should_train, TrainingDecision};
use crate::dag::{Dag, Readiness, Task, TaskKind};
use crate::error::{PipelineError, Result};
use crate::history::{HistoryStore, TaskRecord};
use crate::state::{DagRunState, TaskState};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use mlops_common::config::PipelineConfig;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runs the command of a single task attempt
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, task_id: &str, argv: &[String]) -> Result<()>;
}

/// Runs steps as child processes; a non-zero exit status is a failure
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    working_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl StepExecutor for ProcessExecutor {
    async fn execute(&self, task_id: &str, argv: &[String]) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PipelineError::InvalidDag(format!("{} has an empty command", task_id)))?;

        let mut command = tokio::process::Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(task = task_id, command = %argv.join(" "), "Spawning step");
        let output = command.output().await.map_err(|source| PipelineError::Spawn {
            task: task_id.to_string(),
            source,
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            debug!(task = task_id, stdout_bytes = output.stdout.len(), "Step finished");
            Ok(())
        } else {
            for line in stderr.lines().rev().take(20).collect::<Vec<_>>().into_iter().rev() {
                warn!(task = task_id, "{}", line);
            }
            Err(PipelineError::StepFailed {
                task: task_id.to_string(),
                status: output.status.to_string(),
            })
        }
    }
}

/// Logs each command instead of running it
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl StepExecutor for DryRunExecutor {
    async fn execute(&self, task_id: &str, argv: &[String]) -> Result<()> {
        info!(task = task_id, "Dry run: {}", argv.join(" "));
        Ok(())
    }
}

/// Outcome of one DAG run
#[derive(Debug, Clone)]
pub struct DagRunSummary {
    pub run_id: Uuid,
    pub dag_id: String,
    pub execution_date: NaiveDate,
    pub state: DagRunState,
    /// Task records in execution order
    pub tasks: Vec<TaskRecord>,
}

impl DagRunSummary {
    pub fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.iter().find(|t| t.task_id == task_id).map(|t| t.state)
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }
}

pub struct Runner<E> {
    dag: Dag,
    executor: E,
    history: HistoryStore,
    retries: u32,
    retry_delay: Duration,
    train_interval_days: i64,
}

impl<E: StepExecutor> Runner<E> {
    pub fn new(dag: Dag, executor: E, history: HistoryStore, config: &PipelineConfig) -> Self {
        Self {
            dag,
            executor,
            history,
            retries: config.retries,
            retry_delay: config.retry_delay(),
            train_interval_days: config.train_interval_days,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Execute one scheduled invocation of the DAG
    pub async fn run(&self, execution_date: NaiveDate) -> Result<DagRunSummary> {
        let order = self.dag.topological_order()?;
        let run_id = self.history.start_run(&self.dag.id, execution_date).await?;
        info!(dag = %self.dag.id, %run_id, %execution_date, "Starting DAG run");

        let records = match self.run_tasks(run_id, &order, execution_date).await {
            Ok(records) => records,
            Err(e) => {
                error!(dag = %self.dag.id, %run_id, "DAG run aborted: {}", e);
                if let Err(mark) = self.history.finish_run(run_id, DagRunState::Failed).await {
                    warn!(%run_id, "Could not mark aborted run as failed: {}", mark);
                }
                return Err(e);
            }
        };

        let state = DagRunState::from_tasks(records.iter().map(|r| &r.state));
        self.history.finish_run(run_id, state).await?;
        match state {
            DagRunState::Failed => error!(dag = %self.dag.id, %run_id, "DAG run failed"),
            _ => info!(dag = %self.dag.id, %run_id, "DAG run succeeded"),
        }

        Ok(DagRunSummary {
            run_id,
            dag_id: self.dag.id.clone(),
            execution_date,
            state,
            tasks: records,
        })
    }

    async fn run_tasks(
        &self,
        run_id: Uuid,
        order: &[&Task],
        execution_date: NaiveDate,
    ) -> Result<Vec<TaskRecord>> {
        let mut states: HashMap<&str, TaskState> = HashMap::new();
        let mut unchosen: HashSet<String> = HashSet::new();
        let mut records = Vec::with_capacity(order.len());

        for task in order.iter().copied() {
            let record = if unchosen.contains(&task.id) {
                not_run(task, TaskState::Skipped)
            } else {
                let upstream: Vec<TaskState> = task
                    .upstream
                    .iter()
                    .filter_map(|id| states.get(id.as_str()).copied())
                    .collect();
                match task.trigger_rule.evaluate(&upstream) {
                    Readiness::Run => self.execute(task, execution_date, &mut unchosen).await,
                    Readiness::Skip => not_run(task, TaskState::Skipped),
                    Readiness::UpstreamFailed => not_run(task, TaskState::UpstreamFailed),
                }
            };

            info!(task = %task.id, state = %record.state, tries = record.try_number, "Task finished");
            self.history.record_task(run_id, &record).await?;
            states.insert(task.id.as_str(), record.state);
            records.push(record);
        }
        Ok(records)
    }

    async fn execute(
        &self,
        task: &Task,
        execution_date: NaiveDate,
        unchosen: &mut HashSet<String>,
    ) -> TaskRecord {
        let started_at = Some(Utc::now());
        let (state, try_number) = match &task.kind {
            TaskKind::Empty => (TaskState::Success, 1),
            TaskKind::Command(argv) => self.run_with_retries(task, argv).await,
            TaskKind::TrainingBranch { train, skip } => {
                match self.training_decision(train, execution_date).await {
                    Ok(decision) => {
                        let (chosen, other) = match decision {
                            TrainingDecision::Train => (train, skip),
                            TrainingDecision::Skip => (skip, train),
                        };
                        info!(task = %task.id, "Branch follows {}", chosen);
                        unchosen.insert(other.clone());
                        (TaskState::Success, 1)
                    }
                    Err(e) => {
                        error!(task = %task.id, "Branch decision failed: {}", e);
                        (TaskState::Failed, 1)
                    }
                }
            }
        };

        TaskRecord {
            task_id: task.id.clone(),
            state,
            try_number,
            started_at,
            finished_at: Some(Utc::now()),
        }
    }

    async fn run_with_retries(&self, task: &Task, argv: &[String]) -> (TaskState, u32) {
        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            match self.executor.execute(&task.id, argv).await {
                Ok(()) => return (TaskState::Success, attempt),
                Err(e) if attempt < attempts => {
                    warn!(
                        task = %task.id,
                        attempt,
                        "{}; retrying in {}s",
                        e,
                        self.retry_delay.as_secs()
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => error!(task = %task.id, attempt, "{}", e),
            }
        }
        (TaskState::Failed, attempts)
    }

    async fn training_decision(&self, train_task: &str, execution_date: NaiveDate) -> Result<TrainingDecision> {
        let last = self
            .history
            .last_successful_task_date(&self.dag.id, train_task, execution_date)
            .await?;
        debug!(last_training = ?last, interval_days = self.train_interval_days, "Checking training interval");
        Ok(should_train(last, execution_date, self.train_interval_days))
    }
}

fn not_run(task: &Task, state: TaskState) -> TaskRecord {
    TaskRecord {
        task_id: task.id.clone(),
        state,
        try_number: 0,
        started_at: None,
        finished_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::*;
    use std::sync::Mutex;

    /// Records calls; fails a task the configured number of times
    #[derive(Default)]
    struct FakeExecutor {
        calls: Mutex<Vec<String>>,
        failures: Mutex<HashMap<String, u32>>,
    }

    impl FakeExecutor {
        fn failing(task: &str, times: u32) -> Self {
            let fake = Self::default();
            fake.failures.lock().unwrap().insert(task.to_string(), times);
            fake
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepExecutor for FakeExecutor {
        async fn execute(&self, task_id: &str, _argv: &[String]) -> Result<()> {
            self.calls.lock().unwrap().push(task_id.to_string());
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(task_id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(PipelineError::StepFailed {
                        task: task_id.to_string(),
                        status: "exit status: 1".to_string(),
                    })
                }
                _ => Ok(()),
            }
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    async fn runner(executor: FakeExecutor) -> Runner<FakeExecutor> {
        let config = PipelineConfig::default();
        let dag = Dag::sentiment_pipeline(&config).unwrap();
        let history = HistoryStore::in_memory().await.unwrap();
        Runner::new(dag, executor, history, &config).with_retry_delay(Duration::ZERO)
    }

    async fn seed_training(history: &HistoryStore, date: NaiveDate) {
        let run_id = history.start_run("twitter_sentiment_analysis_pipeline", date).await.unwrap();
        let record = TaskRecord {
            task_id: TRAIN_MODEL.to_string(),
            state: TaskState::Success,
            try_number: 1,
            started_at: None,
            finished_at: None,
        };
        history.record_task(run_id, &record).await.unwrap();
        history.finish_run(run_id, DagRunState::Success).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_run_takes_training_branch() {
        let runner = runner(FakeExecutor::default()).await;
        let summary = runner.run(day(1)).await.unwrap();

        assert_eq!(summary.state, DagRunState::Success);
        assert_eq!(summary.task_state(TRAIN_MODEL), Some(TaskState::Success));
        assert_eq!(summary.task_state(SKIP_TRAINING), Some(TaskState::Skipped));
        assert_eq!(summary.task_state(MODEL_SERVE), Some(TaskState::Success));
        assert_eq!(
            runner.executor().calls(),
            vec![
                CRAWL_DATA,
                PREPROCESS_DATA,
                TRAIN_MODEL,
                MODEL_DEPLOY,
                MODEL_VALIDATE,
                MODEL_SERVE,
                PREDICT_DATA,
                VALIDATE_DATA,
                INGEST_DATA
            ]
        );
    }

    #[tokio::test]
    async fn test_recent_training_takes_skip_branch() {
        let runner = runner(FakeExecutor::default()).await;
        seed_training(runner.history(), day(1)).await;

        let summary = runner.run(day(10)).await.unwrap();

        assert_eq!(summary.state, DagRunState::Success);
        assert_eq!(summary.task_state(SKIP_TRAINING), Some(TaskState::Success));
        for skipped in [TRAIN_MODEL, MODEL_DEPLOY, MODEL_VALIDATE] {
            assert_eq!(summary.task_state(skipped), Some(TaskState::Skipped), "{}", skipped);
        }
        assert_eq!(summary.task_state(PREDICT_DATA), Some(TaskState::Success));

        let calls = runner.executor().calls();
        assert!(!calls.iter().any(|c| c == TRAIN_MODEL));
        assert_eq!(calls.iter().filter(|c| *c == PREDICT_DATA).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_training_still_serves_but_fails_run() {
        let runner = runner(FakeExecutor::failing(TRAIN_MODEL, 5)).await;
        let summary = runner.run(day(1)).await.unwrap();

        assert_eq!(summary.state, DagRunState::Failed);
        let train = summary.task(TRAIN_MODEL).unwrap();
        assert_eq!(train.state, TaskState::Failed);
        assert_eq!(train.try_number, 2);
        assert_eq!(summary.task_state(MODEL_DEPLOY), Some(TaskState::UpstreamFailed));
        assert_eq!(summary.task_state(MODEL_VALIDATE), Some(TaskState::UpstreamFailed));
        assert_eq!(summary.task_state(MODEL_SERVE), Some(TaskState::Success));
        assert_eq!(summary.task_state(INGEST_DATA), Some(TaskState::Success));
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let runner = runner(FakeExecutor::failing(CRAWL_DATA, 1)).await;
        let summary = runner.run(day(1)).await.unwrap();

        assert_eq!(summary.state, DagRunState::Success);
        assert_eq!(summary.task(CRAWL_DATA).unwrap().try_number, 2);
        let crawls = runner.executor().calls().iter().filter(|c| *c == CRAWL_DATA).count();
        assert_eq!(crawls, 2);
    }

    /// Drops the task table on its first call so recording the task fails
    struct HistoryBreaker {
        history: HistoryStore,
    }

    #[async_trait]
    impl StepExecutor for HistoryBreaker {
        async fn execute(&self, _task_id: &str, _argv: &[String]) -> Result<()> {
            sqlx::query("DROP TABLE IF EXISTS task_instance")
                .execute(self.history.pool())
                .await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_aborted_run_is_marked_failed() {
        let config = PipelineConfig::default();
        let dag = Dag::sentiment_pipeline(&config).unwrap();
        let history = HistoryStore::in_memory().await.unwrap();
        let breaker = HistoryBreaker {
            history: history.clone(),
        };
        let runner = Runner::new(dag, breaker, history, &config);

        let err = runner.run(day(1)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Database(_)));

        let runs = runner.history().recent_runs(&runner.dag().id, 5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].state, DagRunState::Failed);
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_run_is_recorded_in_history() {
        let runner = runner(FakeExecutor::default()).await;
        let summary = runner.run(day(1)).await.unwrap();

        let runs = runner.history().recent_runs(&summary.dag_id, 5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].state, DagRunState::Success);

        let tasks = runner.history().task_instances(summary.run_id).await.unwrap();
        let stored: Vec<(&str, TaskState)> = tasks.iter().map(|t| (t.task_id.as_str(), t.state)).collect();
        let reported: Vec<(&str, TaskState)> =
            summary.tasks.iter().map(|t| (t.task_id.as_str(), t.state)).collect();
        assert_eq!(stored.len(), 11);
        assert_eq!(stored, reported);
    }
}
