//! Run-history store
//!
//! SQLite tables:
//! - `dag_run`: one row per scheduled invocation
//! - `task_instance`: final state of each task within a run
//!
//! The training gate reads it back to find the last successful training.

use crate::error::Result;
use crate::state::{DagRunState, TaskState};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Final record of one task instance
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    pub state: TaskState,
    /// Attempts made; 0 for tasks that never ran
    pub try_number: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DagRunRecord {
    pub run_id: Uuid,
    pub dag_id: String,
    pub execution_date: NaiveDate,
    pub state: DagRunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// Open (creating if needed) the history database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let newly_created = !db_path.exists();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&db_url).await?;

        if newly_created {
            info!("Initialized new run history: {}", db_path.display());
        } else {
            info!("Opened run history: {}", db_path.display());
        }
        Self::from_pool(pool).await
    }

    /// Private in-memory store; a single connection keeps one database
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
        create_dag_run_table(&pool).await?;
        create_task_instance_table(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn start_run(&self, dag_id: &str, execution_date: NaiveDate) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO dag_run (run_id, dag_id, execution_date, state, started_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run_id.to_string())
        .bind(dag_id)
        .bind(execution_date)
        .bind(DagRunState::Running.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(run_id)
    }

    pub async fn record_task(&self, run_id: Uuid, task: &TaskRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO task_instance
                (run_id, task_id, state, try_number, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id.to_string())
        .bind(&task.task_id)
        .bind(task.state.as_str())
        .bind(task.try_number as i64)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_run(&self, run_id: Uuid, state: DagRunState) -> Result<()> {
        sqlx::query("UPDATE dag_run SET state = ?, finished_at = ? WHERE run_id = ?")
            .bind(state.as_str())
            .bind(Utc::now())
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Execution date of the latest successful `task_id` within a successful
    /// run of `dag_id` strictly before `before`
    pub async fn last_successful_task_date(
        &self,
        dag_id: &str,
        task_id: &str,
        before: NaiveDate,
    ) -> Result<Option<NaiveDate>> {
        let date: Option<NaiveDate> = sqlx::query_scalar(
            "SELECT r.execution_date
             FROM task_instance t
             JOIN dag_run r ON r.run_id = t.run_id
             WHERE r.dag_id = ? AND r.state = 'success' AND r.execution_date < ?
               AND t.task_id = ? AND t.state = 'success'
             ORDER BY r.execution_date DESC
             LIMIT 1",
        )
        .bind(dag_id)
        .bind(before)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(date)
    }

    /// Most recent runs first
    pub async fn recent_runs(&self, dag_id: &str, limit: u32) -> Result<Vec<DagRunRecord>> {
        let rows = sqlx::query(
            "SELECT run_id, dag_id, execution_date, state, started_at, finished_at
             FROM dag_run WHERE dag_id = ?
             ORDER BY started_at DESC LIMIT ?",
        )
        .bind(dag_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DagRunRecord> {
                let run_id: String = row.try_get("run_id")?;
                let state: String = row.try_get("state")?;
                Ok(DagRunRecord {
                    run_id: Uuid::parse_str(&run_id)
                        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                    dag_id: row.try_get("dag_id")?,
                    execution_date: row.try_get("execution_date")?,
                    state: state.parse()?,
                    started_at: row.try_get("started_at")?,
                    finished_at: row.try_get("finished_at")?,
                })
            })
            .collect()
    }

    pub async fn task_instances(&self, run_id: Uuid) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT task_id, state, try_number, started_at, finished_at
             FROM task_instance WHERE run_id = ? ORDER BY rowid",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TaskRecord> {
                let state: String = row.try_get("state")?;
                let try_number: i64 = row.try_get("try_number")?;
                Ok(TaskRecord {
                    task_id: row.try_get("task_id")?,
                    state: state.parse()?,
                    try_number: try_number.max(0) as u32,
                    started_at: row.try_get("started_at")?,
                    finished_at: row.try_get("finished_at")?,
                })
            })
            .collect()
    }
}

async fn create_dag_run_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dag_run (
            run_id TEXT PRIMARY KEY,
            dag_id TEXT NOT NULL,
            execution_date TEXT NOT NULL,
            state TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dag_run_dag_date ON dag_run(dag_id, execution_date)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_task_instance_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_instance (
            run_id TEXT NOT NULL REFERENCES dag_run(run_id) ON DELETE CASCADE,
            task_id TEXT NOT NULL,
            state TEXT NOT NULL,
            try_number INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            finished_at TEXT,
            PRIMARY KEY (run_id, task_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn task(id: &str, state: TaskState) -> TaskRecord {
        TaskRecord {
            task_id: id.to_string(),
            state,
            try_number: 1,
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
        }
    }

    async fn run_with(store: &HistoryStore, date: NaiveDate, train: TaskState, run: DagRunState) {
        let run_id = store.start_run("dag", date).await.unwrap();
        store.record_task(run_id, &task("train_model", train)).await.unwrap();
        store.finish_run(run_id, run).await.unwrap();
    }

    #[tokio::test]
    async fn test_last_successful_training_ignores_failed_runs() {
        let store = HistoryStore::in_memory().await.unwrap();
        run_with(&store, day(1), TaskState::Success, DagRunState::Success).await;
        run_with(&store, day(5), TaskState::Success, DagRunState::Failed).await;
        run_with(&store, day(7), TaskState::Skipped, DagRunState::Success).await;

        let last = store
            .last_successful_task_date("dag", "train_model", day(10))
            .await
            .unwrap();
        assert_eq!(last, Some(day(1)));
    }

    #[tokio::test]
    async fn test_only_earlier_runs_count() {
        let store = HistoryStore::in_memory().await.unwrap();
        run_with(&store, day(10), TaskState::Success, DagRunState::Success).await;

        let none = store
            .last_successful_task_date("dag", "train_model", day(10))
            .await
            .unwrap();
        assert_eq!(none, None);
        let other_dag = store
            .last_successful_task_date("other", "train_model", day(20))
            .await
            .unwrap();
        assert_eq!(other_dag, None);
    }

    #[tokio::test]
    async fn test_runs_and_tasks_read_back() {
        let store = HistoryStore::in_memory().await.unwrap();
        let run_id = store.start_run("dag", day(3)).await.unwrap();
        store.record_task(run_id, &task("crawl_data", TaskState::Success)).await.unwrap();
        store.record_task(run_id, &task("train_model", TaskState::Skipped)).await.unwrap();
        store.finish_run(run_id, DagRunState::Success).await.unwrap();

        let runs = store.recent_runs("dag", 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, run_id);
        assert_eq!(runs[0].execution_date, day(3));
        assert_eq!(runs[0].state, DagRunState::Success);
        assert!(runs[0].finished_at.is_some());

        let tasks = store.task_instances(run_id).await.unwrap();
        let states: Vec<(&str, TaskState)> = tasks.iter().map(|t| (t.task_id.as_str(), t.state)).collect();
        assert_eq!(
            states,
            vec![("crawl_data", TaskState::Success), ("train_model", TaskState::Skipped)]
        );
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.db");

        let store = HistoryStore::open(&path).await.unwrap();
        store.start_run("dag", day(1)).await.unwrap();
        assert!(path.exists());
    }
}
