//! mlops-pipeline - scheduled sentiment pipeline runner
//!
//! - `run`: execute one invocation of the DAG for an execution date
//! - `history`: list recent DAG runs and their task states

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use mlops_common::config::ConfigResolver;
use mlops_common::logging::init_tracing;
use mlops_pipeline::{
    Dag, DagRunState, DryRunExecutor, HistoryStore, ProcessExecutor, Runner, StepExecutor,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mlops-pipeline")]
#[command(about = "Run the crawl, train, serve and label pipeline")]
#[command(version)]
struct Args {
    /// Configuration file (overrides MLOPS_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute the DAG once
    Run {
        /// Scheduled date of this run (defaults to today)
        #[arg(long)]
        execution_date: Option<NaiveDate>,
        /// Log step commands without running them or touching the history
        #[arg(long)]
        dry_run: bool,
        /// Working directory for step commands
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
    /// Show recent DAG runs
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigResolver::new(args.config.as_deref())
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("Starting mlops-pipeline v{}", env!("CARGO_PKG_VERSION"));

    let pipeline = &config.pipeline;
    let dag = Dag::sentiment_pipeline(pipeline).context("Invalid pipeline definition")?;
    let db_path = pipeline.history_db_path(&config.state);

    match args.command {
        Command::Run {
            execution_date,
            dry_run,
            working_dir,
        } => {
            let date = execution_date.unwrap_or_else(|| Local::now().date_naive());
            if dry_run {
                warn!("Dry run: history is kept in memory and discarded");
                let history = HistoryStore::in_memory().await?;
                run(Runner::new(dag, DryRunExecutor, history, pipeline), date).await
            } else {
                let history = HistoryStore::open(&db_path)
                    .await
                    .with_context(|| format!("Failed to open run history {}", db_path.display()))?;
                let mut executor = ProcessExecutor::new();
                if let Some(dir) = working_dir {
                    executor = executor.with_working_dir(dir);
                }
                run(Runner::new(dag, executor, history, pipeline), date).await
            }
        }
        Command::History { limit } => {
            let history = HistoryStore::open(&db_path)
                .await
                .with_context(|| format!("Failed to open run history {}", db_path.display()))?;
            show_history(&history, &dag.id, limit).await
        }
    }
}

async fn run<E: StepExecutor>(runner: Runner<E>, date: NaiveDate) -> Result<()> {
    let summary = runner.run(date).await.context("DAG run aborted")?;
    for task in &summary.tasks {
        info!("  {:<26} {:<16} tries={}", task.task_id, task.state, task.try_number);
    }
    if summary.state == DagRunState::Failed {
        bail!("DAG run {} for {} failed", summary.run_id, summary.execution_date);
    }
    info!("✓ DAG run {} for {} succeeded", summary.run_id, summary.execution_date);
    Ok(())
}

async fn show_history(history: &HistoryStore, dag_id: &str, limit: u32) -> Result<()> {
    let runs = history.recent_runs(dag_id, limit).await?;
    if runs.is_empty() {
        println!("no runs recorded for {}", dag_id);
        return Ok(());
    }

    for run in runs {
        println!(
            "{}  {}  {:<8} started {}",
            run.execution_date,
            run.run_id,
            run.state,
            run.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        for task in history.task_instances(run.run_id).await? {
            println!("    {:<26} {}", task.task_id, task.state);
        }
    }
    Ok(())
}
