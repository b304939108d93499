//! mlops-serve - champion model serving and batch steps
//!
//! - `serve`: load the Production champion once and answer `/health` and `/predict`
//! - `predict`: label a CSV batch with the recorded champion
//! - `validate`: score the latest trained runs on a labelled set

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use mlops_common::config::{Config, ConfigResolver};
use mlops_common::logging::init_tracing;
use mlops_common::records::{load_latest_runs, ChampionStore};
use mlops_registry::MlflowClient;
use mlops_serve::{batch, build_router, loader, validation, AppState, ModelSlot};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mlops-serve")]
#[command(about = "Serve the champion sentiment model and run batch steps")]
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
    /// Run the HTTP endpoint
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Label a CSV file (or the newest one in a directory)
    Predict {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output_dir: PathBuf,
        /// Date used in the output file name (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Evaluate every run in the latest-runs side-file
    Validate {
        /// Labelled CSV with `text` and `sentiment_num` columns
        #[arg(short, long)]
        input: PathBuf,
        /// Fail when any run's weighted F1 falls below this value
        #[arg(long)]
        min_f1: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigResolver::new(args.config.as_deref())
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("Starting mlops-serve v{}", env!("CARGO_PKG_VERSION"));

    let client = MlflowClient::new(&config.registry).context("Failed to create registry client")?;

    match args.command {
        Command::Serve { host, port } => serve(client, config, host, port).await,
        Command::Predict {
            input,
            output_dir,
            date,
        } => predict(&client, &config, input, output_dir, date).await,
        Command::Validate { input, min_f1 } => validate(&client, &config, input, min_f1).await,
    }
}

async fn serve(client: MlflowClient, config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or_else(|| config.serve.host.clone());
    let port = port.unwrap_or(config.serve.port);

    // Loaded before binding; failure leaves the endpoint up but unhealthy
    let slot = Arc::new(ModelSlot::new());
    if let Err(e) = loader::startup(&slot, &client, &config).await {
        warn!("Starting without a model: {}", e);
    }

    let app = build_router(AppState::new(slot));

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("mlops-serve listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn predict(
    client: &MlflowClient,
    config: &Config,
    input: PathBuf,
    output_dir: PathBuf,
    date: Option<NaiveDate>,
) -> Result<()> {
    let input = batch::resolve_input(&input)?;
    let store = ChampionStore::new(config.state.champion_path());
    let model = loader::load_recorded_champion(client, &store, &config.serve.artifact_file)
        .await
        .context("Failed to load the recorded champion")?;

    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let summary = batch::label_file(&model.classifier, &input, &output_dir, date)?;
    info!(
        "✓ Labelled {} records with {} into {}",
        summary.records,
        model.label(),
        summary.output.display()
    );
    Ok(())
}

async fn validate(client: &MlflowClient, config: &Config, input: PathBuf, min_f1: Option<f64>) -> Result<()> {
    let samples = validation::load_labeled(&input)?;
    let latest = load_latest_runs(&config.state.latest_runs_path())?;
    if latest.is_empty() {
        bail!(
            "No runs listed in {}",
            config.state.latest_runs_path().display()
        );
    }

    let results =
        validation::validate_latest_runs(client, &latest, &samples, &config.serve.artifact_file).await?;

    let mut failing = Vec::new();
    for result in &results {
        println!("{} ({}): {}", result.model, result.run_id, result.report);
        if min_f1.map(|min| result.report.f1 < min).unwrap_or(false) {
            failing.push(result.model.as_str());
        }
    }
    if !failing.is_empty() {
        bail!("F1 below threshold for: {}", failing.join(", "));
    }
    info!("✓ Validated {} runs on {} samples", results.len(), samples.len());
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
