//! mlops-promote - registry side of the training pipeline
//!
//! - `register`: register the runs listed in the latest-runs side-file
//! - `promote`: decide the champion and write the champion side-file;
//!   with `--serve`, restart the serving endpoint on the champion
//! - `status`: print the recorded and the registry's current champion

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mlops_common::config::{Config, ConfigResolver, PromotionPolicy};
use mlops_common::logging::init_tracing;
use mlops_common::records::{load_latest_runs, ChampionStore};
use mlops_registry::launch::ServeLauncher;
use mlops_registry::promotion::{Promoter, PromotionOutcome};
use mlops_registry::query::current_champion;
use mlops_registry::register::{register_latest_runs, Registration};
use mlops_registry::MlflowClient;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mlops-promote")]
#[command(about = "Register trained runs and promote the champion model")]
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
    /// Register the runs named in the latest-runs side-file
    Register,
    /// Select the champion and update stages, tags and the champion record
    Promote {
        /// Promotion policy (defaults to the configured one)
        #[arg(long, value_parser = parse_policy)]
        policy: Option<PromotionPolicy>,
        /// Restart the serving endpoint once a champion is in Production
        #[arg(long)]
        serve: bool,
    },
    /// Show the recorded champion next to the registry's Production champion
    Status,
}

fn parse_policy(s: &str) -> std::result::Result<PromotionPolicy, String> {
    s.parse().map_err(|e: mlops_common::Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigResolver::new(args.config.as_deref())
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("Starting mlops-promote v{}", env!("CARGO_PKG_VERSION"));
    info!("Tracking server: {}", config.registry.tracking_uri);

    let client = MlflowClient::new(&config.registry).context("Failed to create registry client")?;

    match args.command {
        Command::Register => register(&client, &config).await,
        Command::Promote { policy, serve } => {
            let launcher = serve.then(|| ServeLauncher::from_config(&config, args.config.as_deref()));
            promote(&client, &config, policy, launcher).await
        }
        Command::Status => status(&client, &config).await,
    }
}

async fn register(client: &MlflowClient, config: &Config) -> Result<()> {
    let path = config.state.latest_runs_path();
    let latest = load_latest_runs(&path)
        .with_context(|| format!("Failed to read latest runs from {}", path.display()))?;
    if latest.is_empty() {
        warn!("No runs listed in {}", path.display());
        return Ok(());
    }

    let registrations = register_latest_runs(client, &latest, &config.registry.model_prefix)
        .await
        .context("Registration failed")?;

    let created = registrations
        .iter()
        .filter(|r| matches!(r, Registration::Created(_)))
        .count();
    info!(
        "✓ Registration complete: {} created, {} already registered",
        created,
        registrations.len() - created
    );
    Ok(())
}

async fn promote(
    client: &MlflowClient,
    config: &Config,
    policy: Option<PromotionPolicy>,
    launcher: Option<ServeLauncher>,
) -> Result<()> {
    let mut promoter = Promoter::new(client, config);
    if let Some(policy) = policy {
        promoter = promoter.with_policy(policy);
    }

    let outcome = promoter.run().await.context("Promotion failed")?;
    match &outcome {
        PromotionOutcome::Promoted { champion, previous } => match previous {
            Some(previous) => info!("✓ Promoted {} (replaces {})", champion, previous),
            None => info!("✓ Promoted {}", champion),
        },
        PromotionOutcome::Retained { champion, challenger } => match challenger {
            Some(challenger) => info!("✓ Retained {} (challenger {})", champion, challenger),
            None => info!("✓ Retained {}", champion),
        },
        PromotionOutcome::NoChampion => warn!("No eligible model found; nothing promoted"),
    }

    if let Some(launcher) = launcher {
        if matches!(outcome, PromotionOutcome::NoChampion) {
            warn!("No champion to serve; endpoint left as is");
        } else {
            let pid = launcher
                .restart()
                .await
                .context("Failed to start the serving endpoint")?;
            info!("✓ Serving endpoint running (pid {}) on port {}", pid, config.serve.port);
        }
    }
    Ok(())
}

async fn status(client: &MlflowClient, config: &Config) -> Result<()> {
    let store = ChampionStore::new(config.state.champion_path());
    match store.load()? {
        Some(record) => println!("recorded champion: {} v{}", record.name, record.version),
        None => println!("recorded champion: none ({})", store.path().display()),
    }

    let live = current_champion(client, &config.registry.model_prefix, &config.promotion.metric)
        .await
        .context("Failed to query registry")?;
    match live {
        Some(champion) => println!(
            "registry champion: {} v{} {}={:.4}",
            champion.item.name, champion.item.version, config.promotion.metric, champion.score
        ),
        None => println!("registry champion: none"),
    }
    Ok(())
}
