//! Champion model loading
//!
//! The serving endpoint loads the registry's Production champion; the batch
//! prediction step loads whatever the champion side-file names and never
//! re-runs selection.

use crate::classifier::ModelArtifact;
use crate::slot::{LoadedModel, ModelSlot};
use mlops_common::config::Config;
use mlops_common::records::ChampionStore;
use mlops_common::{ChampionRecord, Error, Result};
use mlops_registry::artifacts::{download_run_file, download_version_file};
use mlops_registry::query::current_champion;
use mlops_registry::register::run_model_uri;
use mlops_registry::ModelRegistry;
use tracing::{error, info};

/// Production champion according to the registry
pub async fn production_champion<R: ModelRegistry + ?Sized>(
    registry: &R,
    config: &Config,
) -> Result<ChampionRecord> {
    let champion = current_champion(registry, &config.registry.model_prefix, &config.promotion.metric)
        .await?
        .ok_or_else(|| {
            Error::NoChampionFound(format!(
                "no Production version under prefix '{}'",
                config.registry.model_prefix
            ))
        })?;
    Ok(ChampionRecord {
        name: champion.item.name,
        version: champion.item.version,
        run_id: Some(champion.item.run_id),
        score: Some(champion.score),
    })
}

/// Download and parse the artifact of one model version
pub async fn load_version<R: ModelRegistry + ?Sized>(
    registry: &R,
    record: &ChampionRecord,
    artifact_file: &str,
) -> Result<LoadedModel> {
    let bytes = download_version_file(registry, &record.name, record.version, artifact_file)
        .await
        .map_err(|e| match e {
            Error::NotFound(msg) => Error::ModelLoad(format!("artifact missing: {}", msg)),
            other => other,
        })?;
    let classifier = ModelArtifact::from_slice(&bytes)?;
    info!(
        model = %record.name,
        version = record.version,
        kind = classifier.kind(),
        "Model artifact loaded"
    );
    Ok(LoadedModel {
        name: record.name.clone(),
        version: record.version,
        classifier,
    })
}

/// Model logged by a training run, for validating runs before promotion
pub async fn load_run<R: ModelRegistry + ?Sized>(
    registry: &R,
    run_id: &str,
    artifact_file: &str,
) -> Result<ModelArtifact> {
    let bytes = download_run_file(registry, &run_model_uri(run_id), artifact_file).await?;
    ModelArtifact::from_slice(&bytes)
}

/// Model named by the champion side-file
pub async fn load_recorded_champion<R: ModelRegistry + ?Sized>(
    registry: &R,
    store: &ChampionStore,
    artifact_file: &str,
) -> Result<LoadedModel> {
    let record = store.require()?;
    info!(model = %record.name, version = record.version, "Using recorded champion");
    load_version(registry, &record, artifact_file).await
}

/// Fill the slot with the Production champion
///
/// Errors leave the slot `Failed`; the process keeps serving as unhealthy.
pub async fn startup<R: ModelRegistry + ?Sized>(
    slot: &ModelSlot,
    registry: &R,
    config: &Config,
) -> Result<()> {
    if !slot.begin_loading() {
        return Ok(());
    }

    let loaded = match production_champion(registry, config).await {
        Ok(record) => load_version(registry, &record, &config.serve.artifact_file).await,
        Err(e) => Err(e),
    };

    match loaded {
        Ok(model) => {
            info!("✓ Serving {}", model.label());
            slot.set_ready(model);
            Ok(())
        }
        Err(e) => {
            error!("Model load failed, serving as unhealthy: {}", e);
            slot.set_failed(e.to_string());
            Err(e)
        }
    }
}
