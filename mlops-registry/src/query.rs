//! Registry Query Layer
//!
//! Read-only helpers composed from `ModelRegistry` calls. Failures reaching
//! the tracking server propagate as `RegistryUnavailable`; they are never
//! retried here.

use crate::client::ModelRegistry;
use crate::selector::{select_scored, Scored};
use mlops_common::model::MISSING_SCORE;
use mlops_common::{Error, ModelVersion, Result, Stage};
use tracing::{debug, warn};

/// Every version of every model under `prefix`, ordered by model name then
/// version number so that selection ties resolve deterministically
pub async fn candidate_versions<R: ModelRegistry + ?Sized>(
    registry: &R,
    prefix: &str,
) -> Result<Vec<ModelVersion>> {
    let mut models = registry.list_models(prefix).await?;
    models.sort_by(|a, b| a.name.cmp(&b.name));

    let mut versions = Vec::new();
    for model in models {
        let mut model_versions = registry.list_versions(&model.name).await?;
        model_versions.sort_by_key(|v| v.version);
        versions.extend(model_versions);
    }
    debug!(prefix = %prefix, count = versions.len(), "Collected candidate versions");
    Ok(versions)
}

/// Attach each version's run metric
///
/// A version whose run has disappeared or lacks the metric carries `None`
/// and never wins a selection.
pub async fn score_versions<R: ModelRegistry + ?Sized>(
    registry: &R,
    versions: Vec<ModelVersion>,
    metric: &str,
) -> Result<Vec<(ModelVersion, Option<f64>)>> {
    let mut scored = Vec::with_capacity(versions.len());
    for version in versions {
        let score = run_score(registry, &version.run_id, metric).await?;
        scored.push((version, score));
    }
    Ok(scored)
}

/// Metric value of a run; `None` if the run does not exist or lacks the metric
pub async fn run_score<R: ModelRegistry + ?Sized>(
    registry: &R,
    run_id: &str,
    metric: &str,
) -> Result<Option<f64>> {
    match registry.get_run(run_id).await {
        Ok(run) => Ok(run.metric(metric)),
        Err(Error::NotFound(msg)) => {
            warn!(run_id = %run_id, "Run not found, treating as unscored: {}", msg);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// The running champion: best-scoring Production version under `prefix`
///
/// Returns `None` when no prefixed model has a Production version.
pub async fn current_champion<R: ModelRegistry + ?Sized>(
    registry: &R,
    prefix: &str,
    metric: &str,
) -> Result<Option<Scored<ModelVersion>>> {
    let production: Vec<ModelVersion> = candidate_versions(registry, prefix)
        .await?
        .into_iter()
        .filter(|v| v.current_stage == Stage::Production)
        .collect();

    if production.is_empty() {
        return Ok(None);
    }

    let scored = score_versions(registry, production.clone(), metric).await?;
    if let Some(best) = select_scored(scored).champion {
        return Ok(Some(best));
    }

    // Production versions exist but none carries the metric; the first one
    // still defends, with the missing-metric score
    Ok(production.into_iter().next().map(|v| Scored::new(v, MISSING_SCORE)))
}

/// Version of `model_name` registered from `run_id`, if any
pub async fn find_version_for_run<R: ModelRegistry + ?Sized>(
    registry: &R,
    model_name: &str,
    run_id: &str,
) -> Result<Option<ModelVersion>> {
    let versions = match registry.list_versions(model_name).await {
        Ok(versions) => versions,
        Err(Error::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    // Latest registration wins if the same run was registered twice
    Ok(versions
        .into_iter()
        .filter(|v| v.run_id == run_id)
        .max_by_key(|v| v.version))
}
