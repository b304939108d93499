//! Stage/Tag Mutator
//!
//! Writes promotion decisions back to the registry. There is no local
//! transaction: a crash between the tag write and the stage transition leaves
//! a tagged version outside Production. Re-running the promotion is
//! idempotent and completes the missing half.

use crate::client::ModelRegistry;
use mlops_common::model::{CHALLENGER_TAG, CHAMPION_TAG, TAG_TRUE};
use mlops_common::{Error, ModelVersion, Result, Stage};
use tracing::{info, warn};

/// Tag `champion=True` and move the version to Production
///
/// The registry archives other Production versions of the same model. Stale
/// champion tags on those versions are then removed on a best-effort basis.
pub async fn promote<R: ModelRegistry + ?Sized>(
    registry: &R,
    model_name: &str,
    version: u64,
) -> Result<ModelVersion> {
    registry
        .set_version_tag(model_name, version, CHAMPION_TAG, TAG_TRUE)
        .await?;

    let promoted = registry
        .transition_stage(model_name, version, Stage::Production, true)
        .await
        .map_err(|e| Error::PartialPromotion {
            model: model_name.to_string(),
            version,
            reason: format!("champion tag set but stage transition failed: {}", e),
        })?;

    info!(model = %model_name, version, "Promoted to Production");

    if promoted.has_tag(CHALLENGER_TAG) {
        if let Err(e) = registry
            .delete_version_tag(model_name, version, CHALLENGER_TAG)
            .await
        {
            warn!(model = %model_name, version, "Could not clear challenger tag: {}", e);
        }
    }

    clear_stale_champion_tags(registry, model_name, version).await;
    Ok(promoted)
}

/// Tag `challenger=True`; the stage is left alone
pub async fn tag_challenger<R: ModelRegistry + ?Sized>(
    registry: &R,
    model_name: &str,
    version: u64,
) -> Result<()> {
    registry
        .set_version_tag(model_name, version, CHALLENGER_TAG, TAG_TRUE)
        .await?;
    info!(model = %model_name, version, "Tagged challenger");
    Ok(())
}

/// Remove the champion tag and archive a dethroned champion
///
/// Used when the new champion belongs to a different registered model, where
/// the registry's archive-on-transition does not reach.
pub async fn retire<R: ModelRegistry + ?Sized>(
    registry: &R,
    model_name: &str,
    version: u64,
) -> Result<ModelVersion> {
    match registry
        .delete_version_tag(model_name, version, CHAMPION_TAG)
        .await
    {
        Ok(()) | Err(Error::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    let retired = registry
        .transition_stage(model_name, version, Stage::Archived, false)
        .await?;
    info!(model = %model_name, version, "Retired previous champion");
    Ok(retired)
}

async fn clear_stale_champion_tags<R: ModelRegistry + ?Sized>(
    registry: &R,
    model_name: &str,
    keep_version: u64,
) {
    let versions = match registry.list_versions(model_name).await {
        Ok(versions) => versions,
        Err(e) => {
            warn!(model = %model_name, "Could not list versions to clear stale champion tags: {}", e);
            return;
        }
    };

    for stale in versions
        .iter()
        .filter(|v| v.version != keep_version && v.is_champion())
    {
        match registry
            .delete_version_tag(model_name, stale.version, CHAMPION_TAG)
            .await
        {
            Ok(()) => info!(model = %model_name, version = stale.version, "Cleared stale champion tag"),
            Err(e) => warn!(
                model = %model_name,
                version = stale.version,
                "Could not clear stale champion tag: {}",
                e
            ),
        }
    }
}
