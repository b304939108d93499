//! Registration of freshly trained runs
//!
//! Each entry of the latest-runs side-file becomes a version of
//! `<prefix><short name>` whose source is the run's `model` artifact
//! directory. Runs already registered under their model are left alone.

use crate::client::ModelRegistry;
use crate::query::find_version_for_run;
use mlops_common::records::LatestRuns;
use mlops_common::{ModelVersion, Result};
use tracing::info;

/// Artifact path, relative to the run root, holding the logged model
pub const MODEL_ARTIFACT_PATH: &str = "model";

/// Source URI of a run's logged model
pub fn run_model_uri(run_id: &str) -> String {
    format!("runs:/{}/{}", run_id, MODEL_ARTIFACT_PATH)
}

/// Outcome for one latest-runs entry
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Created(ModelVersion),
    AlreadyRegistered(ModelVersion),
}

impl Registration {
    pub fn version(&self) -> &ModelVersion {
        match self {
            Registration::Created(v) | Registration::AlreadyRegistered(v) => v,
        }
    }
}

pub async fn register_latest_runs<R: ModelRegistry + ?Sized>(
    registry: &R,
    latest_runs: &LatestRuns,
    prefix: &str,
) -> Result<Vec<Registration>> {
    let mut registrations = Vec::with_capacity(latest_runs.len());

    for (short_name, run_id) in latest_runs {
        let model_name = format!("{}{}", prefix, short_name);

        if let Some(existing) = find_version_for_run(registry, &model_name, run_id).await? {
            info!(model = %model_name, version = existing.version, run_id = %run_id, "Run already registered");
            registrations.push(Registration::AlreadyRegistered(existing));
            continue;
        }

        // Fails fast on a missing run rather than registering a dangling source
        registry.get_run(run_id).await?;
        registry.create_registered_model(&model_name).await?;
        let created = registry
            .create_model_version(&model_name, &run_model_uri(run_id), run_id)
            .await?;
        info!(model = %model_name, version = created.version, run_id = %run_id, "Registered model version");
        registrations.push(Registration::Created(created));
    }

    Ok(registrations)
}
