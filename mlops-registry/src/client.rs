//! Registry access seam
//!
//! Everything above this trait (selection, mutation, serving) is written
//! against `ModelRegistry`, so it runs unchanged against the tracking server
//! or the in-memory registry used by tests.

use async_trait::async_trait;
use mlops_common::{ModelVersion, RegisteredModel, Result, Run, Stage};

#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Registered models whose name starts with `prefix`
    async fn list_models(&self, prefix: &str) -> Result<Vec<RegisteredModel>>;

    /// All versions of one registered model
    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>>;

    /// Run with its metrics and parameters
    async fn get_run(&self, run_id: &str) -> Result<Run>;

    async fn set_version_tag(&self, name: &str, version: u64, key: &str, value: &str) -> Result<()>;

    async fn delete_version_tag(&self, name: &str, version: u64, key: &str) -> Result<()>;

    /// Move a version to `stage`
    ///
    /// With `archive_existing`, other versions of the same model currently in
    /// `stage` are moved to `Archived` by the registry.
    async fn transition_stage(
        &self,
        name: &str,
        version: u64,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion>;

    /// Create a registered model; succeeds if it already exists
    async fn create_registered_model(&self, name: &str) -> Result<()>;

    async fn create_model_version(&self, name: &str, source: &str, run_id: &str) -> Result<ModelVersion>;

    /// URI of the artifact directory backing a model version
    async fn artifact_root(&self, name: &str, version: u64) -> Result<String>;

    /// Raw bytes behind an artifact URI
    async fn fetch_artifact(&self, uri: &str) -> Result<Vec<u8>>;
}
