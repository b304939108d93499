//! In-memory registry
//!
//! Mirrors the tracking server's observable semantics (string-keyed tags,
//! monotonic versions, archive-on-transition) without any I/O. Used by the
//! test suites of every crate; other crates enable it with `test-util`.

use crate::artifacts::{join_uri, ArtifactLocation};
use crate::client::ModelRegistry;
use async_trait::async_trait;
use mlops_common::model::DEFAULT_METRIC;
use mlops_common::{Error, ModelVersion, RegisteredModel, Result, Run, Stage};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    models: BTreeMap<String, Vec<ModelVersion>>,
    runs: HashMap<String, Run>,
    artifacts: HashMap<String, Vec<u8>>,
    unavailable: bool,
    fail_transitions: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    inner: Mutex<Inner>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-mutation
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(inner: &Inner) -> Result<()> {
        if inner.unavailable {
            Err(Error::RegistryUnavailable("in-memory registry offline".into()))
        } else {
            Ok(())
        }
    }

    /// Record a run scored by `f1_score`
    pub fn add_scored_run(&self, run_id: &str, f1: f64) {
        let mut run = Run {
            run_id: run_id.to_string(),
            artifact_uri: Some(format!("mem://runs/{}/artifacts", run_id)),
            ..Default::default()
        };
        run.metrics.insert(DEFAULT_METRIC.to_string(), f1);
        self.add_run(run);
    }

    pub fn add_run(&self, run: Run) {
        self.lock().runs.insert(run.run_id.clone(), run);
    }

    /// Register a new version of `name` produced by `run_id`
    pub fn add_version(&self, name: &str, run_id: &str, stage: Stage) -> u64 {
        let mut inner = self.lock();
        let versions = inner.models.entry(name.to_string()).or_default();
        let version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        versions.push(ModelVersion {
            name: name.to_string(),
            version,
            run_id: run_id.to_string(),
            current_stage: stage,
            tags: BTreeMap::new(),
            source: Some(format!("runs:/{}/model", run_id)),
        });
        version
    }

    /// Store artifact bytes under an absolute URI
    pub fn put_artifact(&self, uri: &str, bytes: impl Into<Vec<u8>>) {
        self.lock().artifacts.insert(uri.to_string(), bytes.into());
    }

    /// Store a file inside a run's `model` artifact directory
    pub fn put_model_file(&self, run_id: &str, file: &str, bytes: impl Into<Vec<u8>>) {
        let uri = join_uri(&format!("mem://runs/{}/artifacts/model", run_id), file);
        self.put_artifact(&uri, bytes);
    }

    /// Make every call fail with `RegistryUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Fail the next `count` stage transitions with `RegistryUnavailable`
    pub fn fail_next_transitions(&self, count: usize) {
        self.lock().fail_transitions = count;
    }

    pub fn version(&self, name: &str, version: u64) -> Option<ModelVersion> {
        self.lock()
            .models
            .get(name)
            .and_then(|vs| vs.iter().find(|v| v.version == version).cloned())
    }

    /// Every version of every model, ordered by name then version
    pub fn snapshot(&self) -> Vec<ModelVersion> {
        self.lock().models.values().flatten().cloned().collect()
    }

    fn version_mut<'a>(inner: &'a mut Inner, name: &str, version: u64) -> Result<&'a mut ModelVersion> {
        inner
            .models
            .get_mut(name)
            .and_then(|vs| vs.iter_mut().find(|v| v.version == version))
            .ok_or_else(|| Error::NotFound(format!("model version {} v{}", name, version)))
    }
}

#[async_trait]
impl ModelRegistry for InMemoryRegistry {
    async fn list_models(&self, prefix: &str) -> Result<Vec<RegisteredModel>> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        Ok(inner
            .models
            .keys()
            .filter(|name| name.starts_with(prefix))
            .map(|name| RegisteredModel { name: name.clone() })
            .collect())
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        inner
            .models
            .get(model_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("registered model {}", model_name)))
    }

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        inner
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("run {}", run_id)))
    }

    async fn set_version_tag(&self, name: &str, version: u64, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        Self::version_mut(&mut inner, name, version)?
            .tags
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_version_tag(&self, name: &str, version: u64, key: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        let removed = Self::version_mut(&mut inner, name, version)?.tags.remove(key);
        if removed.is_none() {
            return Err(Error::NotFound(format!("tag {} on {} v{}", key, name, version)));
        }
        Ok(())
    }

    async fn transition_stage(
        &self,
        name: &str,
        version: u64,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        if inner.fail_transitions > 0 {
            inner.fail_transitions -= 1;
            return Err(Error::RegistryUnavailable("transition-stage dropped".into()));
        }

        Self::version_mut(&mut inner, name, version)?;
        let archives = archive_existing && matches!(stage, Stage::Staging | Stage::Production);
        if let Some(versions) = inner.models.get_mut(name) {
            for v in versions.iter_mut() {
                if v.version == version {
                    v.current_stage = stage;
                } else if archives && v.current_stage == stage {
                    v.current_stage = Stage::Archived;
                }
            }
        }
        let updated = Self::version_mut(&mut inner, name, version)?.clone();
        Ok(updated)
    }

    async fn create_registered_model(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        if !inner.models.contains_key(name) {
            inner.models.insert(name.to_string(), Vec::new());
        }
        Ok(())
    }

    async fn create_model_version(&self, name: &str, source: &str, run_id: &str) -> Result<ModelVersion> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        let versions = inner
            .models
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("registered model {}", name)))?;
        let version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let created = ModelVersion {
            name: name.to_string(),
            version,
            run_id: run_id.to_string(),
            current_stage: Stage::None,
            tags: BTreeMap::new(),
            source: Some(source.to_string()),
        };
        versions.push(created.clone());
        Ok(created)
    }

    async fn artifact_root(&self, name: &str, version: u64) -> Result<String> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        let source = inner
            .models
            .get(name)
            .and_then(|vs| vs.iter().find(|v| v.version == version))
            .and_then(|v| v.source.clone())
            .ok_or_else(|| Error::NotFound(format!("model version {} v{}", name, version)))?;
        Ok(source)
    }

    async fn fetch_artifact(&self, uri: &str) -> Result<Vec<u8>> {
        let resolved = match ArtifactLocation::parse(uri) {
            Ok(ArtifactLocation::RunRelative { run_id, path }) => {
                let inner = self.lock();
                let root = inner
                    .runs
                    .get(&run_id)
                    .and_then(|r| r.artifact_uri.clone())
                    .ok_or_else(|| Error::NotFound(format!("run {}", run_id)))?;
                join_uri(&root, &path)
            }
            _ => uri.to_string(),
        };

        let inner = self.lock();
        Self::check_available(&inner)?;
        inner
            .artifacts
            .get(&resolved)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("artifact {}", resolved)))
    }
}
