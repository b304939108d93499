//! Artifact URI handling
//!
//! Supported locations:
//! - `file:///abs/path` and bare paths: local filesystem
//! - `mlflow-artifacts:/path` (optionally with an authority): tracking server proxy
//! - `http://` / `https://`: fetched directly
//! - `runs:/<run id>/<path>`: relative to the run's artifact root

use crate::client::ModelRegistry;
use mlops_common::{Error, Result};
use std::path::PathBuf;
use tracing::debug;

/// Parsed artifact URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    Local(PathBuf),
    /// Path below the tracking server's artifact proxy
    Proxied(String),
    Http(String),
    RunRelative { run_id: String, path: String },
}

impl ArtifactLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(rest) = uri.strip_prefix("file://") {
            return Ok(ArtifactLocation::Local(PathBuf::from(rest)));
        }
        if let Some(rest) = uri.strip_prefix("mlflow-artifacts:") {
            let path = match rest.strip_prefix("//") {
                // Skip the authority; the configured tracking server serves it
                Some(with_authority) => with_authority
                    .find('/')
                    .map(|i| &with_authority[i..])
                    .unwrap_or(""),
                None => rest,
            };
            return Ok(ArtifactLocation::Proxied(path.trim_start_matches('/').to_string()));
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(ArtifactLocation::Http(uri.to_string()));
        }
        if let Some(rest) = uri.strip_prefix("runs:/") {
            let rest = rest.trim_start_matches('/');
            let (run_id, path) = rest.split_once('/').unwrap_or((rest, ""));
            if run_id.is_empty() {
                return Err(Error::InvalidInput(format!("run id missing in {}", uri)));
            }
            return Ok(ArtifactLocation::RunRelative {
                run_id: run_id.to_string(),
                path: path.to_string(),
            });
        }
        match uri.split_once("://") {
            Some((scheme, _)) => Err(Error::ModelLoad(format!(
                "unsupported artifact scheme '{}' in {}",
                scheme, uri
            ))),
            None => Ok(ArtifactLocation::Local(PathBuf::from(uri))),
        }
    }
}

/// Append a relative path to an artifact URI
pub fn join_uri(root: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return root.to_string();
    }
    format!("{}/{}", root.trim_end_matches('/'), relative)
}

/// Replace a `runs:/` URI by the absolute URI under the run's artifact root
pub async fn resolve_run_uri<R: ModelRegistry + ?Sized>(registry: &R, uri: &str) -> Result<String> {
    match ArtifactLocation::parse(uri)? {
        ArtifactLocation::RunRelative { run_id, path } => {
            let run = registry.get_run(&run_id).await?;
            let root = run.artifact_uri.ok_or_else(|| {
                Error::ModelLoad(format!("run {} has no artifact location", run_id))
            })?;
            Ok(join_uri(&root, &path))
        }
        _ => Ok(uri.to_string()),
    }
}

/// Download one file from a model version's artifact directory
pub async fn download_version_file<R: ModelRegistry + ?Sized>(
    registry: &R,
    name: &str,
    version: u64,
    file: &str,
) -> Result<Vec<u8>> {
    let root = registry.artifact_root(name, version).await?;
    let root = resolve_run_uri(registry, &root).await?;
    let uri = join_uri(&root, file);
    debug!(model = %name, version, uri = %uri, "Downloading model artifact");
    registry.fetch_artifact(&uri).await
}

/// Download one file logged by a run, e.g. `runs:/<id>/model` + `model.json`
pub async fn download_run_file<R: ModelRegistry + ?Sized>(
    registry: &R,
    run_uri: &str,
    file: &str,
) -> Result<Vec<u8>> {
    let root = resolve_run_uri(registry, run_uri).await?;
    let uri = join_uri(&root, file);
    debug!(uri = %uri, "Downloading run artifact");
    registry.fetch_artifact(&uri).await
}
