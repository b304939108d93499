//! Tracking server REST client
//!
//! Speaks the MLflow 2.0 REST API (`/api/2.0/mlflow/...`).
//!
//! # Error mapping
//! - Transport failures, timeouts and 5xx answers: `RegistryUnavailable`
//! - 404 or `RESOURCE_DOES_NOT_EXIST`: `NotFound`
//! - Any other rejection: `Registry`
//!
//! Nothing is retried here; the orchestrator owns the retry policy.

use crate::artifacts::ArtifactLocation;
use crate::client::ModelRegistry;
use async_trait::async_trait;
use mlops_common::config::RegistryConfig;
use mlops_common::{Error, ModelVersion, RegisteredModel, Result, Run, Stage};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const API_PREFIX: &str = "api/2.0/mlflow";
const ARTIFACT_PROXY_PREFIX: &str = "api/2.0/mlflow-artifacts/artifacts";
const PAGE_SIZE: u32 = 1000;

const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";
const RESOURCE_ALREADY_EXISTS: &str = "RESOURCE_ALREADY_EXISTS";

/// REST client for the tracking server's model registry
#[derive(Debug, Clone)]
pub struct MlflowClient {
    http_client: Client,
    base_url: String,
}

impl MlflowClient {
    /// Create a client for the configured tracking URI
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(http_client, &config.tracking_uri))
    }

    pub fn with_client(http_client: Client, tracking_uri: &str) -> Self {
        Self {
            http_client,
            base_url: tracking_uri.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, path)
    }

    /// Send a request, separating transport failures from API rejections
    async fn send(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<std::result::Result<Response, ApiFailure>> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::RegistryUnavailable(format!("{}: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(Ok(response));
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let (code, message) = match parsed {
            Some(err) => (err.error_code, err.message.unwrap_or(body)),
            None => (None, body),
        };
        Ok(Err(ApiFailure {
            status,
            code,
            message,
        }))
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Registry(format!("{}: unexpected response: {}", what, e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T> {
        let request = self.http_client.get(self.endpoint(path)).query(query);
        match self.send(request, what).await? {
            Ok(response) => Self::decode(response, what).await,
            Err(failure) => Err(failure.into_error(what)),
        }
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<T> {
        let request = self.http_client.post(self.endpoint(path)).json(body);
        match self.send(request, what).await? {
            Ok(response) => Self::decode(response, what).await,
            Err(failure) => Err(failure.into_error(what)),
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        let what = format!("fetch artifact {}", url);
        match self.send(self.http_client.get(url), &what).await? {
            Ok(response) => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| Error::RegistryUnavailable(format!("{}: {}", what, e))),
            Err(failure) => Err(failure.into_error(&what)),
        }
    }
}

#[async_trait]
impl ModelRegistry for MlflowClient {
    async fn list_models(&self, prefix: &str) -> Result<Vec<RegisteredModel>> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("filter", format!("name LIKE {}", filter_literal(&format!("{}%", prefix)))),
                ("max_results", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let page: SearchRegisteredModelsResponse = self
                .get_json("registered-models/search", &query, "search registered models")
                .await?;

            // `_` is a LIKE wildcard, so re-check the prefix literally
            models.extend(
                page.registered_models
                    .into_iter()
                    .filter(|m| m.name.starts_with(prefix))
                    .map(|m| RegisteredModel { name: m.name }),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(prefix = %prefix, count = models.len(), "Listed registered models");
        Ok(models)
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>> {
        let mut versions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("filter", format!("name={}", filter_literal(model_name))),
                ("max_results", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let page: SearchModelVersionsResponse = self
                .get_json("model-versions/search", &query, "search model versions")
                .await?;

            for dto in page.model_versions {
                if dto.name == model_name {
                    versions.push(dto.into_version()?);
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        let response: GetRunResponse = self
            .get_json("runs/get", &[("run_id", run_id.to_string())], "get run")
            .await?;
        Ok(response.run.into_run())
    }

    async fn set_version_tag(&self, name: &str, version: u64, key: &str, value: &str) -> Result<()> {
        let body = VersionTagRequest {
            name,
            version: version.to_string(),
            key,
            value: Some(value),
        };
        let _: serde_json::Value = self
            .post_json("model-versions/set-tag", &body, "set model version tag")
            .await?;
        Ok(())
    }

    async fn delete_version_tag(&self, name: &str, version: u64, key: &str) -> Result<()> {
        let what = "delete model version tag";
        let body = VersionTagRequest {
            name,
            version: version.to_string(),
            key,
            value: None,
        };
        let request = self
            .http_client
            .delete(self.endpoint("model-versions/delete-tag"))
            .json(&body);
        match self.send(request, what).await? {
            Ok(_) => Ok(()),
            Err(failure) => Err(failure.into_error(what)),
        }
    }

    async fn transition_stage(
        &self,
        name: &str,
        version: u64,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        let body = TransitionStageRequest {
            name,
            version: version.to_string(),
            stage: stage.as_str(),
            archive_existing_versions: archive_existing,
        };
        let response: ModelVersionResponse = self
            .post_json("model-versions/transition-stage", &body, "transition model version stage")
            .await?;
        response.model_version.into_version()
    }

    async fn create_registered_model(&self, name: &str) -> Result<()> {
        let what = "create registered model";
        let request = self
            .http_client
            .post(self.endpoint("registered-models/create"))
            .json(&serde_json::json!({ "name": name }));
        match self.send(request, what).await? {
            Ok(_) => Ok(()),
            Err(failure) if failure.has_code(RESOURCE_ALREADY_EXISTS) => {
                debug!(model = %name, "Registered model already exists");
                Ok(())
            }
            Err(failure) => Err(failure.into_error(what)),
        }
    }

    async fn create_model_version(&self, name: &str, source: &str, run_id: &str) -> Result<ModelVersion> {
        let body = serde_json::json!({
            "name": name,
            "source": source,
            "run_id": run_id,
        });
        let response: ModelVersionResponse = self
            .post_json("model-versions/create", &body, "create model version")
            .await?;
        response.model_version.into_version()
    }

    async fn artifact_root(&self, name: &str, version: u64) -> Result<String> {
        let response: DownloadUriResponse = self
            .get_json(
                "model-versions/get-download-uri",
                &[("name", name.to_string()), ("version", version.to_string())],
                "get model version download uri",
            )
            .await?;
        Ok(response.artifact_uri)
    }

    async fn fetch_artifact(&self, uri: &str) -> Result<Vec<u8>> {
        match ArtifactLocation::parse(uri)? {
            ArtifactLocation::Local(path) => match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(Error::NotFound(format!("artifact {}", path.display())))
                }
                Err(e) => Err(Error::Io(e)),
            },
            ArtifactLocation::Proxied(path) => {
                let url = format!("{}/{}/{}", self.base_url, ARTIFACT_PROXY_PREFIX, path);
                self.fetch_url(&url).await
            }
            ArtifactLocation::Http(url) => self.fetch_url(&url).await,
            ArtifactLocation::RunRelative { .. } => {
                let resolved = crate::artifacts::resolve_run_uri(self, uri).await?;
                self.fetch_artifact(&resolved).await
            }
        }
    }
}

/// Non-success answer from the tracking server
#[derive(Debug)]
struct ApiFailure {
    status: StatusCode,
    code: Option<String>,
    message: String,
}

impl ApiFailure {
    fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    fn into_error(self, what: &str) -> Error {
        let detail = match &self.code {
            Some(code) => format!("{}: {} ({}): {}", what, self.status, code, self.message),
            None => format!("{}: {}: {}", what, self.status, self.message),
        };
        if self.status == StatusCode::NOT_FOUND || self.has_code(RESOURCE_DOES_NOT_EXIST) {
            Error::NotFound(detail)
        } else if self.status.is_server_error() {
            Error::RegistryUnavailable(detail)
        } else {
            Error::Registry(detail)
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchRegisteredModelsResponse {
    #[serde(default)]
    registered_models: Vec<RegisteredModelDto>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisteredModelDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchModelVersionsResponse {
    #[serde(default)]
    model_versions: Vec<ModelVersionDto>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelVersionResponse {
    model_version: ModelVersionDto,
}

#[derive(Debug, Deserialize)]
struct ModelVersionDto {
    name: String,
    version: String,
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    current_stage: String,
    #[serde(default)]
    tags: Vec<KeyValueDto>,
    source: Option<String>,
}

impl ModelVersionDto {
    fn into_version(self) -> Result<ModelVersion> {
        let version = self.version.parse::<u64>().map_err(|_| {
            Error::Registry(format!(
                "model {} has non-numeric version '{}'",
                self.name, self.version
            ))
        })?;
        let current_stage = self.current_stage.parse().map_err(|_| {
            Error::Registry(format!(
                "model {} v{} has unknown stage '{}'",
                self.name, version, self.current_stage
            ))
        })?;
        Ok(ModelVersion {
            name: self.name,
            version,
            run_id: self.run_id,
            current_stage,
            tags: self.tags.into_iter().map(|t| (t.key, t.value)).collect(),
            source: self.source,
        })
    }
}

/// String literal for a search filter
///
/// Single quotes unless the value contains one; then double quotes. A value
/// holding both gets its single quotes backslash-escaped.
fn filter_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

#[derive(Debug, Deserialize)]
struct KeyValueDto {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct MetricDto {
    key: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct GetRunResponse {
    run: RunDto,
}

#[derive(Debug, Deserialize)]
struct RunDto {
    info: RunInfoDto,
    #[serde(default)]
    data: RunDataDto,
}

#[derive(Debug, Deserialize)]
struct RunInfoDto {
    run_id: String,
    artifact_uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RunDataDto {
    #[serde(default)]
    metrics: Vec<MetricDto>,
    #[serde(default)]
    params: Vec<KeyValueDto>,
}

impl RunDto {
    fn into_run(self) -> Run {
        let metrics: BTreeMap<String, f64> =
            self.data.metrics.into_iter().map(|m| (m.key, m.value)).collect();
        let params: BTreeMap<String, String> =
            self.data.params.into_iter().map(|p| (p.key, p.value)).collect();
        Run {
            run_id: self.info.run_id,
            metrics,
            params,
            artifact_uri: self.info.artifact_uri,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DownloadUriResponse {
    artifact_uri: String,
}

#[derive(Debug, Serialize)]
struct VersionTagRequest<'a> {
    name: &'a str,
    version: String,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct TransitionStageRequest<'a> {
    name: &'a str,
    version: String,
    stage: &'a str,
    archive_existing_versions: bool,
}
