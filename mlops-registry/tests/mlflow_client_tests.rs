//! Integration tests for the tracking server REST client
//!
//! Runs `MlflowClient` against an in-process axum server on 127.0.0.1:0 that
//! implements the subset of the MLflow 2.0 REST API the client uses.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use mlops_common::config::Config;
use mlops_common::records::{save_latest_runs, LatestRuns};
use mlops_common::{Error, Stage};
use mlops_registry::artifacts::download_version_file;
use mlops_registry::promotion::{Promoter, PromotionOutcome};
use mlops_registry::register::register_latest_runs;
use mlops_registry::{MlflowClient, ModelRegistry};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// =============================================================================
// Fake tracking server
// =============================================================================

#[derive(Debug, Clone)]
struct FakeVersion {
    name: String,
    version: u64,
    run_id: String,
    stage: String,
    tags: BTreeMap<String, String>,
}

impl FakeVersion {
    fn to_wire(&self) -> Value {
        let tags: Vec<Value> = self
            .tags
            .iter()
            .map(|(k, v)| json!({"key": k, "value": v}))
            .collect();
        json!({
            "name": self.name,
            "version": self.version.to_string(),
            "run_id": self.run_id,
            "current_stage": self.stage,
            "tags": tags,
            "source": format!("runs:/{}/model", self.run_id),
        })
    }
}

#[derive(Debug, Default)]
struct FakeTracking {
    models: BTreeMap<String, Vec<FakeVersion>>,
    runs: HashMap<String, f64>,
    artifacts: HashMap<String, Vec<u8>>,
    failing: bool,
    model_search_pages: usize,
}

type Shared = Arc<Mutex<FakeTracking>>;

impl FakeTracking {
    fn add_run(&mut self, run_id: &str, f1: f64) {
        self.runs.insert(run_id.to_string(), f1);
    }

    fn add_version(&mut self, name: &str, run_id: &str, stage: &str) {
        let versions = self.models.entry(name.to_string()).or_default();
        let version = versions.len() as u64 + 1;
        versions.push(FakeVersion {
            name: name.to_string(),
            version,
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            tags: BTreeMap::new(),
        });
    }

    fn version_mut(&mut self, name: &str, version: &str) -> Option<&mut FakeVersion> {
        let version: u64 = version.parse().ok()?;
        self.models
            .get_mut(name)?
            .iter_mut()
            .find(|v| v.version == version)
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({"error_code": code, "message": message}))).into_response()
}

fn unavailable() -> Response {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "TEMPORARILY_UNAVAILABLE", "backend down")
}

fn missing_version() -> Response {
    api_error(StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST", "model version not found")
}

fn str_field<'a>(body: &'a Value, key: &str) -> &'a str {
    body.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// One model per page, to exercise `next_page_token`
async fn search_models(State(state): State<Shared>, Query(q): Query<HashMap<String, String>>) -> Response {
    let mut fake = state.lock().unwrap();
    if fake.failing {
        return unavailable();
    }
    fake.model_search_pages += 1;

    let prefix = q
        .get("filter")
        .and_then(|f| f.strip_prefix("name LIKE '"))
        .and_then(|f| f.strip_suffix("%'"))
        .unwrap_or_default()
        .to_string();
    let matching: Vec<&String> = fake.models.keys().filter(|n| n.starts_with(&prefix)).collect();
    let page: usize = q.get("page_token").and_then(|t| t.parse().ok()).unwrap_or(0);

    let models: Vec<Value> = matching.get(page).map(|n| json!({"name": n})).into_iter().collect();
    let mut body = json!({ "registered_models": models });
    if page + 1 < matching.len() {
        body["next_page_token"] = json!((page + 1).to_string());
    }
    Json(body).into_response()
}

async fn search_versions(State(state): State<Shared>, Query(q): Query<HashMap<String, String>>) -> Response {
    let fake = state.lock().unwrap();
    if fake.failing {
        return unavailable();
    }
    let name = q
        .get("filter")
        .and_then(|f| f.strip_prefix("name='"))
        .and_then(|f| f.strip_suffix('\''))
        .unwrap_or_default();
    let versions: Vec<Value> = fake
        .models
        .get(name)
        .map(|vs| vs.iter().map(FakeVersion::to_wire).collect())
        .unwrap_or_default();
    Json(json!({ "model_versions": versions })).into_response()
}

async fn get_run(State(state): State<Shared>, Query(q): Query<HashMap<String, String>>) -> Response {
    let fake = state.lock().unwrap();
    if fake.failing {
        return unavailable();
    }
    let run_id = q.get("run_id").cloned().unwrap_or_default();
    match fake.runs.get(&run_id) {
        Some(f1) => Json(json!({
            "run": {
                "info": {
                    "run_id": run_id,
                    "artifact_uri": format!("mlflow-artifacts:/0/{}/artifacts", run_id),
                },
                "data": {
                    "metrics": [{"key": "f1_score", "value": f1}],
                    "params": [{"key": "C", "value": "1.0"}],
                }
            }
        }))
        .into_response(),
        None => api_error(StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST", "run not found"),
    }
}

async fn set_tag(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut fake = state.lock().unwrap();
    match fake.version_mut(str_field(&body, "name"), str_field(&body, "version")) {
        Some(v) => {
            v.tags
                .insert(str_field(&body, "key").to_string(), str_field(&body, "value").to_string());
            Json(json!({})).into_response()
        }
        None => missing_version(),
    }
}

async fn delete_tag(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut fake = state.lock().unwrap();
    match fake.version_mut(str_field(&body, "name"), str_field(&body, "version")) {
        Some(v) => match v.tags.remove(str_field(&body, "key")) {
            Some(_) => Json(json!({})).into_response(),
            None => api_error(StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST", "tag not found"),
        },
        None => missing_version(),
    }
}

async fn transition_stage(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut fake = state.lock().unwrap();
    let name = str_field(&body, "name").to_string();
    let version: u64 = str_field(&body, "version").parse().unwrap_or(0);
    let stage = str_field(&body, "stage").to_string();
    let archive = body
        .get("archive_existing_versions")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let Some(versions) = fake.models.get_mut(&name) else {
        return missing_version();
    };
    if !versions.iter().any(|v| v.version == version) {
        return missing_version();
    }
    for v in versions.iter_mut() {
        if v.version == version {
            v.stage = stage.clone();
        } else if archive && v.stage == stage {
            v.stage = "Archived".to_string();
        }
    }
    let updated = versions.iter().find(|v| v.version == version).map(FakeVersion::to_wire);
    Json(json!({ "model_version": updated })).into_response()
}

async fn create_model(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut fake = state.lock().unwrap();
    let name = str_field(&body, "name").to_string();
    if fake.models.contains_key(&name) {
        return api_error(StatusCode::BAD_REQUEST, "RESOURCE_ALREADY_EXISTS", "model exists");
    }
    fake.models.insert(name.clone(), Vec::new());
    Json(json!({"registered_model": {"name": name}})).into_response()
}

async fn create_version(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut fake = state.lock().unwrap();
    let name = str_field(&body, "name").to_string();
    let run_id = str_field(&body, "run_id").to_string();
    if !fake.models.contains_key(&name) {
        return api_error(StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST", "model not found");
    }
    fake.add_version(&name, &run_id, "None");
    let created = fake.models[&name].last().map(FakeVersion::to_wire);
    Json(json!({ "model_version": created })).into_response()
}

async fn download_uri(State(state): State<Shared>, Query(q): Query<HashMap<String, String>>) -> Response {
    let mut fake = state.lock().unwrap();
    let name = q.get("name").cloned().unwrap_or_default();
    let version = q.get("version").cloned().unwrap_or_default();
    match fake.version_mut(&name, &version) {
        Some(v) => Json(json!({
            "artifact_uri": format!("mlflow-artifacts:/0/{}/artifacts/model", v.run_id)
        }))
        .into_response(),
        None => missing_version(),
    }
}

async fn artifact(State(state): State<Shared>, Path(path): Path<String>) -> Response {
    let fake = state.lock().unwrap();
    match fake.artifacts.get(&path) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn start_fake(fake: FakeTracking) -> (MlflowClient, Shared) {
    let state: Shared = Arc::new(Mutex::new(fake));
    let app = Router::new()
        .route("/api/2.0/mlflow/registered-models/search", get(search_models))
        .route("/api/2.0/mlflow/registered-models/create", post(create_model))
        .route("/api/2.0/mlflow/model-versions/search", get(search_versions))
        .route("/api/2.0/mlflow/model-versions/create", post(create_version))
        .route("/api/2.0/mlflow/model-versions/set-tag", post(set_tag))
        .route("/api/2.0/mlflow/model-versions/delete-tag", delete(delete_tag))
        .route("/api/2.0/mlflow/model-versions/transition-stage", post(transition_stage))
        .route("/api/2.0/mlflow/model-versions/get-download-uri", get(download_uri))
        .route("/api/2.0/mlflow/runs/get", get(get_run))
        .route("/api/2.0/mlflow-artifacts/artifacts/*path", get(artifact))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = MlflowClient::with_client(reqwest::Client::new(), &format!("http://{}", addr));
    (client, state)
}

fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.state.dir = dir.path().to_path_buf();
    config
}

// =============================================================================
// Query layer
// =============================================================================

#[tokio::test]
async fn test_list_models_follows_pages_and_filters_prefix() {
    let mut fake = FakeTracking::default();
    fake.add_version("sentiment_lr", "r1", "None");
    fake.add_version("sentiment_svm", "r2", "None");
    fake.add_version("fraud_xgb", "r3", "None");
    let (client, state) = start_fake(fake).await;

    let models = client.list_models("sentiment_").await.unwrap();
    let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();

    assert_eq!(names, vec!["sentiment_lr", "sentiment_svm"]);
    assert_eq!(state.lock().unwrap().model_search_pages, 2);
}

#[tokio::test]
async fn test_list_versions_parses_stage_and_tags() {
    let mut fake = FakeTracking::default();
    fake.add_version("sentiment_lr", "r1", "Archived");
    fake.add_version("sentiment_lr", "r2", "Production");
    fake.models.get_mut("sentiment_lr").unwrap()[1]
        .tags
        .insert("champion".into(), "True".into());
    let (client, _state) = start_fake(fake).await;

    let versions = client.list_versions("sentiment_lr").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].current_stage, Stage::Archived);
    assert_eq!(versions[1].version, 2);
    assert_eq!(versions[1].run_id, "r2");
    assert!(versions[1].is_champion());
}

#[tokio::test]
async fn test_get_run_reads_metrics_and_missing_run_is_not_found() {
    let mut fake = FakeTracking::default();
    fake.add_run("r1", 0.83);
    let (client, _state) = start_fake(fake).await;

    let run = client.get_run("r1").await.unwrap();
    assert_eq!(run.score("f1_score"), 0.83);
    assert_eq!(run.params.get("C").map(String::as_str), Some("1.0"));
    assert_eq!(run.artifact_uri.as_deref(), Some("mlflow-artifacts:/0/r1/artifacts"));

    let err = client.get_run("ghost").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_server_errors_are_retryable() {
    let fake = FakeTracking {
        failing: true,
        ..Default::default()
    };
    let (client, _state) = start_fake(fake).await;

    let err = client.list_models("sentiment_").await.unwrap_err();
    assert!(matches!(err, Error::RegistryUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_server_is_registry_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = MlflowClient::with_client(reqwest::Client::new(), &format!("http://{}", addr));
    let err = client.get_run("r1").await.unwrap_err();
    assert!(err.is_retryable());
}

// =============================================================================
// Mutations
// =============================================================================

#[tokio::test]
async fn test_tag_and_transition_round_trip() {
    let mut fake = FakeTracking::default();
    fake.add_version("sentiment_lr", "r1", "Production");
    fake.add_version("sentiment_lr", "r2", "None");
    let (client, state) = start_fake(fake).await;

    client
        .set_version_tag("sentiment_lr", 2, "champion", "True")
        .await
        .unwrap();
    let promoted = client
        .transition_stage("sentiment_lr", 2, Stage::Production, true)
        .await
        .unwrap();
    assert_eq!(promoted.current_stage, Stage::Production);
    assert!(promoted.is_champion());

    client.delete_version_tag("sentiment_lr", 2, "champion").await.unwrap();

    let fake = state.lock().unwrap();
    let versions = &fake.models["sentiment_lr"];
    assert_eq!(versions[0].stage, "Archived");
    assert!(versions[1].tags.is_empty());
}

#[tokio::test]
async fn test_tag_on_missing_version_is_not_found() {
    let (client, _state) = start_fake(FakeTracking::default()).await;
    let err = client
        .set_version_tag("sentiment_lr", 9, "champion", "True")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_register_latest_runs_over_http() {
    let mut fake = FakeTracking::default();
    fake.add_run("r1", 0.7);
    fake.add_run("r2", 0.8);
    fake.add_version("sentiment_lr", "r0", "Production");
    let (client, state) = start_fake(fake).await;

    let latest: LatestRuns = [("lr", "r1"), ("svm", "r2")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    register_latest_runs(&client, &latest, "sentiment_").await.unwrap();
    // Second pass registers nothing new
    register_latest_runs(&client, &latest, "sentiment_").await.unwrap();

    let fake = state.lock().unwrap();
    assert_eq!(fake.models["sentiment_lr"].len(), 2);
    assert_eq!(fake.models["sentiment_lr"][1].run_id, "r1");
    assert_eq!(fake.models["sentiment_svm"].len(), 1);
}

// =============================================================================
// Artifacts and end-to-end promotion
// =============================================================================

#[tokio::test]
async fn test_model_file_downloads_through_artifact_proxy() {
    let mut fake = FakeTracking::default();
    fake.add_run("r1", 0.7);
    fake.add_version("sentiment_lr", "r1", "Production");
    fake.artifacts
        .insert("0/r1/artifacts/model/model.json".into(), br#"{"kind":"lexicon"}"#.to_vec());
    let (client, _state) = start_fake(fake).await;

    let bytes = download_version_file(&client, "sentiment_lr", 1, "model.json")
        .await
        .unwrap();
    assert_eq!(bytes, br#"{"kind":"lexicon"}"#);

    let err = download_version_file(&client, "sentiment_lr", 1, "missing.json")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_promotion_retains_stronger_champion_over_http() {
    let mut fake = FakeTracking::default();
    fake.add_run("champ", 0.80);
    fake.add_run("fresh", 0.75);
    fake.add_version("sentiment_lr", "champ", "Production");
    fake.add_version("sentiment_svm", "fresh", "None");
    let (client, state) = start_fake(fake).await;

    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let latest: LatestRuns = [("svm".to_string(), "fresh".to_string())].into_iter().collect();
    save_latest_runs(&config.state.latest_runs_path(), &latest).unwrap();

    let promoter = Promoter::new(&client, &config);
    let outcome = promoter.run().await.unwrap();
    assert!(matches!(outcome, PromotionOutcome::Retained { .. }));

    let record = promoter.champion_store().require().unwrap();
    assert_eq!(record.name, "sentiment_lr");
    assert_eq!(record.version, 1);

    let fake = state.lock().unwrap();
    assert_eq!(fake.models["sentiment_lr"][0].stage, "Production");
    assert_eq!(fake.models["sentiment_lr"][0].tags.get("champion").map(String::as_str), Some("True"));
    assert_eq!(fake.models["sentiment_svm"][0].tags.get("challenger").map(String::as_str), Some("True"));
    assert_eq!(fake.models["sentiment_svm"][0].stage, "None");
}

#[tokio::test]
async fn test_promotion_replaces_weaker_champion_over_http() {
    let mut fake = FakeTracking::default();
    fake.add_run("champ", 0.70);
    fake.add_run("fresh", 0.88);
    fake.add_version("sentiment_lr", "champ", "Production");
    fake.models.get_mut("sentiment_lr").unwrap()[0]
        .tags
        .insert("champion".into(), "True".into());
    fake.add_version("sentiment_svm", "fresh", "None");
    let (client, state) = start_fake(fake).await;

    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let latest: LatestRuns = [("svm".to_string(), "fresh".to_string())].into_iter().collect();
    save_latest_runs(&config.state.latest_runs_path(), &latest).unwrap();

    let outcome = Promoter::new(&client, &config).run().await.unwrap();
    assert!(matches!(outcome, PromotionOutcome::Promoted { previous: Some(_), .. }));

    let fake = state.lock().unwrap();
    let old = &fake.models["sentiment_lr"][0];
    let new = &fake.models["sentiment_svm"][0];
    assert_eq!(old.stage, "Archived");
    assert!(!old.tags.contains_key("champion"));
    assert_eq!(new.stage, "Production");
    assert_eq!(new.tags.get("champion").map(String::as_str), Some("True"));
}
