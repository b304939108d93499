//! HTTP handlers
//!
//! - `GET /health`: always 200; `status` is `healthy` only in the `Ready` phase
//! - `POST /predict`: `{"instances": [{"text": ...}]}` to `{"predictions": [...]}`

use crate::error::{ServeError, ServeResult};
use crate::slot::ModelPhase;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub phase: ModelPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let phase = state.slot.phase();
    let status = if phase == ModelPhase::Ready { "healthy" } else { "unhealthy" };
    Json(HealthResponse {
        status: status.to_string(),
        module: "mlops-serve".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        phase,
        model: state.slot.model().map(|m| m.label()),
        error: state.slot.failure().map(str::to_string),
    })
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
pub struct Instance {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions: Vec<i64>,
}

/// POST /predict
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> ServeResult<Json<PredictResponse>> {
    let Json(request) = payload.map_err(|rejection| ServeError::InvalidInput(rejection.body_text()))?;

    let model = state.slot.model().ok_or_else(|| {
        let reason = state
            .slot
            .failure()
            .map(str::to_string)
            .unwrap_or_else(|| format!("model is {}", state.slot.phase()));
        ServeError::ModelNotLoaded(reason)
    })?;

    let texts: Vec<String> = request.instances.into_iter().map(|i| i.text).collect();
    debug!(count = texts.len(), model = %model.label(), "Predicting batch");

    let predictions = tokio::task::spawn_blocking(move || {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        model.predict_batch(&refs)
    })
    .await
    .map_err(|e| ServeError::Prediction(e.to_string()))?;

    Ok(Json(PredictResponse { predictions }))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

pub fn predict_routes() -> Router<AppState> {
    Router::new().route("/predict", post(predict))
}
