//! Serving endpoint errors
//!
//! Every failure answers with `{"detail": "..."}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    /// Request body does not match the expected shape (422)
    #[error("{0}")]
    InvalidInput(String),

    /// No model is in the `Ready` phase (503)
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    /// Prediction failed (500)
    #[error("Prediction failed: {0}")]
    Prediction(String),

    #[error(transparent)]
    Common(#[from] mlops_common::Error),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServeError::ModelNotLoaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServeError::Prediction(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServeError::Common(mlops_common::Error::InvalidInput(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServeError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = %status, "Request failed: {}", self);
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub type ServeResult<T> = std::result::Result<T, ServeError>;
