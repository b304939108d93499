//! mlops-serve library - champion model serving and batch steps
//!
//! The HTTP endpoint answers from a single immutable model handle loaded at
//! startup. The batch prediction and validation steps reuse the same
//! classifier and loaders.

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod batch;
pub mod classifier;
pub mod error;
pub mod loader;
pub mod slot;
pub mod validation;

pub use classifier::{Classifier, ModelArtifact};
pub use error::ServeError;
pub use slot::{LoadedModel, ModelPhase, ModelSlot};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub slot: Arc<ModelSlot>,
}

impl AppState {
    pub fn new(slot: Arc<ModelSlot>) -> Self {
        Self { slot }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::predict_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
