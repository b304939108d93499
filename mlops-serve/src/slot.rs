//! Loaded-model slot
//!
//! Lifecycle: `Uninitialized -> Loading -> Ready | Failed`. The slot is
//! written exactly once during startup; afterwards request handlers only
//! read an immutable `Arc<LoadedModel>`, so no lock is taken per request.
//! There is no transition out of `Ready` or `Failed`: picking up a new
//! champion takes a process restart.

use crate::classifier::{Classifier, ModelArtifact};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPhase {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

impl ModelPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ModelPhase::Loading,
            2 => ModelPhase::Ready,
            3 => ModelPhase::Failed,
            _ => ModelPhase::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ModelPhase::Uninitialized => 0,
            ModelPhase::Loading => 1,
            ModelPhase::Ready => 2,
            ModelPhase::Failed => 3,
        }
    }
}

impl fmt::Display for ModelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelPhase::Uninitialized => "uninitialized",
            ModelPhase::Loading => "loading",
            ModelPhase::Ready => "ready",
            ModelPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The champion model held in memory
#[derive(Debug)]
pub struct LoadedModel {
    pub name: String,
    pub version: u64,
    pub classifier: ModelArtifact,
}

impl LoadedModel {
    pub fn predict_batch(&self, texts: &[&str]) -> Vec<i64> {
        self.classifier.predict_batch(texts)
    }

    pub fn label(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

#[derive(Debug, Default)]
pub struct ModelSlot {
    phase: AtomicU8,
    model: OnceLock<Arc<LoadedModel>>,
    failure: OnceLock<String>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ModelPhase {
        ModelPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == ModelPhase::Ready
    }

    /// Claim the slot for loading; false if loading already started
    pub fn begin_loading(&self) -> bool {
        self.phase
            .compare_exchange(
                ModelPhase::Uninitialized.as_u8(),
                ModelPhase::Loading.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish the loaded model; only valid while `Loading`
    pub fn set_ready(&self, model: LoadedModel) -> bool {
        if self.phase() != ModelPhase::Loading || self.model.set(Arc::new(model)).is_err() {
            return false;
        }
        self.phase.store(ModelPhase::Ready.as_u8(), Ordering::Release);
        true
    }

    /// Record a load failure; only valid while `Loading`
    pub fn set_failed(&self, reason: impl Into<String>) -> bool {
        if self.phase() != ModelPhase::Loading {
            return false;
        }
        let _ = self.failure.set(reason.into());
        self.phase.store(ModelPhase::Failed.as_u8(), Ordering::Release);
        true
    }

    /// Handle to the model, only once `Ready`
    pub fn model(&self) -> Option<Arc<LoadedModel>> {
        if self.is_ready() {
            self.model.get().cloned()
        } else {
            None
        }
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }
}
