//! mlops-registry library - model promotion against the tracking server
//!
//! Layers, leaf-first:
//! - [`client`]: the `ModelRegistry` seam and the REST implementation
//! - [`query`]: candidate listing and current-champion lookup
//! - [`selector`]: champion/challenger selection over scored candidates
//! - [`mutator`]: tag and stage writes for promotion
//! - [`promotion`]: the end-to-end promotion decision and side-file update
//! - [`register`]: registration of freshly trained runs
//! - [`launch`]: restart of the serving endpoint after promotion

pub mod artifacts;
pub mod client;
pub mod launch;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod mlflow;
pub mod mutator;
pub mod promotion;
pub mod query;
pub mod register;
pub mod selector;

pub use client::ModelRegistry;
#[cfg(any(test, feature = "test-util"))]
pub use memory::InMemoryRegistry;
pub use mlflow::MlflowClient;
pub use promotion::{Candidate, PromotionOutcome, Promoter};
pub use selector::{challenge, select, select_by, select_scored, ChallengeOutcome, Scored, Selection};
