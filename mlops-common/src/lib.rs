//! # MLOps Common Library
//!
//! Shared code for the promotion, serving and pipeline binaries:
//! - Error taxonomy (`Error`, `Result`)
//! - Registry data model (registered models, versions, runs, stages)
//! - Bootstrap configuration loading
//! - Tracing initialisation
//! - Side-file records exchanged between pipeline steps

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod records;

pub use error::{Error, Result};
pub use model::{ChampionRecord, ModelVersion, RegisteredModel, Run, Stage};
