//! Side-file records exchanged between pipeline steps
//!
//! - Champion record: `{"name": ..., "version": ...}` written after every
//!   promotion decision, read by the batch prediction step.
//! - Latest runs: `{"<short name>": "<run id>", ...}` written by training,
//!   read by registration, validation and promotion.
//!
//! Writes go to a `.tmp` sibling which is then renamed over the target, so a
//! reader never observes a half-written file.

use crate::model::ChampionRecord;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Model short name → run id, as produced by the training step
pub type LatestRuns = BTreeMap<String, String>;

/// Serialize `value` as JSON and atomically replace `path`
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = tmp_path_for(path);
    let bytes = serde_json::to_vec_pretty(value)?;
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::Io(e));
    }
    debug!(path = %path.display(), "Side-file written");
    Ok(())
}

/// Read and parse a JSON file, `None` if it does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Persisted identity of the current champion
#[derive(Debug, Clone)]
pub struct ChampionStore {
    path: PathBuf,
}

impl ChampionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last recorded champion, `None` before the first promotion decision
    pub fn load(&self) -> Result<Option<ChampionRecord>> {
        read_json(&self.path)
    }

    /// Last recorded champion, failing with `NoChampionFound` when absent
    pub fn require(&self) -> Result<ChampionRecord> {
        self.load()?.ok_or_else(|| {
            Error::NoChampionFound(format!(
                "champion record {} does not exist",
                self.path.display()
            ))
        })
    }

    pub fn save(&self, record: &ChampionRecord) -> Result<()> {
        write_json_atomic(&self.path, record)
    }
}

/// Read the latest-runs side-file; a missing file means no fresh runs
pub fn load_latest_runs(path: &Path) -> Result<LatestRuns> {
    Ok(read_json(path)?.unwrap_or_default())
}

pub fn save_latest_runs(path: &Path, runs: &LatestRuns) -> Result<()> {
    write_json_atomic(path, runs)
}
