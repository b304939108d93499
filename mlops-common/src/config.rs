//! Bootstrap configuration loading
//!
//! Configuration file resolution priority:
//! 1. Command-line `--config` argument (highest priority)
//! 2. `MLOPS_CONFIG` environment variable
//! 3. `~/.config/mlops/config.toml`, then `/etc/mlops/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing discovered file is not fatal: defaults are used and a warning is
//! logged. An explicitly named file must exist and parse. Individual
//! `MLOPS_*` environment variables are applied on top of whichever source won.

use crate::model::DEFAULT_METRIC;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "MLOPS_CONFIG";

/// Complete bootstrap configuration
///
/// Loaded once at process start; changes require a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tracking server connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_tracking_uri")]
    pub tracking_uri: String,
    /// Prefix distinguishing this system's models in a shared registry
    #[serde(default = "default_model_prefix")]
    pub model_prefix: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tracking_uri: default_tracking_uri(),
            model_prefix: default_model_prefix(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Location of the side-files shared between pipeline steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_champion_file")]
    pub champion_file: String,
    #[serde(default = "default_latest_runs_file")]
    pub latest_runs_file: String,
}

impl StateConfig {
    pub fn champion_path(&self) -> PathBuf {
        self.dir.join(&self.champion_file)
    }

    pub fn latest_runs_path(&self) -> PathBuf {
        self.dir.join(&self.latest_runs_file)
    }

    /// Pid of the endpoint started by `mlops-promote promote --serve`
    pub fn serve_pid_path(&self) -> PathBuf {
        self.dir.join("mlops_serve.pid")
    }

    pub fn serve_log_path(&self) -> PathBuf {
        self.dir.join("mlops_serve.log")
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            champion_file: default_champion_file(),
            latest_runs_file: default_latest_runs_file(),
        }
    }
}

/// How a new champion is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionPolicy {
    /// Best fresh candidate replaces the running champion only if strictly better
    #[default]
    #[serde(alias = "challenger_must_beat_champion")]
    Challenger,
    /// Best of every registered version becomes champion, runner-up challenger
    Ranking,
}

impl fmt::Display for PromotionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionPolicy::Challenger => f.write_str("challenger"),
            PromotionPolicy::Ranking => f.write_str("ranking"),
        }
    }
}

impl FromStr for PromotionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "challenger" | "challenger_must_beat_champion" => Ok(PromotionPolicy::Challenger),
            "ranking" => Ok(PromotionPolicy::Ranking),
            other => Err(Error::Config(format!("unknown promotion policy: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionConfig {
    #[serde(default)]
    pub policy: PromotionPolicy,
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            policy: PromotionPolicy::default(),
            metric: default_metric(),
        }
    }
}

/// Serving endpoint bind address and artifact layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeConfig {
    #[serde(default = "default_serve_host")]
    pub host: String,
    #[serde(default = "default_serve_port")]
    pub port: u16,
    /// File inside the model artifact directory holding the classifier
    #[serde(default = "default_artifact_file")]
    pub artifact_file: String,
    /// Program and leading arguments that start the endpoint; the bind
    /// address is appended
    #[serde(default = "default_serve_command")]
    pub command: Vec<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: default_serve_host(),
            port: default_serve_port(),
            artifact_file: default_artifact_file(),
            command: default_serve_command(),
        }
    }
}

/// Scheduled pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_dag_id")]
    pub dag_id: String,
    /// Minimum whole days between successful training runs
    #[serde(default = "default_train_interval_days")]
    pub train_interval_days: i64,
    /// Extra attempts after a failed command step
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Run-history database; defaults to `<state dir>/pipeline_history.db`
    #[serde(default)]
    pub history_db: Option<PathBuf>,
    /// Command line per task id
    #[serde(default = "default_steps")]
    pub steps: BTreeMap<String, Vec<String>>,
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn history_db_path(&self, state: &StateConfig) -> PathBuf {
        self.history_db
            .clone()
            .unwrap_or_else(|| state.dir.join("pipeline_history.db"))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dag_id: default_dag_id(),
            train_interval_days: default_train_interval_days(),
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            history_db: None,
            steps: default_steps(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_tracking_uri() -> String {
    "http://localhost:5000".to_string()
}

fn default_model_prefix() -> String {
    "sentiment_".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mlops"))
        .unwrap_or_else(|| PathBuf::from("./mlops_data"))
}

fn default_champion_file() -> String {
    "current_champion.json".to_string()
}

fn default_latest_runs_file() -> String {
    "latest_runs.json".to_string()
}

fn default_metric() -> String {
    DEFAULT_METRIC.to_string()
}

fn default_serve_host() -> String {
    "0.0.0.0".to_string()
}

fn default_serve_port() -> u16 {
    5001
}

fn default_artifact_file() -> String {
    "model.json".to_string()
}

fn default_serve_command() -> Vec<String> {
    vec!["mlops-serve".to_string(), "serve".to_string()]
}

fn default_dag_id() -> String {
    "twitter_sentiment_analysis_pipeline".to_string()
}

fn default_train_interval_days() -> i64 {
    15
}

fn default_retries() -> u32 {
    1
}

fn default_retry_delay_secs() -> u64 {
    180
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_steps() -> BTreeMap<String, Vec<String>> {
    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    BTreeMap::from([
        ("crawl_data".to_string(), argv(&["python3", "data/crawl.py"])),
        ("preprocess_data".to_string(), argv(&["python3", "data/preprocessing.py"])),
        ("train_model".to_string(), argv(&["python3", "model_pipeline/model_training.py"])),
        ("model_deploy".to_string(), argv(&["mlops-promote", "register"])),
        (
            "model_validate".to_string(),
            argv(&["mlops-serve", "validate", "--input", "data/test_data.csv"]),
        ),
        ("model_serve".to_string(), argv(&["mlops-promote", "promote", "--serve"])),
        (
            "predict_data".to_string(),
            argv(&[
                "mlops-serve",
                "predict",
                "--input",
                "data/processed",
                "--output-dir",
                "data/labeled",
            ]),
        ),
        ("validate_data".to_string(), argv(&["python3", "data/validate.py"])),
        ("ingest_data".to_string(), argv(&["python3", "data/ingest.py"])),
    ])
}

/// Locates and loads the configuration file
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_path: Option<&Path>) -> Self {
        Self {
            cli_path: cli_path.map(Path::to_path_buf),
        }
    }

    /// Resolve, parse and apply environment overrides
    pub fn load(&self) -> Result<Config> {
        let mut config = match self.locate()? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                load_config_file(&path)?
            }
            None => {
                warn!("No configuration file found, using compiled defaults");
                Config::default()
            }
        };
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Path of the file that would be loaded, if any
    pub fn locate(&self) -> Result<Option<PathBuf>> {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_path {
            return require_exists(path.clone());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return require_exists(PathBuf::from(path));
            }
        }

        // Priority 3: Per-user then system-wide config file
        let user_config = dirs::config_dir().map(|d| d.join("mlops").join("config.toml"));
        if let Some(path) = user_config {
            if path.exists() {
                return Ok(Some(path));
            }
        }
        let system_config = PathBuf::from("/etc/mlops/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        // Priority 4: compiled defaults
        Ok(None)
    }
}

fn require_exists(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )))
    }
}

/// Parse a TOML configuration file
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    parse_config(&content)
}

/// Parse TOML text into a configuration, filling defaults
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Apply `MLOPS_*` environment overrides
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(uri) = env_value("MLOPS_TRACKING_URI") {
        config.registry.tracking_uri = uri;
    }
    if let Some(prefix) = env_value("MLOPS_MODEL_PREFIX") {
        config.registry.model_prefix = prefix;
    }
    if let Some(dir) = env_value("MLOPS_STATE_DIR") {
        config.state.dir = PathBuf::from(dir);
    }
    if let Some(port) = env_value("MLOPS_SERVE_PORT") {
        config.serve.port = port
            .parse()
            .map_err(|_| Error::Config(format!("MLOPS_SERVE_PORT is not a port: {}", port)))?;
    }
    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
