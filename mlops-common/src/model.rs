//! Registry data model
//!
//! Registered models, versions and runs are owned by the tracking server;
//! these types are read-side projections of its responses. `ChampionRecord`
//! is derived locally after each promotion decision.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tag key marking the promoted version
pub const CHAMPION_TAG: &str = "champion";

/// Tag key marking the best candidate that was not promoted
pub const CHALLENGER_TAG: &str = "challenger";

/// Tag value written by the mutator
pub const TAG_TRUE: &str = "True";

/// Metric name used to score candidates unless configured otherwise
pub const DEFAULT_METRIC: &str = "f1_score";

/// Score assigned to a candidate without the scoring metric
pub const MISSING_SCORE: f64 = -1.0;

/// Lifecycle stage of a model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    None,
    Staging,
    Production,
    Archived,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = crate::Error;

    /// Stage names are matched case-insensitively, as the tracking server does
    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Stage::None),
            "staging" => Ok(Stage::Staging),
            "production" => Ok(Stage::Production),
            "archived" => Ok(Stage::Archived),
            other => Err(crate::Error::InvalidInput(format!("unknown stage: {}", other))),
        }
    }
}

/// A named model in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
}

/// One registered version of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    /// Monotonic per-model version number assigned by the registry
    pub version: u64,
    /// Run that produced the artifact
    pub run_id: String,
    pub current_stage: Stage,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Artifact source URI recorded at registration
    #[serde(default)]
    pub source: Option<String>,
}

impl ModelVersion {
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.get(key).map(|v| v == TAG_TRUE).unwrap_or(false)
    }

    pub fn is_champion(&self) -> bool {
        self.has_tag(CHAMPION_TAG)
    }
}

/// A training execution with its logged metrics and parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Root URI under which the run's artifacts were logged
    #[serde(default)]
    pub artifact_uri: Option<String>,
}

impl Run {
    /// Metric value; `None` when absent or not a number
    pub fn metric(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied().filter(|v| !v.is_nan())
    }

    /// Metric value, or `MISSING_SCORE` when absent or not a number
    pub fn score(&self, metric: &str) -> f64 {
        self.metric(metric).unwrap_or(MISSING_SCORE)
    }
}

/// Identity of the currently promoted model
///
/// Persisted as the champion side-file; `name` and `version` are the
/// contract read by the prediction step, the rest is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChampionRecord {
    pub name: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl ChampionRecord {
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
            run_id: None,
            score: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_parse_is_case_insensitive() {
        assert_eq!("production".parse::<Stage>().unwrap(), Stage::Production);
        assert_eq!("Archived".parse::<Stage>().unwrap(), Stage::Archived);
        assert_eq!("".parse::<Stage>().unwrap(), Stage::None);
        assert!("retired".parse::<Stage>().is_err());
    }

    #[test]
    fn test_missing_or_nan_metric_scores_minus_one() {
        let mut run = Run {
            run_id: "r1".into(),
            ..Default::default()
        };
        assert_eq!(run.score(DEFAULT_METRIC), MISSING_SCORE);

        run.metrics.insert(DEFAULT_METRIC.into(), f64::NAN);
        assert_eq!(run.score(DEFAULT_METRIC), MISSING_SCORE);

        run.metrics.insert(DEFAULT_METRIC.into(), 0.82);
        assert_eq!(run.score(DEFAULT_METRIC), 0.82);
    }

    #[test]
    fn test_champion_record_side_file_shape() {
        let record = ChampionRecord::new("sentiment_lr", 4);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"name": "sentiment_lr", "version": 4}));

        let parsed: ChampionRecord =
            serde_json::from_str(r#"{"name": "sentiment_bert", "version": 2}"#).unwrap();
        assert_eq!(parsed, ChampionRecord::new("sentiment_bert", 2));
    }

    #[test]
    fn test_champion_tag_requires_true_value() {
        let mut v = ModelVersion {
            name: "m".into(),
            version: 1,
            run_id: "r".into(),
            current_stage: Stage::None,
            tags: BTreeMap::new(),
            source: None,
        };
        assert!(!v.is_champion());
        v.tags.insert(CHAMPION_TAG.into(), "False".into());
        assert!(!v.is_champion());
        v.tags.insert(CHAMPION_TAG.into(), TAG_TRUE.into());
        assert!(v.is_champion());
    }
}
