//! Sentiment classifier artifacts
//!
//! A champion's artifact directory holds `model.json`, a tagged document
//! describing one of two classifier kinds:
//!
//! ```json
//! {"kind": "linear_bow", "labels": [0, 1, 2],
//!  "vocabulary": {"great": 0, "awful": 1},
//!  "weights": [[-0.2, 1.4], [0.0, 0.0], [1.3, -1.1]],
//!  "biases": [0.1, 0.3, 0.0]}
//!
//! {"kind": "lexicon", "scores": {"great": 1.0, "awful": -1.0},
//!  "negative_threshold": -0.5, "positive_threshold": 0.5}
//! ```
//!
//! `weights` has one row per label and one column per vocabulary entry.

use mlops_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Predicts an integer sentiment label for a piece of text
pub trait Classifier: Send + Sync {
    fn predict(&self, text: &str) -> i64;

    fn predict_batch(&self, texts: &[&str]) -> Vec<i64> {
        texts.iter().map(|t| self.predict(t)).collect()
    }
}

/// Lowercase and split on anything that is not alphanumeric
///
/// Apostrophes between two word characters stay in the token (`don't`).
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let chars: Vec<char> = lowered.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        let inner_apostrophe = c == '\''
            && !current.is_empty()
            && chars.get(i + 1).map(|n| n.is_alphanumeric()).unwrap_or(false);
        if c.is_alphanumeric() || inner_apostrophe {
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Deserialized `model.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    LinearBow(LinearBow),
    Lexicon(Lexicon),
}

impl ModelArtifact {
    /// Parse and validate artifact bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let artifact: ModelArtifact = serde_json::from_slice(bytes)
            .map_err(|e| Error::ModelLoad(format!("invalid model artifact: {}", e)))?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModelArtifact::LinearBow(_) => "linear_bow",
            ModelArtifact::Lexicon(_) => "lexicon",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            ModelArtifact::LinearBow(model) => model.validate(),
            ModelArtifact::Lexicon(model) => model.validate(),
        }
    }
}

impl Classifier for ModelArtifact {
    fn predict(&self, text: &str) -> i64 {
        match self {
            ModelArtifact::LinearBow(model) => model.predict(text),
            ModelArtifact::Lexicon(model) => model.predict(text),
        }
    }
}

/// Linear model over binary bag-of-words features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearBow {
    pub labels: Vec<i64>,
    pub vocabulary: BTreeMap<String, usize>,
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
}

impl LinearBow {
    fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(Error::ModelLoad("linear_bow model has no labels".into()));
        }
        if self.weights.len() != self.labels.len() || self.biases.len() != self.labels.len() {
            return Err(Error::ModelLoad(format!(
                "linear_bow model has {} labels but {} weight rows and {} biases",
                self.labels.len(),
                self.weights.len(),
                self.biases.len()
            )));
        }
        let width = self.vocabulary.values().max().map(|m| m + 1).unwrap_or(0);
        if let Some(row) = self.weights.iter().position(|r| r.len() < width) {
            return Err(Error::ModelLoad(format!(
                "linear_bow weight row {} is shorter than the vocabulary ({} columns)",
                row, width
            )));
        }
        Ok(())
    }
}

impl Classifier for LinearBow {
    fn predict(&self, text: &str) -> i64 {
        let columns: BTreeSet<usize> = tokenize(text)
            .iter()
            .filter_map(|t| self.vocabulary.get(t).copied())
            .collect();

        let mut best_label = self.labels.first().copied().unwrap_or_default();
        let mut best_score = f64::NEG_INFINITY;
        for ((label, row), bias) in self.labels.iter().zip(&self.weights).zip(&self.biases) {
            let score = bias + columns.iter().filter_map(|&c| row.get(c)).sum::<f64>();
            // Strict comparison: the first label wins ties
            if score > best_score {
                best_score = score;
                best_label = *label;
            }
        }
        best_label
    }
}

/// Summed token polarity compared against two thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lexicon {
    pub scores: BTreeMap<String, f64>,
    #[serde(default = "default_negative_threshold")]
    pub negative_threshold: f64,
    #[serde(default = "default_positive_threshold")]
    pub positive_threshold: f64,
    #[serde(default)]
    pub labels: LexiconLabels,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LexiconLabels {
    pub negative: i64,
    pub neutral: i64,
    pub positive: i64,
}

impl Default for LexiconLabels {
    fn default() -> Self {
        Self {
            negative: 0,
            neutral: 1,
            positive: 2,
        }
    }
}

fn default_negative_threshold() -> f64 {
    -0.05
}

fn default_positive_threshold() -> f64 {
    0.05
}

impl Lexicon {
    fn validate(&self) -> Result<()> {
        if self.negative_threshold > self.positive_threshold {
            return Err(Error::ModelLoad(format!(
                "lexicon negative threshold {} exceeds positive threshold {}",
                self.negative_threshold, self.positive_threshold
            )));
        }
        Ok(())
    }

    pub fn polarity(&self, text: &str) -> f64 {
        tokenize(text)
            .iter()
            .filter_map(|t| self.scores.get(t))
            .sum()
    }
}

impl Classifier for Lexicon {
    fn predict(&self, text: &str) -> i64 {
        let polarity = self.polarity(text);
        if polarity >= self.positive_threshold {
            self.labels.positive
        } else if polarity <= self.negative_threshold {
            self.labels.negative
        } else {
            self.labels.neutral
        }
    }
}
