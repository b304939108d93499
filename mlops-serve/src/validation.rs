//! Model validation step
//!
//! Scores the freshly trained runs on a labelled CSV set with `text` and
//! `sentiment_num` columns. Precision, recall and F1 are averaged over
//! classes weighted by their support in the true labels; a class never
//! predicted has precision 0.

use crate::batch::csv_error;
use crate::classifier::Classifier;
use crate::loader::load_run;
use mlops_common::records::LatestRuns;
use mlops_common::{Error, Result};
use mlops_registry::ModelRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::info;

/// One labelled row; extra columns are ignored
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabeledText {
    pub text: String,
    #[serde(rename = "sentiment_num", alias = "label")]
    pub label: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy={:.4} precision={:.4} recall={:.4} f1={:.4} (n={})",
            self.accuracy, self.precision, self.recall, self.f1, self.support
        )
    }
}

/// Validation result for one trained run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunValidation {
    pub model: String,
    pub run_id: String,
    pub report: ClassificationReport,
}

pub fn load_labeled(path: &Path) -> Result<Vec<LabeledText>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;
    let samples = reader
        .deserialize()
        .collect::<std::result::Result<Vec<LabeledText>, _>>()
        .map_err(|e| csv_error(path, e))?;

    if samples.is_empty() {
        return Err(Error::InvalidInput(format!("{} has no labelled records", path.display())));
    }
    Ok(samples)
}

/// Weighted-average classification metrics
pub fn classification_report(truth: &[i64], predicted: &[i64]) -> ClassificationReport {
    let support = truth.len().min(predicted.len());
    if support == 0 {
        return ClassificationReport {
            accuracy: 0.0,
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
            support: 0,
        };
    }

    // label -> (true positives, predicted count, true count)
    let mut counts: BTreeMap<i64, (usize, usize, usize)> = BTreeMap::new();
    let mut correct = 0;
    for (&t, &p) in truth.iter().zip(predicted) {
        counts.entry(t).or_default().2 += 1;
        counts.entry(p).or_default().1 += 1;
        if t == p {
            counts.entry(t).or_default().0 += 1;
            correct += 1;
        }
    }

    let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
    for &(tp, predicted_count, true_count) in counts.values() {
        if true_count == 0 {
            continue;
        }
        let weight = true_count as f64 / support as f64;
        let p = if predicted_count == 0 { 0.0 } else { tp as f64 / predicted_count as f64 };
        let r = tp as f64 / true_count as f64;
        let f = if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) };
        precision += weight * p;
        recall += weight * r;
        f1 += weight * f;
    }

    ClassificationReport {
        accuracy: correct as f64 / support as f64,
        precision,
        recall,
        f1,
        support,
    }
}

pub fn evaluate<C: Classifier + ?Sized>(classifier: &C, samples: &[LabeledText]) -> ClassificationReport {
    let texts: Vec<&str> = samples.iter().map(|s| s.text.as_str()).collect();
    let truth: Vec<i64> = samples.iter().map(|s| s.label).collect();
    classification_report(&truth, &classifier.predict_batch(&texts))
}

/// Evaluate the model of every run in the latest-runs side-file
pub async fn validate_latest_runs<R: ModelRegistry + ?Sized>(
    registry: &R,
    latest_runs: &LatestRuns,
    samples: &[LabeledText],
    artifact_file: &str,
) -> Result<Vec<RunValidation>> {
    let mut results = Vec::with_capacity(latest_runs.len());
    for (model, run_id) in latest_runs {
        let classifier = load_run(registry, run_id, artifact_file).await?;
        let report = evaluate(&classifier, samples);
        info!(model = %model, run_id = %run_id, "{}", report);
        results.push(RunValidation {
            model: model.clone(),
            run_id: run_id.clone(),
            report,
        });
    }
    Ok(results)
}
