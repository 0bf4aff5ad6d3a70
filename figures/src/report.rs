//! `summary.json` – the numbers behind the figures.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

/// A class of interest and why it was picked.
#[derive(Debug, Clone, Serialize)]
pub struct ClassSummary {
    pub id: usize,
    pub name: String,
    /// Accuracy change in percent.
    pub delta_pct: f32,
    /// Classes it is most confused with under the geo-prior, `(id, rate)`.
    pub top_confusions: Vec<(usize, f32)>,
    /// Heatmap file name inside the output directory.
    pub heatmap: String,
}

/// The most changed off-diagonal (pairwise) confusion.
#[derive(Debug, Clone, Serialize)]
pub struct PairChange {
    pub a: usize,
    pub b: usize,
    pub delta: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImprovementReport {
    pub dataset: String,
    pub split: String,
    pub num_predictions: usize,
    pub num_classes: usize,
    pub top1_no_prior: f32,
    pub top1_geo_net: f32,
    pub time_of_year: f32,
    pub worst: ClassSummary,
    pub best: ClassSummary,
    pub largest_pair_change: Option<PairChange>,
    /// Accuracy change per class in percent, ascending.
    pub sorted_delta_pct: Vec<f32>,
}

impl ImprovementReport {
    pub fn write(&self, out_path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Cannot serialise report")?;
        std::fs::write(out_path, json)
            .with_context(|| format!("Cannot write {}", out_path.display()))?;
        info!("Report written to {}", out_path.display());
        Ok(())
    }
}

/// Entry of `diff` with the largest magnitude, ignoring NaN.
pub fn largest_change(diff: &ndarray::Array2<f32>) -> Option<PairChange> {
    diff.indexed_iter()
        .filter(|(_, v)| v.is_finite() && **v != 0.0)
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map(|((a, b), &delta)| PairChange { a, b, delta })
}
