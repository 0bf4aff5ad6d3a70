//! Cached evaluation predictions (`model_preds.npz`).
//!
//! The archive is written by the evaluation run with `save_op` enabled and
//! holds the ground-truth labels, the classifier's predictions without a
//! prior and with the geo-prior applied, plus the dataset/split it was
//! computed on.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Result};
use tracing::info;

use crate::error::FigsError;
use crate::npz::NpzArchive;

/// Predictions for one evaluation split.
#[derive(Debug, Clone)]
pub struct PredictionCache {
    pub val_classes: Vec<usize>,
    pub pred_no_prior: Vec<usize>,
    pub pred_geo_net: Vec<usize>,
    pub dataset: String,
    pub split: String,
}

impl PredictionCache {
    /// Load the cache and check that the three arrays line up.
    pub fn load(path: &Path) -> Result<Self> {
        let mut npz = NpzArchive::open(path)?;
        let cache = Self {
            val_classes: npz.class_ids("val_classes")?,
            pred_no_prior: npz.class_ids("pred_no_prior")?,
            pred_geo_net: npz.class_ids("pred_geo_net")?,
            dataset: npz.string("dataset")?,
            split: npz.string("split")?,
        };
        cache.check_lengths()?;

        info!(
            "Loaded {} predictions for {}/{} from {}",
            cache.val_classes.len(),
            cache.dataset,
            cache.split,
            path.display()
        );
        Ok(cache)
    }

    fn check_lengths(&self) -> Result<()> {
        let n = self.val_classes.len();
        if self.pred_no_prior.len() != n || self.pred_geo_net.len() != n {
            bail!(
                "Prediction arrays disagree in length: val_classes={}, \
                 pred_no_prior={}, pred_geo_net={}",
                n,
                self.pred_no_prior.len(),
                self.pred_geo_net.len()
            );
        }
        Ok(())
    }

    /// Fail unless the cache was produced for `dataset`/`split`.
    pub fn ensure_split(&self, dataset: &str, split: &str) -> Result<(), FigsError> {
        if self.dataset != dataset || self.split != split {
            return Err(FigsError::DatasetMismatch {
                dataset: self.dataset.clone(),
                split: self.split.clone(),
                expected_dataset: dataset.to_string(),
                expected_split: split.to_string(),
            });
        }
        Ok(())
    }

    /// Number of distinct ground-truth classes.
    pub fn num_classes(&self) -> usize {
        self.val_classes.iter().collect::<BTreeSet<_>>().len()
    }

    /// `"<dataset> - <split>"`, used as the summary chart title.
    pub fn label(&self) -> String {
        format!("{} - {}", self.dataset, self.split)
    }
}
