//! Rank classes by how much the geo-prior changed their accuracy.

use std::cmp::Ordering;

use anyhow::{bail, Result};
use ndarray::Array1;

use crate::confusion::{self, ConfusionMatrix};

/// Number of entries skipped at each end of the sorted order when picking
/// the worst and best classes (1 selects the 2nd worst and 2nd best).
pub const EXTREME_SKIP: usize = 1;

/// Accuracy deltas and their ascending order.
#[derive(Debug, Clone)]
pub struct Ranking {
    /// `diag(geo) - diag(no_prior)`, indexed by class id.
    pub delta: Array1<f32>,
    /// Class ids sorted by ascending delta (stable, NaN last).
    pub order: Vec<usize>,
}

impl Ranking {
    pub fn new(geo_net: &ConfusionMatrix, no_prior: &ConfusionMatrix) -> Result<Self> {
        if geo_net.num_classes() != no_prior.num_classes() {
            bail!(
                "Confusion matrices differ in size ({} vs {})",
                geo_net.num_classes(),
                no_prior.num_classes()
            );
        }
        let delta = confusion::diagonal_delta(
            geo_net.diagonal().view(),
            no_prior.diagonal().view(),
        );
        Ok(Self::from_delta(delta))
    }

    pub fn from_delta(delta: Array1<f32>) -> Self {
        let mut order: Vec<usize> = (0..delta.len()).collect();
        order.sort_by(|&a, &b| nan_last(delta[a], delta[b]));
        Self { delta, order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Sorted deltas in percent, ready for plotting.
    pub fn sorted_delta_pct(&self) -> Vec<f32> {
        self.order.iter().map(|&i| self.delta[i] * 100.0).collect()
    }

    /// Class whose accuracy dropped the most, after skipping the extreme.
    pub fn worst(&self) -> Result<usize> {
        self.ensure_enough()?;
        Ok(self.order[EXTREME_SKIP])
    }

    /// Class whose accuracy improved the most, after skipping the extreme.
    pub fn best(&self) -> Result<usize> {
        self.ensure_enough()?;
        Ok(self.order[self.order.len() - 1 - EXTREME_SKIP])
    }

    fn ensure_enough(&self) -> Result<()> {
        if self.order.len() <= EXTREME_SKIP {
            bail!(
                "Need more than {EXTREME_SKIP} class(es) to pick classes of interest, have {}",
                self.order.len()
            );
        }
        Ok(())
    }
}

/// Total order on `f32` that puts every NaN after every number.
fn nan_last(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sorted_non_decreasing() {
        let r = Ranking::from_delta(array![0.3, -0.2, 0.0, 0.9, -0.7]);
        assert_eq!(r.order, vec![4, 1, 2, 0, 3]);
        let sorted = r.sorted_delta_pct();
        assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_second_worst_and_best() {
        let r = Ranking::from_delta(array![0.3, -0.2, 0.0, 0.9, -0.7]);
        assert_eq!(r.worst().unwrap(), 1);
        assert_eq!(r.best().unwrap(), 0);
    }

    #[test]
    fn test_nan_sorts_last_and_ties_are_stable() {
        let r = Ranking::from_delta(array![f32::NAN, 0.1, 0.1, -0.1]);
        assert_eq!(r.order, vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_too_few_classes() {
        let r = Ranking::from_delta(array![0.5]);
        assert!(r.worst().is_err());
        assert!(r.best().is_err());
    }

    #[test]
    fn test_identical_predictions_give_zero_delta() {
        let labels = [0, 1, 1, 2, 2, 2];
        let preds = [0, 2, 1, 2, 0, 2];
        let a = ConfusionMatrix::build(&labels, &preds, 3).unwrap();
        let b = ConfusionMatrix::build(&labels, &preds, 3).unwrap();
        let r = Ranking::new(&a, &b).unwrap();
        assert_eq!(r.len(), 3);
        assert!(r.sorted_delta_pct().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_delta_length_matches_class_count() {
        let labels = [0, 1, 2, 3];
        let no_prior = ConfusionMatrix::build(&labels, &[1, 1, 2, 0], 4).unwrap();
        let geo = ConfusionMatrix::build(&labels, &[0, 1, 2, 3], 4).unwrap();
        let r = Ranking::new(&geo, &no_prior).unwrap();
        assert_eq!(r.delta.len(), 4);
        assert_eq!(r.delta[0], 1.0);
        assert_eq!(r.delta[1], 0.0);
    }
}
