//! Row-normalised, symmetrised confusion matrices.

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1};

/// Confusion matrix after row normalisation and symmetrisation.
///
/// Entry `(i, j)` is the average of "true `i` predicted as `j`" and
/// "true `j` predicted as `i`", each as a fraction of its true class.
/// Classes with no samples produce NaN rows (and columns, after
/// symmetrisation).
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    values: Array2<f32>,
}

impl ConfusionMatrix {
    pub fn build(labels: &[usize], preds: &[usize], num_classes: usize) -> Result<Self> {
        let counts = counts(labels, preds, num_classes)?;
        Ok(Self {
            values: symmetrize(&normalize_rows(&counts)),
        })
    }

    pub fn num_classes(&self) -> usize {
        self.values.nrows()
    }

    /// Per-class accuracy (the diagonal).
    pub fn diagonal(&self) -> Array1<f32> {
        self.values.diag().to_owned()
    }

    /// Strict upper triangle; everything on or below the diagonal is 0.
    pub fn upper_triangle(&self) -> Array2<f32> {
        let mut out = self.values.clone();
        for ((i, j), v) in out.indexed_iter_mut() {
            if j <= i {
                *v = 0.0;
            }
        }
        out
    }

    /// The `k` classes most often confused with `class`, strongest first.
    pub fn top_confusions(&self, class: usize, k: usize) -> Vec<(usize, f32)> {
        if class >= self.num_classes() {
            return vec![];
        }
        let mut row: Vec<(usize, f32)> = self
            .values
            .row(class)
            .iter()
            .copied()
            .enumerate()
            .filter(|&(j, v)| j != class && v.is_finite() && v > 0.0)
            .collect();
        row.sort_by(|a, b| b.1.total_cmp(&a.1));
        row.truncate(k);
        row
    }
}

/// Difference of the strict upper triangles, `triu(a, 1) - triu(b, 1)`.
pub fn upper_triangle_diff(a: &ConfusionMatrix, b: &ConfusionMatrix) -> Array2<f32> {
    a.upper_triangle() - b.upper_triangle()
}

/// Raw counts; rows are true classes, columns predicted classes.
///
/// Pairs where either id falls outside `0..num_classes` are skipped.
pub fn counts(labels: &[usize], preds: &[usize], num_classes: usize) -> Result<Array2<f32>> {
    if labels.len() != preds.len() {
        bail!(
            "Label and prediction vectors differ in length ({} vs {})",
            labels.len(),
            preds.len()
        );
    }
    let mut cm = Array2::<f32>::zeros((num_classes, num_classes));
    for (&t, &p) in labels.iter().zip(preds) {
        if t < num_classes && p < num_classes {
            cm[[t, p]] += 1.0;
        }
    }
    Ok(cm)
}

/// Divide each row by its sum.  A zero row becomes NaN.
pub fn normalize_rows(counts: &Array2<f32>) -> Array2<f32> {
    let sums = counts.sum_axis(ndarray::Axis(1));
    let mut out = counts.clone();
    for (mut row, &s) in out.rows_mut().into_iter().zip(sums.iter()) {
        row.mapv_inplace(|v| v / s);
    }
    out
}

/// `(m + mᵀ) / 2`.
pub fn symmetrize(m: &Array2<f32>) -> Array2<f32> {
    (m + &m.t()) / 2.0
}

/// Fraction of positions where `preds` matches `labels`.
pub fn top1_accuracy(labels: &[usize], preds: &[usize]) -> f32 {
    if labels.is_empty() {
        return f32::NAN;
    }
    let hits = labels.iter().zip(preds).filter(|(t, p)| t == p).count();
    hits as f32 / labels.len() as f32
}

/// Element-wise `a - b`.
pub fn diagonal_delta(a: ArrayView1<f32>, b: ArrayView1<f32>) -> Array1<f32> {
    &a - &b
}
