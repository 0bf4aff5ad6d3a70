//! Dense world-grid predictions for a single class.
//!
//! Every mask cell maps to a location: longitude runs west→east across
//! columns and latitude north→south down rows, both scaled to `[-1, 1]`.
//! Only land cells (non-zero mask) are sent through the model.

use std::f32::consts::PI;

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, Axis};
use tracing::{debug, info};

use crate::model::GeoModel;

/// Encoded width of a location.
const LOC_FEATS: usize = 4;
/// Encoded width of a date.
const DATE_FEATS: usize = 2;

/// Model input width for the given feature set.
pub fn num_input_feats(use_date_feats: bool) -> usize {
    if use_date_feats {
        LOC_FEATS + DATE_FEATS
    } else {
        LOC_FEATS
    }
}

/// `[sin(πx), sin(πy), cos(πx), cos(πy)]`, then `[sin(πt), cos(πt)]`
/// when a date (already in `[-1, 1]`) is given.
pub fn encode_loc_time(lon: f32, lat: f32, date: Option<f32>) -> Vec<f32> {
    let mut feats = vec![
        (PI * lon).sin(),
        (PI * lat).sin(),
        (PI * lon).cos(),
        (PI * lat).cos(),
    ];
    if let Some(t) = date {
        feats.push((PI * t).sin());
        feats.push((PI * t).cos());
    }
    feats
}

/// Scores for one class over the whole mask.
#[derive(Debug, Clone)]
pub struct DenseGrid {
    /// Model score on land, 0 on ocean, `+1` on coastline cells.
    pub values: Array2<f32>,
    /// Cells that were evaluated.
    pub valid: Array2<bool>,
}

impl DenseGrid {
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }
}

/// Precomputed land locations and their encoded features.
pub struct GridPredictor {
    mask: Array2<bool>,
    outlines: Array2<bool>,
    /// `(row, col)` of every land cell, row-major.
    land: Vec<(usize, usize)>,
    /// Location features of the land cells, `[land, LOC_FEATS]`.
    loc_feats: Array2<f32>,
    use_date_feats: bool,
}

impl GridPredictor {
    pub fn new(mask: &Array2<f32>, use_date_feats: bool) -> Self {
        let (h, w) = mask.dim();
        let lon = linspace(-1.0, 1.0, w);
        let lat = linspace(1.0, -1.0, h);

        let land_mask = mask.mapv(|v| v != 0.0);
        let land: Vec<(usize, usize)> = land_mask
            .indexed_iter()
            .filter(|(_, &v)| v)
            .map(|(idx, _)| idx)
            .collect();

        let mut loc_feats = Array2::<f32>::zeros((land.len(), LOC_FEATS));
        for (mut row, &(r, c)) in loc_feats.rows_mut().into_iter().zip(&land) {
            let enc = encode_loc_time(lon[c], lat[r], None);
            row.assign(&Array1::from(enc));
        }

        let outlines = mask_outlines(mask);
        info!(
            "Grid predictor: {}x{} mask, {} land cells, {} outline cells",
            h,
            w,
            land.len(),
            outlines.iter().filter(|&&v| v).count()
        );

        Self {
            mask: land_mask,
            outlines,
            land,
            loc_feats,
            use_date_feats,
        }
    }

    pub fn land_cells(&self) -> usize {
        self.land.len()
    }

    /// Model input for every land cell at `time_of_year` in `[0, 1]`.
    pub fn features(&self, time_of_year: f32) -> Array2<f32> {
        if !self.use_date_feats {
            return self.loc_feats.clone();
        }
        let date = time_of_year * 2.0 - 1.0;
        let date_feats = [(PI * date).sin(), (PI * date).cos()];
        let mut feats = Array2::<f32>::zeros((self.land.len(), LOC_FEATS + DATE_FEATS));
        feats
            .slice_mut(ndarray::s![.., ..LOC_FEATS])
            .assign(&self.loc_feats);
        for mut row in feats.rows_mut() {
            row[LOC_FEATS] = date_feats[0];
            row[LOC_FEATS + 1] = date_feats[1];
        }
        feats
    }

    /// Score `class` on every land cell and lay the result out as a grid.
    pub fn dense_prediction(
        &self,
        model: &GeoModel,
        class: usize,
        time_of_year: f32,
    ) -> Result<DenseGrid> {
        if !(0.0..=1.0).contains(&time_of_year) {
            bail!("time_of_year must lie in [0, 1], got {time_of_year}");
        }

        let mut values = Array2::<f32>::zeros(self.mask.dim());
        if !self.land.is_empty() {
            let feats = self.features(time_of_year);
            let scores = model.score_class(feats.view(), class)?;
            for (&(r, c), &s) in self.land.iter().zip(scores.iter()) {
                values[[r, c]] = s;
            }
        }
        for (v, &edge) in values.iter_mut().zip(self.outlines.iter()) {
            if edge {
                *v += 1.0;
            }
        }
        debug!("Dense prediction for class {class} at t={time_of_year}");

        Ok(DenseGrid {
            values,
            valid: self.mask.clone(),
        })
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
fn linspace(start: f32, end: f32, n: usize) -> Vec<f32> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f32;
            (0..n).map(|i| start + step * i as f32).collect()
        }
    }
}

/// Cells where the mask changes, i.e. a non-zero gradient along either axis.
///
/// Central differences inside, one-sided at the borders; an axis of length
/// 1 has zero gradient.
pub fn mask_outlines(mask: &Array2<f32>) -> Array2<bool> {
    let g_rows = gradient(mask, Axis(0));
    let g_cols = gradient(mask, Axis(1));
    let mut out = Array2::from_elem(mask.dim(), false);
    ndarray::Zip::from(&mut out)
        .and(&g_rows)
        .and(&g_cols)
        .for_each(|o, &a, &b| *o = a * a + b * b > 0.0);
    out
}

fn gradient(a: &Array2<f32>, axis: Axis) -> Array2<f32> {
    let n = a.len_of(axis);
    let mut g = Array2::<f32>::zeros(a.dim());
    if n < 2 {
        return g;
    }
    for i in 0..n {
        let (lo, hi, div) = if i == 0 {
            (0, 1, 1.0)
        } else if i == n - 1 {
            (n - 2, n - 1, 1.0)
        } else {
            (i - 1, i + 1, 2.0)
        };
        let diff = (&a.index_axis(axis, hi) - &a.index_axis(axis, lo)) / div;
        g.index_axis_mut(axis, i).assign(&diff);
    }
    g
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FcNet;
    use crate::testutil::{temp_dir, tiny_params, write_tiny_weights};
    use ndarray::array;

    fn tiny_model(sub: &str) -> GeoModel {
        let path = write_tiny_weights(&temp_dir(sub));
        GeoModel::native(tiny_params(), FcNet::load(&path, &tiny_params()).unwrap())
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(-1.0, 1.0, 3), vec![-1.0, 0.0, 1.0]);
        assert_eq!(linspace(1.0, -1.0, 1), vec![1.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_encode_loc_time() {
        let f = encode_loc_time(0.5, 0.0, None);
        assert_eq!(f.len(), 4);
        assert!((f[0] - 1.0).abs() < 1e-6);
        assert!(f[1].abs() < 1e-6);
        assert!(f[2].abs() < 1e-6);
        assert!((f[3] - 1.0).abs() < 1e-6);

        let f = encode_loc_time(0.0, 0.0, Some(0.0));
        assert_eq!(f.len(), num_input_feats(true));
        assert!(f[4].abs() < 1e-6);
        assert!((f[5] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mask_outlines() {
        let mask = array![
            [0.0f32, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 1.0],
            [0.0, 0.0, 1.0, 1.0],
        ];
        let edges = mask_outlines(&mask);
        assert!(!edges[[0, 0]]);
        assert!(edges[[1, 2]]);
        assert!(edges[[2, 1]]);
        assert!(edges[[2, 2]]);
        // interior of the block: both one-sided differences are 0
        assert!(!edges[[3, 3]]);
        assert!(!edges[[0, 3]]);
    }

    #[test]
    fn test_uniform_mask_has_no_outlines() {
        assert!(mask_outlines(&Array2::ones((3, 5))).iter().all(|&v| !v));
        assert!(mask_outlines(&Array2::zeros((1, 5))).iter().all(|&v| !v));
    }

    #[test]
    fn test_zero_mask_excludes_everything() {
        let gp = GridPredictor::new(&Array2::zeros((4, 8)), false);
        assert_eq!(gp.land_cells(), 0);
        let grid = gp.dense_prediction(&tiny_model("grid_zero"), 0, 0.5).unwrap();
        assert_eq!(grid.dim(), (4, 8));
        assert_eq!(grid.valid_count(), 0);
        assert!(grid.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_dense_prediction_only_on_land() {
        // 3 rows x 5 cols, a single land cell
        let mut mask = Array2::<f32>::zeros((3, 5));
        mask[[1, 3]] = 1.0;
        let gp = GridPredictor::new(&mask, false);
        assert_eq!(gp.land_cells(), 1);

        let grid = gp.dense_prediction(&tiny_model("grid_land"), 0, 0.5).unwrap();
        assert_eq!(grid.valid_count(), 1);
        assert!(grid.valid[[1, 3]]);

        // column 3 of 5 is longitude 0.5 → x0 = sin(π/2) = 1 → embedding 2;
        // central differences around an isolated cell cancel, so no outline.
        let expected = 1.0 / (1.0 + (-2.0f32).exp());
        assert!((grid.values[[1, 3]] - expected).abs() < 1e-5);
        // horizontal neighbours are outline cells, far ocean stays 0
        assert_eq!(grid.values[[1, 2]], 1.0);
        assert_eq!(grid.values[[0, 0]], 0.0);
    }

    #[test]
    fn test_date_features_appended() {
        let gp = GridPredictor::new(&Array2::ones((2, 2)), true);
        let feats = gp.features(0.5);
        assert_eq!(feats.dim(), (4, 6));
        // t = 0.5 → date 0 → sin 0, cos 1
        assert!(feats.column(4).iter().all(|v| v.abs() < 1e-6));
        assert!(feats.column(5).iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_time_of_year_checked() {
        let gp = GridPredictor::new(&Array2::ones((2, 2)), false);
        assert!(gp.dense_prediction(&tiny_model("grid_time"), 0, 1.5).is_err());
    }
}
