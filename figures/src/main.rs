//! Geo-prior class-improvement figures – compares per-class accuracy with
//! and without the geo-prior, plots the sorted change and maps the
//! geo-prior's predictions for the classes it hurt and helped most.
//!
//! Expects the prediction cache written by an evaluation run with
//! `save_op` enabled on the iNat2017 validation split (it has a larger
//! validation set than iNat2018, which makes the sorted curve smoother).

mod confusion;
mod grid;
mod heatmap;
mod manifest;
mod model;
mod ranking;
mod report;
mod summary_plot;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use geoprior_common::categories::{self, CategoryTable};
use geoprior_common::config::{self, Config};
use geoprior_common::npz;
use geoprior_common::predictions::PredictionCache;

use confusion::ConfusionMatrix;
use grid::GridPredictor;
use model::GeoModel;
use ranking::Ranking;
use report::{ClassSummary, ImprovementReport};

/// Off-diagonal confusions listed per class of interest.
const TOP_CONFUSIONS: usize = 3;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| Config::default_path().to_string());
    let config = config::load(&PathBuf::from(&config_path)).context("Config load failed")?;

    run(&config)
}

fn run(config: &Config) -> Result<()> {
    // ── predictions ──────────────────────────────────────────────────
    let cache = PredictionCache::load(&config.predictions_path)?;
    cache
        .ensure_split(&config.expected_dataset, &config.expected_split)
        .context("Prediction cache is for the wrong dataset")?;

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Cannot create {}", config.output_dir.display()))?;

    // ── confusion matrices + ranking ─────────────────────────────────
    let num_classes = cache.num_classes();
    let cm_no_prior = ConfusionMatrix::build(&cache.val_classes, &cache.pred_no_prior, num_classes)?;
    let cm_geo_net = ConfusionMatrix::build(&cache.val_classes, &cache.pred_geo_net, num_classes)?;
    let ranking = Ranking::new(&cm_geo_net, &cm_no_prior)?;
    info!("Ranked {} classes by accuracy change", ranking.len());
    let sorted_pct = ranking.sorted_delta_pct();

    info!("Saving images to: {}", config.output_dir.display());
    let chart_path = config
        .output_dir
        .join(format!("{}_{}.svg", cache.dataset, cache.split));
    summary_plot::render(&chart_path, &cache.label(), &sorted_pct)?;

    // ── classes of interest ──────────────────────────────────────────
    let names = categories::load(&config.categories_path())?;
    let worst = ranking.worst()?;
    let best = ranking.best()?;
    info!("Worst improvement: {worst} {}", names.name(worst)?);
    info!("Best improvement: {best} {}", names.name(best)?);
    for class in [worst, best] {
        for (other, rate) in cm_geo_net.top_confusions(class, TOP_CONFUSIONS) {
            info!("  {class} confused with {other} ({rate:.3})");
        }
    }

    // ── model + dense predictions ────────────────────────────────────
    let resolved = manifest::load_manifest(&config.model_path)?;
    let model = model::load_model(&resolved)?;
    let params = model.params();
    if params.num_feats != grid::num_input_feats(params.use_date_feats) {
        bail!(
            "Model expects {} input features but the grid encodes {}",
            params.num_feats,
            grid::num_input_feats(params.use_date_feats)
        );
    }
    if !params.use_date_feats {
        warn!("Trained model not using date features");
    }

    let mask = npz::read_npy_2d(&config.mask_path)
        .with_context(|| format!("Cannot load mask {}", config.mask_path.display()))?;
    let gp = GridPredictor::new(&mask, params.use_date_feats);
    if gp.land_cells() == 0 {
        warn!("Mask {} has no land cells", config.mask_path.display());
    }

    let worst_summary = map_class(config, &gp, &model, &names, &ranking, &cm_geo_net, worst)?;
    let best_summary = map_class(config, &gp, &model, &names, &ranking, &cm_geo_net, best)?;

    // ── report ───────────────────────────────────────────────────────
    let report = ImprovementReport {
        dataset: cache.dataset.clone(),
        split: cache.split.clone(),
        num_predictions: cache.val_classes.len(),
        num_classes,
        top1_no_prior: confusion::top1_accuracy(&cache.val_classes, &cache.pred_no_prior),
        top1_geo_net: confusion::top1_accuracy(&cache.val_classes, &cache.pred_geo_net),
        time_of_year: config.time_of_year,
        worst: worst_summary,
        best: best_summary,
        largest_pair_change: report::largest_change(&confusion::upper_triangle_diff(
            &cm_geo_net,
            &cm_no_prior,
        )),
        sorted_delta_pct: sorted_pct,
    };
    report.write(&config.output_dir.join("summary.json"))?;

    info!("Done");
    Ok(())
}

/// Predict `class` over the grid and save its heatmap and titled figure.
fn map_class(
    config: &Config,
    gp: &GridPredictor,
    model: &GeoModel,
    names: &CategoryTable,
    ranking: &Ranking,
    cm_geo_net: &ConfusionMatrix,
    class: usize,
) -> Result<ClassSummary> {
    let name = names.name(class)?;
    let grid = gp.dense_prediction(model, class, config.time_of_year)?;

    let heatmap_name = format!("{class:04}.png");
    heatmap::save(&grid.values, &config.output_dir.join(&heatmap_name))?;
    heatmap::save_figure(
        &grid.values,
        &format!("{name} {class}"),
        &config.output_dir.join(format!("{class:04}_figure.png")),
    )?;
    let (h, w) = grid.dim();
    info!(
        "Mapped class {class} ({name}) over {} land cells of a {h}x{w} grid",
        grid.valid_count()
    );

    Ok(ClassSummary {
        id: class,
        name: name.to_string(),
        delta_pct: ranking.delta[class] * 100.0,
        top_confusions: cm_geo_net.top_confusions(class, TOP_CONFUSIONS),
        heatmap: heatmap_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        npy_bytes, temp_dir, unicode_scalar_npy, write_npz, write_tiny_weights,
    };
    use geoprior_common::error::FigsError;
    use ndarray::{array, Array2};
    use std::path::Path;

    const MANIFEST: &str = r#"
[model]
name = "tiny"
num_feats = 4
num_classes = 3
num_filts = 2
"#;

    const CATEGORIES: &str = r#"[
        {"id": 0, "name": "Quercus agrifolia"},
        {"id": 1, "name": "Sciurus griseus"},
        {"id": 2, "name": "Buteo jamaicensis"}
    ]"#;

    /// Cache, categories, checkpoint and mask under `root`; output goes to
    /// `root/out`, which is removed first.
    fn fixture(root: &Path, dataset: &str) -> Config {
        // per-class accuracy: no prior [0.5, 0.5, 1.0], geo-prior [1.0, 1.0, 0.5]
        let predictions = root.join("model_preds.npz");
        write_npz(
            &predictions,
            &[
                ("val_classes", npy_bytes(&array![0i64, 0, 1, 1, 2, 2])),
                ("pred_no_prior", npy_bytes(&array![0i64, 1, 1, 0, 2, 2])),
                ("pred_geo_net", npy_bytes(&array![0i64, 0, 1, 1, 2, 0])),
                ("dataset", unicode_scalar_npy(dataset)),
                ("split", unicode_scalar_npy("val")),
            ],
        );
        std::fs::write(root.join("categories2017.json"), CATEGORIES).unwrap();

        let model_dir = root.join("model");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("manifest.toml"), MANIFEST).unwrap();
        write_tiny_weights(&model_dir);

        let mut mask = Array2::<f32>::zeros((6, 8));
        mask.slice_mut(ndarray::s![1..5, 2..7]).fill(1.0);
        let mask_path = root.join("ocean_mask.npy");
        std::fs::write(&mask_path, npy_bytes(&mask)).unwrap();

        let output_dir = root.join("out");
        let _ = std::fs::remove_dir_all(&output_dir);

        Config {
            model_path: model_dir,
            data_dir: root.to_path_buf(),
            categories_file: "categories2017.json".into(),
            mask_path,
            predictions_path: predictions,
            output_dir,
            ..Config::default()
        }
    }

    #[test]
    fn test_run_writes_all_outputs() {
        let config = fixture(&temp_dir("run_outputs"), "inat_2017");
        run(&config).unwrap();

        // three classes: the second-worst and second-best are both class 0
        let out = &config.output_dir;
        for name in ["inat_2017_val.svg", "0000.png", "0000_figure.png", "summary.json"] {
            assert!(out.join(name).exists(), "missing {name}");
        }

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["num_classes"], 3);
        assert_eq!(summary["worst"]["name"], "Quercus agrifolia");
        assert_eq!(summary["sorted_delta_pct"].as_array().unwrap().len(), 3);

        let heatmap = image::open(out.join("0000.png")).unwrap();
        assert_eq!((heatmap.width(), heatmap.height()), (8, 6));
    }

    #[test]
    fn test_wrong_dataset_writes_nothing() {
        let config = fixture(&temp_dir("run_guard"), "inat_2018");
        let err = run(&config).unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<FigsError>(),
                Some(FigsError::DatasetMismatch { .. })
            ),
            "got: {err:#}"
        );
        assert!(!config.output_dir.exists());
    }
}
