//! Configuration parsing – reads a KEY=VALUE file (`figs.conf`).
//!
//! Every path the figure pipeline touches comes from here; nothing is
//! resolved through process-wide state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ── inputs ───────────────────────────────────────────────────────
    /// Model checkpoint directory (contains `manifest.toml`).
    pub model_path: PathBuf,
    /// Dataset directory holding the category file.
    pub data_dir: PathBuf,
    /// Category JSON file name, relative to `data_dir`.
    pub categories_file: String,
    /// Land/ocean mask (`.npy`).
    pub mask_path: PathBuf,
    /// Cached predictions archive (`.npz`) written by the evaluation run.
    pub predictions_path: PathBuf,

    // ── prediction ───────────────────────────────────────────────────
    /// Fraction of the year fed to the model (0 = start, 1 = end).
    pub time_of_year: f32,

    // ── guard ────────────────────────────────────────────────────────
    pub expected_dataset: String,
    pub expected_split: String,

    // ── outputs ──────────────────────────────────────────────────────
    pub output_dir: PathBuf,
}

impl Config {
    /// Default config path.
    pub fn default_path() -> &'static str {
        "/etc/geoprior/figs.conf"
    }

    /// Full path of the category JSON file.
    pub fn categories_path(&self) -> PathBuf {
        self.data_dir.join(&self.categories_file)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_map(&HashMap::new())
    }
}

/// Parse a `KEY=VALUE` configuration file.
///
/// Lines starting with `#` are comments.  Values may be optionally
/// double-quoted.  Unknown keys are silently ignored.
pub fn load(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config: {}", path.display()))?;

    let config = Config::from_map(&parse_conf(&text));
    validate(&config)?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

impl Config {
    fn from_map(map: &HashMap<String, String>) -> Config {
        let get = |key: &str| -> Option<String> {
            map.get(key).filter(|v| !v.is_empty()).cloned()
        };
        let get_path = |key: &str, default: &str| -> PathBuf {
            PathBuf::from(get(key).unwrap_or_else(|| default.into()))
        };

        Config {
            model_path: get_path("MODEL_PATH", "../models/model_inat_2017_full_final"),
            data_dir: get_path("DATA_DIR", "/data/inat_2017"),
            categories_file: get("CATEGORIES_FILE")
                .unwrap_or_else(|| "categories2017.json".into()),
            mask_path: get_path("MASK_PATH", "/data/masks/ocean_mask.npy"),
            predictions_path: get_path("PREDICTIONS_PATH", "../geo_prior/model_preds.npz"),
            time_of_year: get("TIME_OF_YEAR")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),
            expected_dataset: get("EXPECTED_DATASET").unwrap_or_else(|| "inat_2017".into()),
            expected_split: get("EXPECTED_SPLIT").unwrap_or_else(|| "val".into()),
            output_dir: get_path("OUTPUT_DIR", "images/class_improvement"),
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.time_of_year) {
        bail!(
            "TIME_OF_YEAR must lie in [0, 1], got {}",
            config.time_of_year
        );
    }
    Ok(())
}

/// Parse `KEY=VALUE` lines into a map, stripping optional double-quotes.
fn parse_conf(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            let key = key.trim();
            let val = val.trim().trim_matches('"');
            map.insert(key.to_string(), val.to_string());
        }
    }
    map
}

// ─── tests ───────────────────────────────────────────────────────────────
