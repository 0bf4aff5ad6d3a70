//! Model manifest – hyperparameters of a trained geo-prior network.
//!
//! Each checkpoint lives in its own directory with a `manifest.toml`:
//!
//! ```toml
//! [model]
//! name = "inat_2017_full_final"
//! num_feats = 6
//! num_classes = 5089
//! num_filts = 256
//! num_users = 1
//! device = "cpu"
//! use_date_feats = true
//! weights_file = "weights.npz"
//! # onnx_file = "model.onnx"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// Top-level manifest structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub model: ModelParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelParams {
    pub name: String,
    /// Width of the encoded location (and date) input.
    pub num_feats: usize,
    pub num_classes: usize,
    /// Hidden width of the residual trunk.
    pub num_filts: usize,
    #[serde(default = "default_num_users")]
    pub num_users: usize,
    #[serde(default = "default_device")]
    pub device: String,
    /// Whether the network was trained with time-of-year inputs.
    #[serde(default)]
    pub use_date_feats: bool,
    /// State dict exported as `.npz`, keyed by PyTorch parameter names.
    #[serde(default = "default_weights_file")]
    pub weights_file: String,
    /// Optional ONNX export, preferred when present on disk.
    #[serde(default)]
    pub onnx_file: Option<String>,
}

fn default_num_users() -> usize {
    1
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_weights_file() -> String {
    "weights.npz".to_string()
}

/// A manifest together with the directory it was read from.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub manifest: Manifest,
    pub base_dir: PathBuf,
}

impl ResolvedManifest {
    pub fn params(&self) -> &ModelParams {
        &self.manifest.model
    }

    pub fn weights_path(&self) -> PathBuf {
        self.base_dir.join(&self.manifest.model.weights_file)
    }

    pub fn onnx_path(&self) -> Option<PathBuf> {
        self.manifest
            .model
            .onnx_file
            .as_ref()
            .map(|f| self.base_dir.join(f))
    }
}

/// Load `manifest.toml` from a checkpoint directory.
pub fn load_manifest(dir: &Path) -> Result<ResolvedManifest> {
    let manifest_path = dir.join("manifest.toml");
    let text = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("Cannot read {}", manifest_path.display()))?;
    let manifest: Manifest = toml::from_str(&text)
        .with_context(|| format!("Invalid manifest: {}", manifest_path.display()))?;
    let p = &manifest.model;
    info!(
        "Loaded model manifest: {} (feats={}, classes={}, filts={}, users={}, device={}, date_feats={})",
        p.name, p.num_feats, p.num_classes, p.num_filts, p.num_users, p.device, p.use_date_feats,
    );
    Ok(ResolvedManifest {
        manifest,
        base_dir: dir.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let toml = r#"
[model]
name = "inat_2017_full_final"
num_feats = 6
num_classes = 5089
num_filts = 256
num_users = 1
device = "cuda"
use_date_feats = true
onnx_file = "model.onnx"
"#;
        let m: Manifest = toml::from_str(toml).unwrap();
        assert_eq!(m.model.num_classes, 5089);
        assert_eq!(m.model.device, "cuda");
        assert!(m.model.use_date_feats);
        assert_eq!(m.model.weights_file, "weights.npz");
    }

    #[test]
    fn test_minimal_manifest() {
        let toml = r#"
[model]
name = "tiny"
num_feats = 4
num_classes = 3
num_filts = 8
"#;
        let m: Manifest = toml::from_str(toml).unwrap();
        assert_eq!(m.model.num_users, 1);
        assert_eq!(m.model.device, "cpu");
        assert!(!m.model.use_date_feats);
        assert!(m.model.onnx_file.is_none());
    }

    #[test]
    fn test_resolved_paths() {
        let toml = r#"
[model]
name = "tiny"
num_feats = 4
num_classes = 3
num_filts = 8
weights_file = "w.npz"
onnx_file = "m.onnx"
"#;
        let resolved = ResolvedManifest {
            manifest: toml::from_str(toml).unwrap(),
            base_dir: PathBuf::from("/models/tiny"),
        };
        assert_eq!(resolved.weights_path(), PathBuf::from("/models/tiny/w.npz"));
        assert_eq!(resolved.onnx_path(), Some(PathBuf::from("/models/tiny/m.onnx")));
    }

    #[test]
    fn test_missing_manifest() {
        let r = load_manifest(Path::new("/tmp/does_not_exist_geoprior_model"));
        assert!(r.is_err());
    }
}
