//! Geo-prior network loading and single-class inference.
//!
//! Two backends are supported for the same fully connected residual
//! network:
//!
//! * **native** – weights exported from the PyTorch state dict to an
//!   `.npz` archive, evaluated with `ndarray`;
//! * **ONNX** – when the manifest names an `onnx_file` **and** that file
//!   exists, the graph is loaded with `tract-onnx` instead.
//!
//! Inputs are processed in fixed-size row batches so that a full-resolution
//! world grid never has to be materialised as one activation matrix.

use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

use geoprior_common::npz::NpzArchive;

use crate::manifest::{ModelParams, ResolvedManifest};

// ── constants ────────────────────────────────────────────────────────────

/// Residual blocks in the trunk (`feats.2` .. `feats.5`).
const NUM_RES_LAYERS: usize = 4;

/// Index of the first residual block inside the `feats` sequential.
const FIRST_RES_INDEX: usize = 2;

/// Rows per inference batch.
pub const BATCH_ROWS: usize = 4096;

// ── public types ─────────────────────────────────────────────────────────

/// A loaded model ready for inference.
pub struct GeoModel {
    backend: Backend,
    params: ModelParams,
}

enum Backend {
    Native(FcNet),
    Onnx(TypedRunnableModel<TypedModel>),
}

/// Fully connected network: input layer, residual trunk and a class
/// embedding (bias-free unless the state dict carries `class_emb.bias`).
pub struct FcNet {
    input: Linear,
    res_layers: Vec<ResLayer>,
    class_emb: Linear,
}

struct Linear {
    /// `[out, in]`, PyTorch layout.
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

struct ResLayer {
    w1: Linear,
    w2: Linear,
}

// ── model loading ────────────────────────────────────────────────────────

/// Load a model from a resolved manifest.
///
/// Prefers ONNX when `onnx_file` is configured **and** the file exists;
/// otherwise falls back to the native weights.
pub fn load_model(resolved: &ResolvedManifest) -> Result<GeoModel> {
    let params = resolved.params().clone();
    check_device(&params.device)?;

    let backend = match resolved.onnx_path() {
        Some(onnx_path) if onnx_path.exists() => {
            info!("Loading ONNX model from {}", onnx_path.display());
            Backend::Onnx(load_onnx_runner(&onnx_path, params.num_feats)?)
        }
        Some(onnx_path) => {
            info!(
                "ONNX file configured but missing ({}), falling back to native weights",
                onnx_path.display()
            );
            Backend::Native(FcNet::load(&resolved.weights_path(), &params)?)
        }
        None => Backend::Native(FcNet::load(&resolved.weights_path(), &params)?),
    };

    Ok(GeoModel { backend, params })
}

/// Inference always runs on the CPU; CUDA checkpoints are accepted.
fn check_device(device: &str) -> Result<()> {
    match device {
        "cpu" => Ok(()),
        d if d.starts_with("cuda") => {
            warn!("Model was configured for {d}; running on cpu");
            Ok(())
        }
        d => bail!("Unsupported device '{d}'"),
    }
}

/// Load and optimise an ONNX model with a fixed `[BATCH_ROWS, num_feats]`
/// input.
fn load_onnx_runner(path: &Path, num_feats: usize) -> Result<TypedRunnableModel<TypedModel>> {
    tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("Cannot load ONNX model: {}", path.display()))?
        .with_input_fact(0, f32::fact([BATCH_ROWS, num_feats]).into())
        .context("Cannot set ONNX input shape")?
        .into_optimized()
        .context("ONNX model optimisation failed")?
        .into_runnable()
        .context("Cannot make ONNX model runnable")
}

impl GeoModel {
    #[cfg(test)]
    pub fn native(params: ModelParams, net: FcNet) -> Self {
        Self {
            backend: Backend::Native(net),
            params,
        }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Probability of `class` for every row of `feats`.
    pub fn score_class(&self, feats: ArrayView2<f32>, class: usize) -> Result<Array1<f32>> {
        if feats.ncols() != self.params.num_feats {
            bail!(
                "Model expects {} input features, got {}",
                self.params.num_feats,
                feats.ncols()
            );
        }
        if class >= self.params.num_classes {
            bail!(
                "Class {class} out of range for a model with {} classes",
                self.params.num_classes
            );
        }

        let mut scores = Vec::with_capacity(feats.nrows());
        for (i, batch) in feats.axis_chunks_iter(Axis(0), BATCH_ROWS).enumerate() {
            debug!("Scoring batch {i} ({} rows)", batch.nrows());
            let batch_scores = match &self.backend {
                Backend::Native(net) => net.score_class(batch, class),
                Backend::Onnx(runner) => onnx_score_class(runner, batch, class)?,
            };
            scores.extend(batch_scores.iter().copied());
        }
        Ok(Array1::from(scores))
    }
}

fn onnx_score_class(
    runner: &TypedRunnableModel<TypedModel>,
    batch: ArrayView2<f32>,
    class: usize,
) -> Result<Array1<f32>> {
    let rows = batch.nrows();
    let n_feats = batch.ncols();

    // The graph has a fixed batch dimension; pad the tail batch with zeros.
    let mut buf = vec![0.0f32; BATCH_ROWS * n_feats];
    for (dst, src) in buf.chunks_mut(n_feats).zip(batch.rows()) {
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = *s;
        }
    }

    let input: Tensor = tract_ndarray::Array2::from_shape_vec((BATCH_ROWS, n_feats), buf)
        .context("Cannot reshape feature batch")?
        .into();
    let result = runner
        .run(tvec![input.into()])
        .context("ONNX inference failed")?;

    let output = result[0]
        .to_array_view::<f32>()
        .context("Cannot read output tensor")?
        .into_dimensionality::<tract_ndarray::Ix2>()
        .context("Expected a [batch, classes] output")?;
    if class >= output.ncols() {
        bail!("ONNX output has {} classes, asked for {class}", output.ncols());
    }

    Ok(output.column(class).iter().take(rows).copied().collect())
}

// ── native network ───────────────────────────────────────────────────────

impl FcNet {
    /// Load weights from an `.npz` state dict and check every shape
    /// against the manifest.
    pub fn load(path: &Path, params: &ModelParams) -> Result<Self> {
        let mut npz = NpzArchive::open(path)?;
        let names = npz.names();
        let has = |name: &str| names.iter().any(|n| n == name);

        let (feats, filts, classes) = (params.num_feats, params.num_filts, params.num_classes);

        let input = read_linear(&mut npz, "feats.0", filts, feats, true)?;
        let res_layers = (0..NUM_RES_LAYERS)
            .map(|i| -> Result<ResLayer> {
                let prefix = format!("feats.{}", FIRST_RES_INDEX + i);
                Ok(ResLayer {
                    w1: read_linear(&mut npz, &format!("{prefix}.w1"), filts, filts, true)?,
                    w2: read_linear(&mut npz, &format!("{prefix}.w2"), filts, filts, true)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let class_emb = read_linear(&mut npz, "class_emb", classes, filts, has("class_emb.bias"))?;

        // The user embedding only matters during training.
        if has("user_emb.weight") {
            let user_emb = npz.array2_f32("user_emb.weight")?;
            check_shape("user_emb.weight", user_emb.dim(), (params.num_users, filts))?;
        }

        info!(
            "Loaded native weights from {} ({} residual layers)",
            path.display(),
            res_layers.len()
        );
        Ok(Self {
            input,
            res_layers,
            class_emb,
        })
    }

    /// Location embedding (output of the trunk).
    pub fn features(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut h = self.input.forward(x).mapv(relu);
        for layer in &self.res_layers {
            h = layer.forward(h.view());
        }
        h
    }

    /// `sigmoid(features · class_emb[class])` for every row.
    pub fn score_class(&self, x: ArrayView2<f32>, class: usize) -> Array1<f32> {
        let emb = self.features(x);
        let mut logits = emb.dot(&self.class_emb.weight.row(class));
        if let Some(bias) = &self.class_emb.bias {
            logits += bias[class];
        }
        logits.mapv(sigmoid)
    }
}

impl Linear {
    fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut y = x.dot(&self.weight.t());
        if let Some(bias) = &self.bias {
            y += bias;
        }
        y
    }
}

impl ResLayer {
    /// `x + relu(w2(relu(w1(x))))`; dropout is inactive at inference.
    fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let y = self.w1.forward(x).mapv(relu);
        let y = self.w2.forward(y.view()).mapv(relu);
        &x + &y
    }
}

fn read_linear(
    npz: &mut NpzArchive,
    prefix: &str,
    out_dim: usize,
    in_dim: usize,
    with_bias: bool,
) -> Result<Linear> {
    let name = format!("{prefix}.weight");
    let weight = npz.array2_f32(&name)?;
    check_shape(&name, weight.dim(), (out_dim, in_dim))?;

    let bias = if with_bias {
        let name = format!("{prefix}.bias");
        let bias = npz.array1_f32(&name)?;
        if bias.len() != out_dim {
            bail!("{name}: expected {out_dim} values, found {}", bias.len());
        }
        Some(bias)
    } else {
        None
    };
    Ok(Linear { weight, bias })
}

fn check_shape(name: &str, found: (usize, usize), expected: (usize, usize)) -> Result<()> {
    if found != expected {
        bail!("{name}: expected shape {expected:?}, found {found:?}");
    }
    Ok(())
}

fn relu(x: f32) -> f32 {
    x.max(0.0)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
