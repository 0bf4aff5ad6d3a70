//! Fixtures shared by the unit tests.

use std::path::{Path, PathBuf};

use ndarray::{array, Array2};

pub use geoprior_common::testutil::{npy_bytes, temp_dir, unicode_scalar_npy, write_npz};

use crate::manifest::ModelParams;

/// 4 inputs (no date features), 2 hidden units, 3 classes.
pub fn tiny_params() -> ModelParams {
    ModelParams {
        name: "tiny".into(),
        num_feats: 4,
        num_classes: 3,
        num_filts: 2,
        num_users: 1,
        device: "cpu".into(),
        use_date_feats: false,
        weights_file: "weights.npz".into(),
        onnx_file: None,
    }
}

/// Weights whose embedding is `[2 * relu(x0), 2]`:
/// the input layer keeps `x0` and a constant unit, the first residual
/// block doubles both, the rest are zero.  Class 0 reads unit 0,
/// class 1 nothing, class 2 reads the constant unit with weight -1.5.
pub fn write_tiny_weights(dir: &Path) -> PathBuf {
    let path = dir.join("weights.npz");
    let zeros = Array2::<f32>::zeros((2, 2));
    let identity = Array2::<f32>::eye(2);
    let zero_bias = array![0.0f32, 0.0];

    let mut entries = vec![
        ("feats.0.weight".to_string(), npy_bytes(&array![[1.0f32, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]])),
        ("feats.0.bias".to_string(), npy_bytes(&array![0.0f32, 1.0])),
    ];
    for i in 2..=5 {
        let w = if i == 2 { &identity } else { &zeros };
        for layer in ["w1", "w2"] {
            entries.push((format!("feats.{i}.{layer}.weight"), npy_bytes(w)));
            entries.push((format!("feats.{i}.{layer}.bias"), npy_bytes(&zero_bias)));
        }
    }
    entries.push((
        "class_emb.weight".to_string(),
        npy_bytes(&array![[1.0f32, 0.0], [0.0, 0.0], [0.0, -1.5]]),
    ));
    entries.push(("class_emb.bias".to_string(), npy_bytes(&array![0.0f32, 0.0, 0.0])));
    entries.push(("user_emb.weight".to_string(), npy_bytes(&Array2::<f32>::zeros((1, 2)))));

    let borrowed: Vec<(&str, Vec<u8>)> = entries
        .iter()
        .map(|(n, b)| (n.as_str(), b.clone()))
        .collect();
    write_npz(&path, &borrowed);
    path
}
