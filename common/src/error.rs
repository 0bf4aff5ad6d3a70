//! Typed errors that callers (and tests) need to tell apart.
//!
//! Everything else travels as `anyhow::Error` with context attached.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FigsError {
    /// A class id present in the predictions has no category entry.
    #[error("class id {0} not found in category table")]
    UnknownClass(usize),

    /// The prediction cache was produced for a different dataset/split.
    #[error(
        "expected predictions for {expected_dataset}/{expected_split}, \
         found {dataset}/{split}"
    )]
    DatasetMismatch {
        dataset: String,
        split: String,
        expected_dataset: String,
        expected_split: String,
    },

    /// An `.npy` entry uses a dtype this crate cannot convert.
    #[error("array '{name}' has unsupported dtype {descr}")]
    UnsupportedDtype { name: String, descr: String },
}
