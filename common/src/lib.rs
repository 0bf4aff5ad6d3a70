//! Shared loaders for the geo-prior figure pipeline: configuration,
//! NumPy archives, cached predictions and category names.

pub mod categories;
pub mod config;
pub mod error;
pub mod npz;
pub mod predictions;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;
