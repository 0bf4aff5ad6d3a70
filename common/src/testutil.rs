//! `.npy`/`.npz` fixture writers shared by the unit tests of both crates.
//!
//! Compiled for this crate's own tests and, through the `test-util`
//! feature, for downstream dev-dependencies.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::{Array, Dimension};
use ndarray_npy::{WritableElement, WriteNpyExt};

/// Scratch directory `<tmp>/geoprior_test/<sub>`, created if absent.
pub fn temp_dir(sub: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("geoprior_test").join(sub);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn npy_bytes<A: WritableElement, D: Dimension>(arr: &Array<A, D>) -> Vec<u8> {
    let mut buf = Vec::new();
    arr.write_npy(&mut buf).unwrap();
    buf
}

/// Build a v1 `.npy` blob holding a 0-d unicode string.
pub fn unicode_scalar_npy(text: &str) -> Vec<u8> {
    let width = text.chars().count();
    let mut header = format!("{{'descr': '<U{width}', 'fortran_order': False, 'shape': (), }}");
    // Pad so that magic + version + len + header is a multiple of 64.
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut out = Vec::new();
    out.extend_from_slice(b"\x93NUMPY");
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for c in text.chars() {
        out.extend_from_slice(&(c as u32).to_le_bytes());
    }
    out
}

/// Write `(name, npy bytes)` pairs into an uncompressed `.npz`.
pub fn write_npz(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, bytes) in entries {
        zip.start_file(format!("{name}.npy"), options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}
