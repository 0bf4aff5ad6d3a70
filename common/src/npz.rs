//! NumPy archive access – `.npz` (zip of `.npy` entries) and bare `.npy`.
//!
//! Numeric arrays are decoded with `ndarray-npy`, trying the dtypes the
//! evaluation scripts are known to write.  String scalars (`np.savez(...,
//! dataset='inat_2017')`) are stored as 0-d `<U`/`|S` arrays, which
//! `ndarray-npy` does not read, so their header is parsed here.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ndarray::{Array, Array1, Array2, Dimension, Ix1, Ix2};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement};
use tracing::debug;

use crate::error::FigsError;

/// `.npy` magic string.
const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// An opened `.npz` archive.
pub struct NpzArchive {
    archive: zip::ZipArchive<BufReader<File>>,
    path: PathBuf,
}

impl NpzArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
        let archive = zip::ZipArchive::new(BufReader::new(file))
            .with_context(|| format!("Not a valid npz archive: {}", path.display()))?;
        debug!("Opened {} ({} entries)", path.display(), archive.len());
        Ok(Self {
            archive,
            path: path.to_path_buf(),
        })
    }

    /// Array names, without the `.npy` suffix.
    pub fn names(&self) -> Vec<String> {
        self.archive
            .file_names()
            .map(|n| n.strip_suffix(".npy").unwrap_or(n).to_string())
            .collect()
    }

    /// Raw bytes of the `.npy` entry called `name`.
    fn entry_bytes(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry_name = format!("{name}.npy");
        let mut entry = self.archive.by_name(&entry_name).with_context(|| {
            format!("Array '{name}' missing from {}", self.path.display())
        })?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("Cannot read '{name}' from {}", self.path.display()))?;
        Ok(bytes)
    }

    /// A 1-D integer array converted to class ids.
    pub fn class_ids(&mut self, name: &str) -> Result<Vec<usize>> {
        let bytes = self.entry_bytes(name)?;
        decode_class_ids(name, &bytes)
    }

    /// A 0-d string array.
    pub fn string(&mut self, name: &str) -> Result<String> {
        let bytes = self.entry_bytes(name)?;
        decode_string(name, &bytes)
    }

    /// A 1-D float array, widened or narrowed to `f32`.
    pub fn array1_f32(&mut self, name: &str) -> Result<Array1<f32>> {
        let bytes = self.entry_bytes(name)?;
        decode_f32::<Ix1>(name, &bytes)
    }

    /// A 2-D float array, widened or narrowed to `f32`.
    pub fn array2_f32(&mut self, name: &str) -> Result<Array2<f32>> {
        let bytes = self.entry_bytes(name)?;
        decode_f32::<Ix2>(name, &bytes)
    }
}

/// Read a bare 2-D `.npy` file as `f32` (bool and integer masks included).
pub fn read_npy_2d(path: &Path) -> Result<Array2<f32>> {
    let bytes = std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    decode_f32::<Ix2>(&name, &bytes)
}

// ── decoding ─────────────────────────────────────────────────────────────

/// `Ok(None)` when the stored dtype is not `A`.
fn try_read<A: ReadableElement, D: Dimension>(bytes: &[u8]) -> Result<Option<Array<A, D>>> {
    match Array::<A, D>::read_npy(bytes) {
        Ok(a) => Ok(Some(a)),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn decode_f32<D: Dimension>(name: &str, bytes: &[u8]) -> Result<Array<f32, D>> {
    let ctx = || format!("Cannot decode array '{name}'");
    // Each dtype numpy may hand us, widened or narrowed to f32.
    macro_rules! widen {
        ($($ty:ty => $conv:expr),+ $(,)?) => {
            $(
                if let Some(a) = try_read::<$ty, D>(bytes).with_context(ctx)? {
                    return Ok(a.mapv($conv));
                }
            )+
        };
    }
    if let Some(a) = try_read::<f32, D>(bytes).with_context(ctx)? {
        return Ok(a);
    }
    widen!(
        f64 => |v: f64| v as f32,
        bool => |v: bool| if v { 1.0 } else { 0.0 },
        u8 => f32::from,
        i8 => f32::from,
        u16 => f32::from,
        i16 => f32::from,
        u32 => |v: u32| v as f32,
        i32 => |v: i32| v as f32,
        i64 => |v: i64| v as f32,
    );
    Err(unsupported(name, bytes))
}

fn decode_class_ids(name: &str, bytes: &[u8]) -> Result<Vec<usize>> {
    let ctx = || format!("Cannot decode array '{name}'");
    macro_rules! integer {
        ($($ty:ty),+) => {
            $(
                if let Some(a) = try_read::<$ty, Ix1>(bytes).with_context(ctx)? {
                    return a.iter().map(|&v| to_class_id(name, i64::from(v))).collect();
                }
            )+
        };
    }
    integer!(i64, i32, i16, u32, u16, u8);
    if let Some(a) = try_read::<u64, Ix1>(bytes).with_context(ctx)? {
        return Ok(a.iter().map(|&v| v as usize).collect());
    }
    Err(unsupported(name, bytes))
}

fn to_class_id(name: &str, v: i64) -> Result<usize> {
    usize::try_from(v).with_context(|| format!("Negative class id {v} in '{name}'"))
}

fn unsupported(name: &str, bytes: &[u8]) -> anyhow::Error {
    let descr = NpyHeader::parse(bytes)
        .map(|(h, _)| h.descr)
        .unwrap_or_else(|_| "<unreadable>".into());
    FigsError::UnsupportedDtype {
        name: name.to_string(),
        descr,
    }
    .into()
}

fn decode_string(name: &str, bytes: &[u8]) -> Result<String> {
    let (header, offset) =
        NpyHeader::parse(bytes).with_context(|| format!("Bad npy header in '{name}'"))?;
    if header.shape != "()" {
        bail!("'{name}' is not a scalar (shape {})", header.shape);
    }
    let data = &bytes[offset..];

    let (kind, width) = header.string_kind().ok_or_else(|| FigsError::UnsupportedDtype {
        name: name.to_string(),
        descr: header.descr.clone(),
    })?;

    let text = match kind {
        StringKind::Utf32 { big_endian } => {
            let needed = width * 4;
            if data.len() < needed {
                bail!("'{name}' truncated: need {needed} bytes, have {}", data.len());
            }
            data[..needed]
                .chunks_exact(4)
                .map(|c| {
                    let raw = [c[0], c[1], c[2], c[3]];
                    let code = if big_endian {
                        u32::from_be_bytes(raw)
                    } else {
                        u32::from_le_bytes(raw)
                    };
                    char::from_u32(code)
                        .with_context(|| format!("Invalid code point {code:#x} in '{name}'"))
                })
                .collect::<Result<String>>()?
        }
        StringKind::Bytes => {
            if data.len() < width {
                bail!("'{name}' truncated: need {width} bytes, have {}", data.len());
            }
            String::from_utf8(data[..width].to_vec())
                .with_context(|| format!("'{name}' is not valid UTF-8"))?
        }
    };

    Ok(text.trim_end_matches('\0').to_string())
}

// ── header ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct NpyHeader {
    descr: String,
    shape: String,
}

enum StringKind {
    Utf32 { big_endian: bool },
    Bytes,
}

impl NpyHeader {
    /// Parse the header and return it with the offset of the data block.
    fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
            bail!("missing npy magic");
        }
        let major = bytes[6];
        let (len, start) = match major {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    bail!("truncated npy header");
                }
                let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
                (len as usize, 12)
            }
            v => bail!("unsupported npy version {v}"),
        };
        let end = start + len;
        if bytes.len() < end {
            bail!("truncated npy header");
        }
        let text = std::str::from_utf8(&bytes[start..end]).context("npy header is not text")?;

        let descr = dict_value(text, "descr")
            .map(|v| v.trim_matches(|c| c == '\'' || c == '"').to_string())
            .context("npy header has no descr")?;
        let shape = dict_value(text, "shape")
            .map(|v| v.replace(' ', ""))
            .context("npy header has no shape")?;

        Ok((Self { descr, shape }, end))
    }

    /// String dtype and its width in characters.
    fn string_kind(&self) -> Option<(StringKind, usize)> {
        let (order, rest) = self.descr.split_at(1.min(self.descr.len()));
        let (code, width) = rest.split_at(1.min(rest.len()));
        let width: usize = width.parse().ok()?;
        match (order, code) {
            ("<" | "=" | "|", "U") => Some((StringKind::Utf32 { big_endian: false }, width)),
            (">", "U") => Some((StringKind::Utf32 { big_endian: true }, width)),
            ("|" | "<" | ">" | "=", "S") => Some((StringKind::Bytes, width)),
            _ => None,
        }
    }
}

/// Raw text of `key`'s value in the Python dict literal of a npy header.
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pat = format!("'{key}':");
    let rest = header[header.find(&pat)? + pat.len()..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find(',').or_else(|| rest.find('}'))?
    };
    Some(rest[..end].trim())
}
