use serde::Deserialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A `rows × cols × timepoints` slice, flattened in (row, col, time) order.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceArray {
    rows: usize,
    cols: usize,
    timepoints: usize,
    data: Vec<f32>,
}

impl SliceArray {
    pub fn new(shape: [usize; 3], data: Vec<f32>) -> Result<Self> {
        let [rows, cols, timepoints] = shape;
        if rows == 0 || cols == 0 || timepoints == 0 {
            return Err(Error::Source(format!("empty dimension in shape {shape:?}")));
        }
        let expected = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(timepoints))
            .ok_or_else(|| Error::Source(format!("shape {shape:?} is too large")))?;
        if data.len() != expected {
            return Err(Error::Source(format!(
                "shape {shape:?} needs {expected} values, found {}",
                data.len()
            )));
        }
        Ok(Self {
            rows,
            cols,
            timepoints,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn timepoints(&self) -> usize {
        self.timepoints
    }

    pub fn value(&self, row: usize, col: usize, t: usize) -> f32 {
        self.data[(row * self.cols + col) * self.timepoints + t]
    }

    /// Frame `t` as 8-bit gray, row-major. Scaling uses the min/max of the
    /// whole array so brightness does not flicker during playback.
    pub fn gray_frame(&self, t: usize) -> Vec<u8> {
        let t = t.min(self.timepoints - 1);
        let (lo, hi) = self
            .data
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let span = hi - lo;

        let mut frame = Vec::with_capacity(self.rows * self.cols);
        for row in 0..self.rows {
            for col in 0..self.cols {
                let v = self.value(row, col, t);
                let level = if span > 0.0 && v.is_finite() {
                    ((v - lo) / span * 255.0).round() as u8
                } else {
                    0
                };
                frame.push(level);
            }
        }
        frame
    }
}

/// The array container a review session reads from.
pub trait SliceSource {
    /// Every dataset key in the container.
    fn list_keys(&self) -> Result<Vec<String>>;

    fn read_slice(&self, key: &str) -> Result<SliceArray>;
}

#[derive(Deserialize)]
struct SliceFile {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// A directory tree of `*.json` datasets. A dataset's key is its path below
/// the root without the extension, with `/` between components.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Source(format!("{} is not a directory", root.display())));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in key.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(Error::Source(format!("bad key {key:?}")));
            }
            path.push(part);
        }
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".json");
        Ok(path.with_file_name(name))
    }

    fn collect(&self, dir: &Path, prefix: &str, keys: &mut Vec<String>) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|e| Error::io("read container directory", dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("read container directory", dir, e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.is_dir() {
                self.collect(&path, &format!("{prefix}{name}/"), keys)?;
            } else if let Some(stem) = name.strip_suffix(".json") {
                keys.push(format!("{prefix}{stem}"));
            }
        }
        Ok(())
    }
}

impl SliceSource for JsonDirSource {
    fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect(&self.root, "", &mut keys)?;
        keys.sort();
        Ok(keys)
    }

    fn read_slice(&self, key: &str) -> Result<SliceArray> {
        let path = self.path_for(key)?;
        let file = File::open(&path).map_err(|e| Error::io("open dataset", &path, e))?;
        let parsed: SliceFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Source(format!("failed to parse {}: {}", path.display(), e)))?;
        let shape: [usize; 3] = parsed.shape.as_slice().try_into().map_err(|_| {
            Error::Source(format!(
                "dataset {key} is not 3D (rows, cols, timepoints): shape={:?}",
                parsed.shape
            ))
        })?;
        SliceArray::new(shape, parsed.data)
    }
}
