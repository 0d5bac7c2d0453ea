//! # Review table
//!
//! The output of a review session is a CSV file with one row per viewed
//! slice:
//!
//! ```text
//! key,phonetic_id,series,slice_number,rating,viewed,first_viewed_at,last_updated_at
//! p1_sax_slice_0,p1,sax,0,2,True,2024-05-01T09:00:00,2024-05-01T09:00:04
//! ```
//!
//! The file is rewritten in full after every mutating event. Writes go to
//! `<name>.tmp` beside the target, are fsynced, then renamed over the
//! target, so a crash never leaves a truncated table at the visible path.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::catalog::SliceKey;
use crate::error::{Error, MalformedRowError, Result};
use crate::record::{Rating, ReviewRecord, ReviewStore, Timestamp, TIMESTAMP_FORMAT};

/// Column order of the table.
pub const COLUMNS: [&str; 8] = [
    "key",
    "phonetic_id",
    "series",
    "slice_number",
    "rating",
    "viewed",
    "first_viewed_at",
    "last_updated_at",
];

/// Destination for write-through saves.
pub trait ReviewSink {
    /// Replaces the persisted table with the viewed records of `store`.
    fn save(&mut self, store: &ReviewStore) -> Result<()>;
}

/// Result of a best-effort load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub records: Vec<(SliceKey, ReviewRecord)>,
    /// Rows that were skipped.
    pub rejected: Vec<MalformedRowError>,
    /// Rows that were kept but had cells that were ignored or inconsistent.
    pub warnings: Vec<MalformedRowError>,
}

/// A review table on disk.
#[derive(Debug, Clone)]
pub struct CsvTable {
    path: PathBuf,
}

impl CsvTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Reads an existing table. Bad rows are collected in the report and
    /// skipped; only a missing `key` column or an I/O failure aborts.
    pub fn load(&self) -> Result<LoadReport> {
        let file = File::open(&self.path).map_err(|e| Error::io("open review table", &self.path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|source| Error::Csv {
                path: self.path.clone(),
                source,
            })?
            .clone();
        let columns = ColumnIndex::new(&headers);
        if columns.key.is_none() {
            return Err(Error::Table {
                path: self.path.clone(),
                reason: "missing `key` column".to_string(),
            });
        }

        let mut report = LoadReport::default();
        let mut seen: HashMap<String, u64> = HashMap::new();

        for (n, result) in reader.records().enumerate() {
            // Header is line 1.
            let fallback_line = n as u64 + 2;
            let record = match result {
                Ok(record) => record,
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(Error::Csv {
                        path: self.path.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    let line = e.position().map_or(fallback_line, |p| p.line());
                    report.rejected.push(MalformedRowError {
                        line,
                        key: None,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let line = record.position().map_or(fallback_line, |p| p.line());

            match parse_row(&columns, &record) {
                Ok((key, review, notes)) => {
                    if let Some(first) = seen.get(key.as_str()) {
                        report.rejected.push(MalformedRowError {
                            line,
                            key: Some(key.to_string()),
                            reason: format!("duplicate key (first seen on line {first})"),
                        });
                        continue;
                    }
                    seen.insert(key.to_string(), line);
                    report.warnings.extend(notes.into_iter().map(|reason| MalformedRowError {
                        line,
                        key: Some(key.to_string()),
                        reason,
                    }));
                    report.records.push((key, review));
                }
                Err(reason) => {
                    let key = columns.get(&record, columns.key).map(str::to_string);
                    report.rejected.push(MalformedRowError { line, key, reason });
                }
            }
        }

        for row in &report.warnings {
            warn!("{}: loaded row {}", self.path.display(), row);
        }
        for row in &report.rejected {
            warn!("{}: skipped row {}", self.path.display(), row);
        }
        debug!(
            "loaded {} review rows from {} ({} rejected, {} with warnings)",
            report.records.len(),
            self.path.display(),
            report.rejected.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Overwrites the table with every viewed record of `store`.
    pub fn save_store(&self, store: &ReviewStore) -> Result<()> {
        self.save_rows(store.viewed())
    }

    /// Overwrites the table with `rows`; unviewed rows are skipped.
    pub fn save_rows<'a, I>(&self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a SliceKey, &'a ReviewRecord)>,
    {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
        }

        let tmp_path = self.tmp_path();
        let written = match self.write_tmp(&tmp_path, rows) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::io("replace review table", &self.path, e));
        }

        debug!("saved {} review rows to {}", written, self.path.display());
        Ok(())
    }

    fn write_tmp<'a, I>(&self, tmp_path: &Path, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a SliceKey, &'a ReviewRecord)>,
    {
        let csv_err = |source: csv::Error| Error::Csv {
            path: tmp_path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)
            .map_err(|e| Error::io("create temporary table", tmp_path, e))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(COLUMNS).map_err(csv_err)?;

        let mut written = 0;
        for (key, record) in rows {
            let (Some(first), Some(last)) = (record.first_viewed_at, record.last_updated_at) else {
                continue;
            };
            let slice_number = key.slice_number().to_string();
            let rating = record.rating.map(|r| r.to_string()).unwrap_or_default();
            let first = first.format(TIMESTAMP_FORMAT).to_string();
            let last = last.format(TIMESTAMP_FORMAT).to_string();
            writer
                .write_record([
                    key.as_str(),
                    key.phonetic_id(),
                    key.series(),
                    slice_number.as_str(),
                    rating.as_str(),
                    "True",
                    first.as_str(),
                    last.as_str(),
                ])
                .map_err(csv_err)?;
            written += 1;
        }

        let file = writer
            .into_inner()
            .map_err(|e| Error::io("flush temporary table", tmp_path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| Error::io("sync temporary table", tmp_path, e))?;
        Ok(written)
    }
}

impl ReviewSink for CsvTable {
    fn save(&mut self, store: &ReviewStore) -> Result<()> {
        self.save_store(store)
    }
}

/// Header positions, looked up by name so older tables with reordered or
/// missing columns still load.
struct ColumnIndex {
    key: Option<usize>,
    phonetic_id: Option<usize>,
    series: Option<usize>,
    slice_number: Option<usize>,
    rating: Option<usize>,
    viewed: Option<usize>,
    first_viewed_at: Option<usize>,
    last_updated_at: Option<usize>,
}

impl ColumnIndex {
    fn new(headers: &csv::StringRecord) -> Self {
        let find = |name: &str| headers.iter().position(|h| h == name);
        Self {
            key: find("key"),
            phonetic_id: find("phonetic_id"),
            series: find("series"),
            slice_number: find("slice_number"),
            rating: find("rating"),
            viewed: find("viewed"),
            first_viewed_at: find("first_viewed_at"),
            last_updated_at: find("last_updated_at"),
        }
    }

    /// Non-empty cell, if the column exists.
    fn get<'r>(&self, record: &'r csv::StringRecord, column: Option<usize>) -> Option<&'r str> {
        column.and_then(|i| record.get(i)).filter(|v| !v.is_empty())
    }
}

/// Parsed row plus notes about cells that were ignored.
type ParsedRow = (SliceKey, ReviewRecord, Vec<String>);

// `key` is authoritative: the split columns are rederived from it, and
// earlier tools split phonetic_id/series at a different underscore.
fn parse_row(columns: &ColumnIndex, record: &csv::StringRecord) -> std::result::Result<ParsedRow, String> {
    let raw_key = columns.get(record, columns.key).ok_or("missing key")?;
    let key = SliceKey::parse(raw_key).ok_or_else(|| format!("malformed key {raw_key:?}"))?;
    let mut notes = Vec::new();

    if let Some(v) = columns.get(record, columns.phonetic_id) {
        if v != key.phonetic_id() {
            notes.push(format!("phonetic_id {v:?} differs from key, using {:?}", key.phonetic_id()));
        }
    }
    if let Some(v) = columns.get(record, columns.series) {
        if v != key.series() {
            notes.push(format!("series {v:?} differs from key, using {:?}", key.series()));
        }
    }
    if let Some(v) = columns.get(record, columns.slice_number) {
        if parse_integral(v).and_then(|n| u64::try_from(n).ok()) != Some(key.slice_number()) {
            notes.push(format!("slice_number {v:?} differs from key, using {}", key.slice_number()));
        }
    }

    let viewed = columns.get(record, columns.viewed).ok_or("missing viewed")?;
    match parse_bool(viewed) {
        Some(true) => {}
        Some(false) => return Err("row is not viewed".to_string()),
        None => return Err(format!("invalid viewed value {viewed:?}")),
    }

    let rating = match columns.get(record, columns.rating) {
        None => None,
        Some(v) => {
            let n = parse_integral(v).ok_or_else(|| format!("invalid rating {v:?}"))?;
            Some(Rating::new(n).map_err(|e| e.to_string())?)
        }
    };

    let first = columns
        .get(record, columns.first_viewed_at)
        .ok_or("missing first_viewed_at")?;
    let last = columns
        .get(record, columns.last_updated_at)
        .ok_or("missing last_updated_at")?;
    let first = parse_timestamp(first)?;
    let last = parse_timestamp(last)?;
    if last < first {
        notes.push(format!(
            "last_updated_at {} is before first_viewed_at {}",
            last.format(TIMESTAMP_FORMAT),
            first.format(TIMESTAMP_FORMAT)
        ));
    }

    Ok((
        key,
        ReviewRecord {
            rating,
            first_viewed_at: Some(first),
            last_updated_at: Some(last),
        },
        notes,
    ))
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Accepts `2` and also `2.0`, which spreadsheet exports produce.
fn parse_integral(v: &str) -> Option<i64> {
    if let Ok(n) = v.parse::<i64>() {
        return Some(n);
    }
    let (whole, frac) = v.split_once('.')?;
    if !frac.is_empty() && frac.bytes().all(|b| b == b'0') {
        whole.parse().ok()
    } else {
        None
    }
}

fn parse_timestamp(v: &str) -> std::result::Result<Timestamp, String> {
    Timestamp::parse_from_str(v, "%Y-%m-%dT%H:%M:%S%.f").map_err(|e| format!("invalid timestamp {v:?}: {e}"))
}
