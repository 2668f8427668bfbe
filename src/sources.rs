//! Signal sources: where raw records come from.
//!
//! A source only loads records; all field interpretation belongs to the
//! normalizer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::AppError;
use crate::models::{RawRecord, SourceKind};

#[async_trait]
pub trait SignalSource: Send + Sync {
    /// The source type the records belong to.
    fn kind(&self) -> SourceKind;

    /// Loads every raw record.
    async fn load(&self) -> Result<Vec<RawRecord>, AppError>;
}

/// Records held in memory.
#[derive(Debug, Clone)]
pub struct StaticSource {
    kind: SourceKind,
    records: Vec<RawRecord>,
}

impl StaticSource {
    pub fn new(kind: SourceKind, records: Vec<RawRecord>) -> Self {
        Self { kind, records }
    }
}

#[async_trait]
impl SignalSource for StaticSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn load(&self) -> Result<Vec<RawRecord>, AppError> {
        Ok(self.records.clone())
    }
}

/// On-disk encoding of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// One array of objects, or one object per line.
    Json,
    /// A header row naming the fields, then one record per row.
    Csv,
}

impl FileFormat {
    /// Chosen by extension; anything but `.csv` is read as JSON.
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => FileFormat::Csv,
            _ => FileFormat::Json,
        }
    }
}

/// A JSON or CSV file of raw records for one source.
#[derive(Debug, Clone)]
pub struct FileSource {
    kind: SourceKind,
    path: PathBuf,
    format: FileFormat,
}

impl FileSource {
    pub fn new(kind: SourceKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            kind,
            format: FileFormat::of(&path),
            path,
        }
    }

    /// Paths tried for `kind` under `dir`, in order:
    /// `dir/cves.json`, `dir/cves.csv`, then the per-source directory
    /// layout `dir/cves/cves.csv` (`dir/logs/log_events.csv` for logs).
    pub fn candidates(kind: SourceKind, dir: &Path) -> [PathBuf; 3] {
        let name = kind.as_str();
        let nested = match kind {
            SourceKind::Logs => "log_events",
            _ => name,
        };
        [
            dir.join(format!("{}.json", name)),
            dir.join(format!("{}.csv", name)),
            dir.join(name).join(format!("{}.csv", nested)),
        ]
    }

    /// One source per kind, from the first candidate file present in `dir`.
    pub fn discover(dir: &Path) -> Vec<Self> {
        SourceKind::ALL
            .into_iter()
            .filter_map(|kind| {
                Self::candidates(kind, dir)
                    .into_iter()
                    .find(|path| path.is_file())
                    .map(|path| Self::new(kind, path))
            })
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    fn error(&self, message: impl Into<String>) -> AppError {
        AppError::SourceLoad {
            origin: self.path.display().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl SignalSource for FileSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn load(&self) -> Result<Vec<RawRecord>, AppError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.error(e.to_string()))?;
        let records = match self.format {
            FileFormat::Json => parse_records(&content),
            FileFormat::Csv => parse_csv_records(&content),
        }
        .map_err(|e| self.error(e))?;
        tracing::debug!(
            source = %self.kind,
            path = %self.path.display(),
            format = ?self.format,
            records = records.len(),
            "Loaded source file"
        );
        Ok(records)
    }
}

/// Parses CSV with a header row into records of string fields.
///
/// Empty cells are left out, so they read as missing rather than blank.
pub fn parse_csv_records(content: &str) -> Result<Vec<RawRecord>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| format!("invalid CSV header: {}", e))?
        .clone();

    let mut records = Vec::new();
    for (n, row) in reader.records().enumerate() {
        // Row 1 is the header
        let row = row.map_err(|e| format!("row {}: {}", n + 2, e))?;
        let record: RawRecord = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(field, cell)| (field.to_string(), JsonValue::String(cell.to_string())))
            .collect();
        records.push(record);
    }
    Ok(records)
}

/// Parses a JSON array of objects, or JSON lines.
///
/// Array elements that are not objects are kept as empty records so the
/// normalizer reports them against their position.
pub fn parse_records(content: &str) -> Result<Vec<RawRecord>, String> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let values: Vec<JsonValue> =
            serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON array: {}", e))?;
        return Ok(values.into_iter().map(into_record).collect());
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<JsonValue>(line)
                .map(into_record)
                .map_err(|e| format!("line {}: {}", n + 1, e))
        })
        .collect()
}

fn into_record(value: JsonValue) -> RawRecord {
    match value {
        JsonValue::Object(map) => map,
        _ => RawRecord::new(),
    }
}
