//! Speed history store
//!
//! A flat CSV file with the header `date,download_speed,upload_speed` and one
//! row per speed test. Absent measurements are written as empty fields.

use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const HEADER: [&str; 3] = ["date", "download_speed", "upload_speed"];

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// One stored measurement, throughput in Mbit/s
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeedRecord {
    pub date: String,
    #[serde(rename = "download_speed")]
    pub download: Option<f64>,
    #[serde(rename = "upload_speed")]
    pub upload: Option<f64>,
}

impl SpeedRecord {
    pub fn new(date: impl Into<String>, download: Option<f64>, upload: Option<f64>) -> Self {
        Self {
            date: date.into(),
            download,
            upload,
        }
    }
}

fn format_speed(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Append-only CSV of speed records
#[derive(Debug, Clone)]
pub struct SpeedHistory {
    path: PathBuf,
}

impl SpeedHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, writing the header first if the file is new
    pub fn append(&self, record: &SpeedRecord) -> Result<(), HistoryError> {
        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer.write_record(HEADER)?;
        }
        let download = format_speed(record.download);
        let upload = format_speed(record.upload);
        writer.write_record([record.date.as_str(), download.as_str(), upload.as_str()])?;
        writer.flush()?;

        debug!("Stored speed record {:?} in {:?}", record, self.path);
        Ok(())
    }

    /// All stored records in insertion order.
    ///
    /// `Ok(None)` means there is nothing to show: no file, or no data rows.
    pub fn read_all(&self) -> Result<Option<Vec<SpeedRecord>>, HistoryError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;

        let mut records = Vec::new();
        for (i, row) in reader.deserialize::<SpeedRecord>().enumerate() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed history row {}: {}", i + 2, e),
            }
        }

        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(records))
        }
    }
}
