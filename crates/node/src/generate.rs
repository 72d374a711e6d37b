//! Writes a synthetic replay dataset for the hub's simulation mode.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

use crate::sim::{MOISTURE_DRY, MOISTURE_WET};

pub const DEFAULT_ROWS: usize = 100;
pub const DEFAULT_PATH: &str = "data/sample_data.csv";

/// One CSV row; field order is the header order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRecord {
    pub timestamp: String,
    pub soil_moisture: i64,
    pub temperature: f64,
    pub humidity: f64,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn uniform(lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * fastrand::f64()
}

/// `rows` independent readings one minute apart, starting at `start`.
pub fn generate_rows(rows: usize, start: OffsetDateTime) -> Result<Vec<DatasetRecord>> {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    (0..rows)
        .map(|i| -> Result<DatasetRecord> {
            let ts = start + Duration::minutes(i as i64);
            Ok(DatasetRecord {
                timestamp: ts.format(&fmt).context("format timestamp")?,
                soil_moisture: fastrand::i64(MOISTURE_DRY as i64..=MOISTURE_WET as i64),
                temperature: round2(uniform(20.0, 35.0)),
                humidity: round2(uniform(40.0, 90.0)),
            })
        })
        .collect()
}

/// Write `records` with a header row, creating parent directories.
pub fn write_csv(path: &Path, records: &[DatasetRecord]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    if records.is_empty() {
        wtr.write_record(["timestamp", "soil_moisture", "temperature", "humidity"])?;
    }
    for r in records {
        wtr.serialize(r)?;
    }
    wtr.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
