//! Recorded sensor datasets replayed by the simulation engine.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{HubError, HubResult};

/// Moisture assumed for every row of a dataset with no `soil_moisture` column.
pub const DEFAULT_ROW_MOISTURE: f64 = 500.0;

/// One CSV row. Unknown columns are ignored; empty cells become `None`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatasetRow {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub soil_moisture: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

impl DatasetRow {
    /// `None` for an empty or NaN cell: there is no reading to act on.
    pub fn moisture(&self) -> Option<f64> {
        self.soil_moisture.filter(|m| !m.is_nan())
    }
}

/// Where the engine loads its rows from on every `start()`.
pub trait DatasetSource: Send + Sync {
    fn load(&self) -> HubResult<Vec<DatasetRow>>;

    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;
}

pub struct CsvDataset {
    path: PathBuf,
}

impl CsvDataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetSource for CsvDataset {
    fn load(&self) -> HubResult<Vec<DatasetRow>> {
        if !self.path.is_file() {
            return Err(HubError::NotFound(format!(
                "CSV not found at {}",
                self.path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let has_moisture = reader.headers()?.iter().any(|h| h == "soil_moisture");

        let mut rows = reader
            .deserialize::<DatasetRow>()
            .collect::<Result<Vec<_>, _>>()?;
        if !has_moisture {
            for row in &mut rows {
                row.soil_moisture = Some(DEFAULT_ROW_MOISTURE);
            }
        }
        Ok(rows)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_rows_in_file_order() {
        let f = csv_file(
            "timestamp,soil_moisture,temperature,humidity\n\
             2024-01-01 00:00:00,300,25.1,60.2\n\
             2024-01-01 00:01:00,600,26.0,58.9\n",
        );
        let rows = CsvDataset::new(f.path()).load().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, "2024-01-01 00:00:00");
        assert_eq!(rows[0].moisture(), Some(300.0));
        assert_eq!(rows[1].temperature, Some(26.0));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = CsvDataset::new("/definitely/not/here.csv").load().unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)), "got {err:?}");
        assert!(err.to_string().contains("CSV not found"));
    }

    #[test]
    fn extra_columns_are_ignored() {
        let f = csv_file(
            "timestamp,soil_moisture,temperature,humidity,pump_status\n\
             2024-01-01 00:00:00,450,20,40,1\n",
        );
        let rows = CsvDataset::new(f.path()).load().unwrap();
        assert_eq!(rows[0].moisture(), Some(450.0));
    }

    #[test]
    fn empty_or_nan_moisture_is_no_reading() {
        let f = csv_file(
            "timestamp,soil_moisture,temperature,humidity\n\
             2024-01-01 00:00:00,,20,40\n\
             2024-01-01 00:01:00,NaN,20,40\n",
        );
        let rows = CsvDataset::new(f.path()).load().unwrap();
        assert_eq!(rows[0].soil_moisture, None);
        assert_eq!(rows[0].moisture(), None);
        assert!(rows[1].soil_moisture.unwrap().is_nan());
        assert_eq!(rows[1].moisture(), None);
    }

    #[test]
    fn missing_moisture_column_uses_default() {
        let f = csv_file(
            "timestamp,temperature,humidity\n\
             2024-01-01 00:00:00,20,40\n\
             2024-01-01 00:01:00,21,41\n",
        );
        let rows = CsvDataset::new(f.path()).load().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|r| r.moisture() == Some(DEFAULT_ROW_MOISTURE)));
    }

    #[test]
    fn header_only_file_is_empty_dataset() {
        let f = csv_file("timestamp,soil_moisture,temperature,humidity\n");
        assert!(CsvDataset::new(f.path()).load().unwrap().is_empty());
    }

    #[test]
    fn non_numeric_moisture_is_dataset_error() {
        let f = csv_file(
            "timestamp,soil_moisture,temperature,humidity\n\
             2024-01-01 00:00:00,soggy,20,40\n",
        );
        let err = CsvDataset::new(f.path()).load().unwrap_err();
        assert!(matches!(err, HubError::Dataset(_)), "got {err:?}");
    }
}
