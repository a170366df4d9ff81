use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{applicable, parse_date, PlatformId, ScoopId};

/// Every field a header or flight metadata file may carry.
pub const KNOWN_FIELDS: [&str; 29] = [
    "timestamp",
    "date_utc",
    "checklist_operator",
    "location",
    "PIC",
    "objective",
    "authorization_type",
    "platform_id",
    "max_planned_alt",
    "battery_id",
    "scoop_id",
    "battery_voltage_initial",
    "launch_time_utc",
    "max_achieved_alt",
    "land_time_utc",
    "battery_voltage_final",
    "emergency_landing",
    "emergency_remarks",
    "private_remarks",
    "region",
    "cloud",
    "rain",
    "wind_from_direction",
    "wind_speed",
    "wind_speed_of_gust",
    "surface_altitude",
    "remarks",
    "variables",
    "platform_name",
];

/// Fields released with published profiles.
pub const PUBLIC_FIELDS: [&str; 17] = [
    "date_utc",
    "region",
    "location",
    "objective",
    "cloud",
    "rain",
    "wind_from_direction",
    "wind_speed",
    "wind_speed_of_gust",
    "surface_altitude",
    "launch_time_utc",
    "max_achieved_alt",
    "land_time_utc",
    "remarks",
    "variables",
    "platform_id",
    "platform_name",
];

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("cannot open metadata file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse metadata file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("cannot write metadata file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("metadata file {path} has a header but no data row")]
    MissingDataRow { path: PathBuf },
}

/// Flattened header and flight metadata. Blank and `na` cells are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightMeta {
    fields: BTreeMap<String, String>,
}

impl FlightMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the header file then the flight file; the flight file wins on
    /// conflicts.
    pub fn from_files(header: Option<&Path>, flight: Option<&Path>) -> Result<Self, MetaError> {
        let mut meta = Self::new();
        for path in [header, flight].into_iter().flatten() {
            meta.read_file(path)?;
        }
        Ok(meta)
    }

    pub fn read_file(&mut self, path: &Path) -> Result<(), MetaError> {
        let file = File::open(path).map_err(|source| MetaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file);
        let csv_error = |source: csv::Error| MetaError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let headers = reader.headers().map_err(csv_error)?.clone();
        let record = reader
            .records()
            .next()
            .ok_or_else(|| MetaError::MissingDataRow {
                path: path.to_path_buf(),
            })?
            .map_err(csv_error)?;

        for (column, value) in headers.iter().zip(record.iter()) {
            if !KNOWN_FIELDS.contains(&column) {
                debug!(column, path = %path.display(), "ignoring unknown metadata column");
                continue;
            }
            self.set(column, value);
        }
        Ok(())
    }

    /// Stores `value` under `field`, logging when it replaces an earlier one.
    pub fn set(&mut self, field: &str, value: &str) {
        let Some(value) = applicable(value) else {
            return;
        };
        if let Some(previous) = self.fields.get(field).filter(|previous| *previous != value) {
            info!(field, previous = %previous, replacement = value, "replacing metadata value");
        }
        self.fields.insert(field.to_string(), value.to_string());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn platform_id(&self) -> Option<PlatformId> {
        self.get("platform_id")?.parse().ok()
    }

    pub fn scoop_id(&self) -> Option<ScoopId> {
        self.get("scoop_id").map(ScoopId::new)
    }

    pub fn platform_name(&self) -> Option<&str> {
        self.get("platform_name")
    }

    /// UTC date of the flight, from `date_utc` or else the date part of
    /// `timestamp`.
    pub fn flight_date(&self) -> Option<NaiveDate> {
        if let Some(date) = self.get("date_utc").and_then(parse_date) {
            return Some(date);
        }
        let timestamp = self.get("timestamp")?;
        ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y%m%d_%H%M%S"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(timestamp, format).ok())
            .map(|datetime| datetime.date())
            .or_else(|| timestamp.get(..10).and_then(parse_date))
    }

    /// Keeps only the fields on which both metadata sets agree.
    pub fn combine(&self, other: &FlightMeta) -> FlightMeta {
        let fields = self
            .fields
            .iter()
            .filter(|(key, value)| other.fields.get(*key) == Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        FlightMeta { fields }
    }

    pub fn public_fields(&self) -> BTreeMap<&'static str, &str> {
        PUBLIC_FIELDS
            .iter()
            .filter_map(|field| self.get(field).map(|value| (*field, value)))
            .collect()
    }

    /// Writes the public subset as a two-row CSV (header, values) in
    /// `PUBLIC_FIELDS` order. Absent fields are left out.
    pub fn write_public_csv(&self, path: &Path) -> Result<(), MetaError> {
        let write_error = |source: csv::Error| MetaError::Write {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = Writer::from_path(path).map_err(write_error)?;
        let public: Vec<(&str, &str)> = PUBLIC_FIELDS
            .iter()
            .filter_map(|field| self.get(field).map(|value| (*field, value)))
            .collect();

        writer
            .write_record(public.iter().map(|(field, _)| *field))
            .map_err(write_error)?;
        writer
            .write_record(public.iter().map(|(_, value)| *value))
            .map_err(write_error)?;
        writer.flush().map_err(|source| MetaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), fields = public.len(), "wrote public metadata");
        Ok(())
    }
}

impl<K: Into<String>, V: AsRef<str>> FromIterator<(K, V)> for FlightMeta {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut meta = FlightMeta::new();
        for (field, value) in iter {
            let field = field.into();
            meta.set(&field, value.as_ref());
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_keeps_agreeing_fields_only() {
        let first: FlightMeta = [("location", "KAEFS"), ("cloud", "20"), ("PIC", "ops1")]
            .into_iter()
            .collect();
        let second: FlightMeta = [("location", "KAEFS"), ("cloud", "40")]
            .into_iter()
            .collect();

        let combined = first.combine(&second);
        assert_eq!(combined.get("location"), Some("KAEFS"));
        assert_eq!(combined.get("cloud"), None);
        assert_eq!(combined.get("PIC"), None);
    }

    #[test]
    fn flight_date_falls_back_to_timestamp() {
        let meta: FlightMeta = [("timestamp", "2020-01-09 14:03:00")].into_iter().collect();
        assert_eq!(meta.flight_date(), NaiveDate::from_ymd_opt(2020, 1, 9));

        let meta: FlightMeta = [("date_utc", "20200108"), ("timestamp", "2020-01-09 14:03:00")]
            .into_iter()
            .collect();
        assert_eq!(meta.flight_date(), NaiveDate::from_ymd_opt(2020, 1, 8));
    }

    #[test]
    fn public_csv_holds_only_public_fields() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("meta.csv");
        let meta: FlightMeta = [
            ("location", "KAEFS"),
            ("PIC", "ops1"),
            ("platform_id", "2"),
            ("remarks", "gusty, light rain"),
        ]
        .into_iter()
        .collect();

        meta.write_public_csv(&path).expect("write public metadata");

        let written = std::fs::read_to_string(&path).expect("read back");
        assert!(!written.contains("PIC"));
        assert!(written.contains("\"gusty, light rain\""));

        let reread = FlightMeta::from_files(Some(&path), None).expect("reread");
        assert_eq!(reread.get("location"), Some("KAEFS"));
        assert_eq!(reread.get("remarks"), Some("gusty, light rain"));
        assert_eq!(reread.platform_id(), Some(2));
        assert_eq!(reread.get("PIC"), None);
        assert_eq!(reread.fields().len(), meta.public_fields().len());
    }

    #[test]
    fn na_values_are_absent() {
        let meta: FlightMeta = [("scoop_id", "na"), ("platform_id", "3")].into_iter().collect();
        assert_eq!(meta.scoop_id(), None);
        assert_eq!(meta.platform_id(), Some(3));
    }
}
