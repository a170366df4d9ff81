use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;

use crate::error::{ProfileError, Result};
use crate::model::SensorSlot;

pub const TIMESTAMP_COL: &str = "timestamp_utc";
pub const TIME_COL: &str = "time_s";
pub const ALT_COL: &str = "alt_m";
pub const ROLL_COL: &str = "roll_deg";
pub const PITCH_COL: &str = "pitch_deg";
pub const YAW_COL: &str = "yaw_deg";

const TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y%m%d_%H%M%S",
];

/// Column holding the raw reading of a thermo slot: `imet<n>_ohm` or `rh<n>_pct`.
pub fn raw_column(slot: SensorSlot) -> Option<String> {
    match slot {
        SensorSlot::Imet(n) => Some(format!("imet{n}_ohm")),
        SensorSlot::Rh(n) => Some(format!("rh{n}_pct")),
        SensorSlot::Wind => None,
    }
}

fn slot_of_column(name: &str) -> Option<SensorSlot> {
    let (prefix, expected) = if let Some(prefix) = name.strip_suffix("_ohm") {
        (prefix, "imet")
    } else if let Some(prefix) = name.strip_suffix("_pct") {
        (prefix, "rh")
    } else {
        return None;
    };
    SensorSlot::parse(prefix).filter(|slot| match slot {
        SensorSlot::Imet(_) => expected == "imet",
        SensorSlot::Rh(_) => expected == "rh",
        SensorSlot::Wind => false,
    })
}

fn parse_timestamp_micros(value: &str) -> Result<i64> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.timestamp_micros());
    }
    let naive = trimmed.trim_end_matches('Z');
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
        .map(|datetime| datetime.and_utc().timestamp_micros())
        .or_else(|| {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|seconds| seconds.is_finite())
                .map(|seconds| (seconds * 1_000_000.0).round() as i64)
        })
        .ok_or_else(|| ProfileError::InvalidTimestamp {
            value: trimmed.to_string(),
        })
}

fn timestamp_micros(column: &Column) -> Result<Vec<i64>> {
    let values: Vec<Option<i64>> = match column.dtype() {
        DataType::String => column
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|value| value.map(parse_timestamp_micros).transpose())
            .collect::<Result<_>>()?,
        DataType::Datetime(unit, _) => {
            let scale = |raw: i64| match unit {
                TimeUnit::Nanoseconds => raw / 1_000,
                TimeUnit::Microseconds => raw,
                TimeUnit::Milliseconds => raw * 1_000,
            };
            column
                .cast(&DataType::Int64)?
                .as_materialized_series()
                .i64()?
                .into_iter()
                .map(|value| value.map(scale))
                .collect()
        }
        _ => column
            .cast(&DataType::Float64)?
            .as_materialized_series()
            .f64()?
            .into_iter()
            .map(|value| value.map(|seconds| (seconds * 1_000_000.0).round() as i64))
            .collect(),
    };

    values
        .into_iter()
        .map(|value| {
            value.ok_or_else(|| ProfileError::InvalidTimestamp {
                value: "null".to_string(),
            })
        })
        .collect()
}

pub(crate) fn f64_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = frame
        .column(name)
        .map_err(|_| ProfileError::MissingColumn {
            column: name.to_string(),
        })?;
    Ok(column
        .cast(&DataType::Float64)?
        .as_materialized_series()
        .f64()?
        .into_iter()
        .collect())
}

/// One flight's raw series, sorted by time.
///
/// Required columns are `timestamp_utc` and `alt_m`. Attitude columns
/// (`roll_deg`, `pitch_deg`, `yaw_deg`) and slot columns (`imet<n>_ohm`,
/// `rh<n>_pct`) are optional.
#[derive(Debug, Clone)]
pub struct RawProfile {
    frame: DataFrame,
}

impl RawProfile {
    pub fn from_frame(frame: DataFrame) -> Result<Self> {
        if frame.height() == 0 {
            return Err(ProfileError::EmptyProfile);
        }
        for required in [TIMESTAMP_COL, ALT_COL] {
            if frame.column(required).is_err() {
                return Err(ProfileError::MissingColumn {
                    column: required.to_string(),
                });
            }
        }

        let micros = timestamp_micros(frame.column(TIMESTAMP_COL)?)?;
        let timestamps = Series::new(TIMESTAMP_COL.into(), micros).cast(&DataType::Datetime(
            TimeUnit::Microseconds,
            Some(TimeZone::UTC),
        ))?;

        let mut frame = frame;
        frame.with_column(timestamps)?;

        let numeric: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .filter(|name| {
                [ALT_COL, ROLL_COL, PITCH_COL, YAW_COL].contains(&name.as_str())
                    || slot_of_column(name).is_some()
            })
            .collect();
        for name in numeric {
            let cast = frame.column(&name)?.cast(&DataType::Float64)?;
            frame.with_column(cast)?;
        }

        let mut frame = frame.sort([TIMESTAMP_COL], SortMultipleOptions::default())?;

        let sorted = timestamp_micros(frame.column(TIMESTAMP_COL)?)?;
        let start = sorted.first().copied().unwrap_or_default();
        let elapsed: Vec<f64> = sorted
            .iter()
            .map(|micros| (micros - start) as f64 / 1_000_000.0)
            .collect();
        frame.with_column(Series::new(TIME_COL.into(), elapsed))?;

        Ok(Self { frame })
    }

    /// Reads a flight CSV with a header row.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;
        Self::from_frame(frame)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn timestamps_micros(&self) -> Result<Vec<i64>> {
        timestamp_micros(self.frame.column(TIMESTAMP_COL)?)
    }

    /// UTC calendar date of every sample.
    pub fn sample_dates(&self) -> Result<Vec<NaiveDate>> {
        self.timestamps_micros()?
            .into_iter()
            .map(|micros| {
                DateTime::from_timestamp_micros(micros)
                    .map(|datetime| datetime.date_naive())
                    .ok_or_else(|| ProfileError::InvalidTimestamp {
                        value: micros.to_string(),
                    })
            })
            .collect()
    }

    pub fn values(&self, column: &str) -> Result<Vec<Option<f64>>> {
        f64_values(&self.frame, column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.frame.column(column).is_ok()
    }

    pub fn has_attitude(&self) -> bool {
        [ROLL_COL, PITCH_COL, YAW_COL]
            .iter()
            .all(|column| self.has_column(column))
    }

    /// Thermo slots with a raw column, in slot order.
    pub fn thermo_slots(&self) -> Vec<SensorSlot> {
        let mut slots: Vec<SensorSlot> = self
            .frame
            .get_column_names()
            .iter()
            .filter_map(|name| slot_of_column(name.as_str()))
            .collect();
        slots.sort();
        slots
    }

    /// Rows `offset..offset + len`.
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        Self {
            frame: self.frame.slice(offset as i64, len),
        }
    }
}
