use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::MalformedRecord;
use crate::model::{
    applicable, parse_date, Coefficient, Coefficients, Equation, PlatformId, PlatformMapping,
    ScoopAssignment, ScoopId, SensorRecord, SensorSlot, SensorStatus, SensorType, SerialNumber,
};

pub const COPTER_FILE: &str = "copterID.csv";
pub const MASTER_COEF_FILE: &str = "MasterCoefList.csv";

pub const MASTER_COEF_COLUMNS: [&str; 10] = [
    "SensorType",
    "SerialNumber",
    "ScoopID",
    "Equation",
    "A",
    "B",
    "C",
    "D",
    "Offset",
    "SensorStatus",
];

/// Optional trailing column carrying the decision date of a coefficient version.
pub const VALID_FROM_COLUMN: &str = "ValidFrom";

pub fn scoop_file_name(scoop_id: &ScoopId) -> String {
    format!("scoop{}.csv", scoop_id.as_str())
}

/// Backend-neutral view of one table row: ordered `(column, value)` pairs.
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.fields.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, column: &str) -> Result<&str, String> {
        self.get(column)
            .ok_or_else(|| format!("missing required column {column}"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (column, value) in iter {
            row.push(column, value);
        }
        row
    }
}

pub fn platform_from_row(row: &RawRow) -> Result<PlatformMapping, String> {
    let id_text = row.required("platformId")?.trim();
    let platform_id: PlatformId = id_text
        .parse()
        .map_err(|_| format!("platform id '{id_text}' is not an integer"))?;
    let platform_name = applicable(row.required("name")?)
        .ok_or_else(|| format!("platform {platform_id} has no name"))?
        .to_string();
    let scoop_id = row.get("scoopId").and_then(applicable).map(ScoopId::new);

    Ok(PlatformMapping {
        platform_id,
        platform_name,
        scoop_id,
    })
}

pub fn assignment_from_row(scoop_id: &ScoopId, row: &RawRow) -> Result<ScoopAssignment, String> {
    let valid_from_text = row.required("validFrom")?;
    let valid_from = parse_date(valid_from_text)
        .ok_or_else(|| format!("validFrom '{}' is not a date", valid_from_text.trim()))?;

    let mut serials = BTreeMap::new();
    let mut engineer = None;
    for (column, value) in row.iter() {
        if column.eq_ignore_ascii_case("validFrom") {
            continue;
        }
        if column.eq_ignore_ascii_case("Engineer") {
            engineer = applicable(value).map(str::to_string);
            continue;
        }
        match SensorSlot::parse(column) {
            Some(slot) => {
                if let Some(serial) = applicable(value) {
                    serials.insert(slot, SerialNumber::new(serial));
                }
            }
            None => debug!(scoop = %scoop_id, column, "ignoring unrecognized scoop column"),
        }
    }

    if serials.is_empty() {
        return Err(format!("assignment valid from {valid_from} lists no sensors"));
    }

    Ok(ScoopAssignment {
        scoop_id: scoop_id.clone(),
        valid_from,
        serials,
        engineer,
    })
}

pub fn sensor_from_row(row: &RawRow) -> Result<SensorRecord, String> {
    let sensor_type = applicable(row.required("SensorType")?)
        .map(SensorType::parse)
        .ok_or_else(|| "SensorType is empty".to_string())?;
    let serial_number = applicable(row.required("SerialNumber")?)
        .map(SerialNumber::new)
        .ok_or_else(|| "SerialNumber is empty".to_string())?;
    let scoop_id = row.get("ScoopID").and_then(applicable).map(ScoopId::new);

    let equation = match row.get("Equation").and_then(applicable) {
        Some(text) => Equation::parse(text)?,
        None => sensor_type
            .default_equation()
            .ok_or_else(|| format!("no equation given for sensor type {sensor_type}"))?,
    };

    let coefficients = Coefficients {
        a: coefficient(row, Coefficient::A)?,
        b: coefficient(row, Coefficient::B)?,
        c: coefficient(row, Coefficient::C)?,
        d: coefficient(row, Coefficient::D)?,
        offset: coefficient(row, Coefficient::Offset)?,
    };

    for required in equation.required_coefficients() {
        if coefficients.get(*required).is_none() {
            return Err(format!(
                "equation {} requires coefficient {} for {} {}",
                equation.as_str(),
                required.column(),
                sensor_type,
                serial_number
            ));
        }
    }

    let status = SensorStatus::parse(row.get("SensorStatus").unwrap_or_default())?;
    let valid_from = match row.get(VALID_FROM_COLUMN).and_then(applicable) {
        Some(text) => Some(parse_date(text).ok_or_else(|| format!("ValidFrom '{text}' is not a date"))?),
        None => None,
    };

    Ok(SensorRecord {
        sensor_type,
        serial_number,
        scoop_id,
        equation,
        coefficients,
        status,
        valid_from,
    })
}

fn coefficient(row: &RawRow, coefficient: Coefficient) -> Result<Option<f64>, String> {
    let Some(text) = row.get(coefficient.column()).and_then(applicable) else {
        return Ok(None);
    };
    text.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(Some)
        .ok_or_else(|| format!("coefficient {} value '{text}' is not numeric", coefficient.column()))
}

/// Orders an assignment history by date. Later rows repeating a `validFrom`
/// already seen are reported and dropped.
pub fn order_history(
    source: &str,
    rows: Vec<(usize, ScoopAssignment)>,
    skipped: &mut Vec<MalformedRecord>,
) -> Vec<ScoopAssignment> {
    let mut seen = HashSet::new();
    let mut history = Vec::with_capacity(rows.len());
    for (row, assignment) in rows {
        if seen.insert(assignment.valid_from) {
            history.push(assignment);
        } else {
            skipped.push(MalformedRecord::new(
                source,
                row,
                format!("duplicate validFrom {}", assignment.valid_from),
            ));
        }
    }
    history.sort_by_key(|assignment| assignment.valid_from);
    history
}

/// Drops later rows repeating a `(SensorType, SerialNumber, ValidFrom)` key.
pub fn dedupe_sensors(
    source: &str,
    rows: Vec<(usize, SensorRecord)>,
    skipped: &mut Vec<MalformedRecord>,
) -> Vec<SensorRecord> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(rows.len());
    for (row, record) in rows {
        let key = (
            record.sensor_type.clone(),
            record.serial_number.clone(),
            record.valid_from,
        );
        if seen.insert(key) {
            records.push(record);
        } else {
            skipped.push(MalformedRecord::new(
                source,
                row,
                format!(
                    "duplicate coefficients for {} {}",
                    record.sensor_type, record.serial_number
                ),
            ));
        }
    }
    records
}
