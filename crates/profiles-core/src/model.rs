use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type PlatformId = u32;

/// Literal used by the coefficient tables for inapplicable fields.
pub const NOT_APPLICABLE: &str = "na";

/// Returns `None` for blank cells and the `na` placeholder.
pub fn applicable(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NOT_APPLICABLE) {
        None
    } else {
        Some(trimmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScoopId(String);

impl ScoopId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Serial reserved for the generic coefficients of a sensor type.
    pub const DEFAULT: &'static str = "0";

    pub fn new(serial: impl Into<String>) -> Self {
        Self(serial.into().trim().to_string())
    }

    pub fn default_record() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    /// Placeholder serials that can never match a specific record.
    pub fn is_unknown(&self) -> bool {
        applicable(&self.0).is_none() || self.0.eq_ignore_ascii_case("unknown")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorType {
    Wind,
    IMet,
    Rh,
    Other(String),
}

impl SensorType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "wind" => SensorType::Wind,
            "imet" => SensorType::IMet,
            "rh" => SensorType::Rh,
            _ => SensorType::Other(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SensorType::Wind => "Wind",
            SensorType::IMet => "IMet",
            SensorType::Rh => "RH",
            SensorType::Other(name) => name,
        }
    }

    /// Equation assumed when a coefficient row leaves `Equation` as `na`.
    pub fn default_equation(&self) -> Option<Equation> {
        match self {
            SensorType::Wind => Some(Equation::WindE1),
            SensorType::IMet => Some(Equation::ThermistorE2),
            SensorType::Rh => Some(Equation::HumidityOffset),
            SensorType::Other(_) => None,
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorStatus {
    Active,
    Retired,
}

impl SensorStatus {
    pub fn parse(value: &str) -> Result<Self, String> {
        match applicable(value).map(str::to_ascii_lowercase).as_deref() {
            None | Some("active") => Ok(SensorStatus::Active),
            Some("retired") | Some("inactive") => Ok(SensorStatus::Retired),
            Some(other) => Err(format!("unknown sensor status '{other}'")),
        }
    }
}

/// Calibration equations understood by the calibration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Equation {
    /// Attitude-derived wind speed and direction.
    WindE1,
    /// Steinhart-Hart style thermistor curve.
    ThermistorE2,
    /// Additive humidity correction.
    HumidityOffset,
}

impl Equation {
    pub fn parse(value: &str) -> Result<Self, String> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "e1" | "1" | "1.0" => Ok(Equation::WindE1),
            "e2" | "2" | "2.0" => Ok(Equation::ThermistorE2),
            "offset" | "rh" => Ok(Equation::HumidityOffset),
            _ => Err(format!("unsupported equation '{}'", value.trim())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Equation::WindE1 => "E1",
            Equation::ThermistorE2 => "E2",
            Equation::HumidityOffset => "offset",
        }
    }

    pub fn required_coefficients(&self) -> &'static [Coefficient] {
        match self {
            Equation::WindE1 => &[Coefficient::A, Coefficient::B],
            Equation::ThermistorE2 => &[Coefficient::A, Coefficient::B, Coefficient::C],
            Equation::HumidityOffset => &[Coefficient::Offset],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coefficient {
    A,
    B,
    C,
    D,
    Offset,
}

impl Coefficient {
    pub fn column(&self) -> &'static str {
        match self {
            Coefficient::A => "A",
            Coefficient::B => "B",
            Coefficient::C => "C",
            Coefficient::D => "D",
            Coefficient::Offset => "Offset",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub c: Option<f64>,
    pub d: Option<f64>,
    pub offset: Option<f64>,
}

impl Coefficients {
    pub fn get(&self, coefficient: Coefficient) -> Option<f64> {
        match coefficient {
            Coefficient::A => self.a,
            Coefficient::B => self.b,
            Coefficient::C => self.c,
            Coefficient::D => self.d,
            Coefficient::Offset => self.offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub sensor_type: SensorType,
    pub serial_number: SerialNumber,
    pub scoop_id: Option<ScoopId>,
    pub equation: Equation,
    pub coefficients: Coefficients,
    pub status: SensorStatus,
    /// Date from which this version of the coefficients applies. Records
    /// without one are valid for every flight.
    pub valid_from: Option<NaiveDate>,
}

impl SensorRecord {
    pub fn is_default(&self) -> bool {
        self.serial_number.is_default()
    }
}

/// Mounting position of a sensor inside a scoop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorSlot {
    Imet(u8),
    Rh(u8),
    Wind,
}

impl SensorSlot {
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        if lower == "wind" {
            return Some(SensorSlot::Wind);
        }
        if let Some(index) = lower.strip_prefix("imet") {
            return index.parse().ok().filter(|n| *n > 0).map(SensorSlot::Imet);
        }
        if let Some(index) = lower.strip_prefix("rh") {
            return index.parse().ok().filter(|n| *n > 0).map(SensorSlot::Rh);
        }
        None
    }

    pub fn name(&self) -> String {
        match self {
            SensorSlot::Imet(n) => format!("imet{n}"),
            SensorSlot::Rh(n) => format!("rh{n}"),
            SensorSlot::Wind => "wind".to_string(),
        }
    }

    pub fn sensor_type(&self) -> SensorType {
        match self {
            SensorSlot::Imet(_) => SensorType::IMet,
            SensorSlot::Rh(_) => SensorType::Rh,
            SensorSlot::Wind => SensorType::Wind,
        }
    }
}

impl fmt::Display for SensorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoopAssignment {
    pub scoop_id: ScoopId,
    pub valid_from: NaiveDate,
    pub serials: BTreeMap<SensorSlot, SerialNumber>,
    pub engineer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMapping {
    pub platform_id: PlatformId,
    pub platform_name: String,
    /// Set only when the scoop is permanently fixed to the airframe.
    pub scoop_id: Option<ScoopId>,
}

/// Parses the date formats used by the local files (`2020-01-08`) and the
/// table store row keys (`20200108`).
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%m/%d/%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_parse_case_insensitively() {
        assert_eq!(SensorSlot::parse("IMET3"), Some(SensorSlot::Imet(3)));
        assert_eq!(SensorSlot::parse("rh1"), Some(SensorSlot::Rh(1)));
        assert_eq!(SensorSlot::parse("Wind"), Some(SensorSlot::Wind));
        assert_eq!(SensorSlot::parse("imet0"), None);
        assert_eq!(SensorSlot::parse("Engineer"), None);
    }

    #[test]
    fn equation_ids_accept_numeric_forms() {
        assert_eq!(Equation::parse("1"), Ok(Equation::WindE1));
        assert_eq!(Equation::parse("2.0"), Ok(Equation::ThermistorE2));
        assert_eq!(Equation::parse("E2"), Ok(Equation::ThermistorE2));
        assert!(Equation::parse("E9").is_err());
    }

    #[test]
    fn dates_parse_in_both_backend_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 8);
        assert_eq!(parse_date("2020-01-08"), expected);
        assert_eq!(parse_date("20200108"), expected);
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn unknown_serials_are_detected() {
        assert!(SerialNumber::new("na").is_unknown());
        assert!(SerialNumber::new("").is_unknown());
        assert!(SerialNumber::new("unknown").is_unknown());
        assert!(!SerialNumber::new("57562").is_unknown());
        assert!(SerialNumber::new(" 0 ").is_default());
    }
}
