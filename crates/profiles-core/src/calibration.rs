//! Closed-form calibration equations.
//!
//! Every function here is pure. Invalid results are reported through
//! [`SampleFlag`] rather than NaN.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Coefficient, Equation, SensorRecord};

pub const RH_MIN_PCT: f64 = 0.0;
pub const RH_MAX_PCT: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFlag {
    Valid,
    Missing,
    OutOfRange,
}

impl SampleFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFlag::Valid => "valid",
            SampleFlag::Missing => "missing",
            SampleFlag::OutOfRange => "out_of_range",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "valid" => Some(SampleFlag::Valid),
            "missing" => Some(SampleFlag::Missing),
            "out_of_range" => Some(SampleFlag::OutOfRange),
            _ => None,
        }
    }
}

/// One calibrated value. `value` is `None` exactly when the flag is `Missing`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibrated {
    pub value: Option<f64>,
    pub flag: SampleFlag,
}

impl Calibrated {
    pub fn valid(value: f64) -> Self {
        Self {
            value: Some(value),
            flag: SampleFlag::Valid,
        }
    }

    pub fn missing() -> Self {
        Self {
            value: None,
            flag: SampleFlag::Missing,
        }
    }

    fn finite_or_missing(value: f64) -> Self {
        if value.is_finite() {
            Self::valid(value)
        } else {
            Self::missing()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindSample {
    pub speed_ms: Option<f64>,
    /// Radians in `[0, 2π)`.
    pub direction_rad: Option<f64>,
    pub flag: SampleFlag,
}

impl WindSample {
    fn missing() -> Self {
        Self {
            speed_ms: None,
            direction_rad: None,
            flag: SampleFlag::Missing,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("equation {equation} needs coefficient {coefficient} but the record for {serial} has none")]
    MissingCoefficient {
        equation: &'static str,
        coefficient: &'static str,
        serial: String,
    },
    #[error("equation {found} cannot calibrate a {expected} sensor")]
    WrongEquation {
        expected: &'static str,
        found: &'static str,
    },
}

/// Equation plus the coefficients it reads, taken from a [`SensorRecord`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Calibration {
    Wind { a: f64, b: f64 },
    Thermistor { a: f64, b: f64, c: f64 },
    HumidityOffset { offset: f64 },
}

impl Calibration {
    pub fn from_record(record: &SensorRecord) -> Result<Self, CalibrationError> {
        let get = |coefficient: Coefficient| {
            record
                .coefficients
                .get(coefficient)
                .ok_or_else(|| CalibrationError::MissingCoefficient {
                    equation: record.equation.as_str(),
                    coefficient: coefficient.column(),
                    serial: record.serial_number.to_string(),
                })
        };

        Ok(match record.equation {
            Equation::WindE1 => Calibration::Wind {
                a: get(Coefficient::A)?,
                b: get(Coefficient::B)?,
            },
            Equation::ThermistorE2 => Calibration::Thermistor {
                a: get(Coefficient::A)?,
                b: get(Coefficient::B)?,
                c: get(Coefficient::C)?,
            },
            Equation::HumidityOffset => Calibration::HumidityOffset {
                offset: get(Coefficient::Offset)?,
            },
        })
    }

    pub fn equation(&self) -> Equation {
        match self {
            Calibration::Wind { .. } => Equation::WindE1,
            Calibration::Thermistor { .. } => Equation::ThermistorE2,
            Calibration::HumidityOffset { .. } => Equation::HumidityOffset,
        }
    }

    /// Applies a scalar equation to one raw reading. Wind needs attitude
    /// angles and goes through [`wind_e1`] instead.
    pub fn apply_scalar(&self, raw: Option<f64>) -> Result<Calibrated, CalibrationError> {
        let Some(raw) = raw else {
            return Ok(Calibrated::missing());
        };
        match *self {
            Calibration::Thermistor { a, b, c } => Ok(thermistor_e2(raw, a, b, c)),
            Calibration::HumidityOffset { offset } => Ok(rh_offset(raw, offset)),
            Calibration::Wind { .. } => Err(CalibrationError::WrongEquation {
                expected: "scalar",
                found: Equation::WindE1.as_str(),
            }),
        }
    }
}

/// Thermistor temperature in Kelvin: `1 / (A + B·ln R + C·(ln R)^3)`.
pub fn thermistor_e2(resistance_ohm: f64, a: f64, b: f64, c: f64) -> Calibrated {
    if !resistance_ohm.is_finite() || resistance_ohm <= 0.0 {
        return Calibrated::missing();
    }
    let ln_r = resistance_ohm.ln();
    let denominator = a + b * ln_r + c * ln_r.powi(3);
    if denominator == 0.0 {
        return Calibrated::missing();
    }
    Calibrated::finite_or_missing(1.0 / denominator)
}

/// Relative humidity plus a fixed offset, clamped to `[0, 100]`.
pub fn rh_offset(raw_pct: f64, offset: f64) -> Calibrated {
    let corrected = raw_pct + offset;
    if !corrected.is_finite() {
        return Calibrated::missing();
    }
    if (RH_MIN_PCT..=RH_MAX_PCT).contains(&corrected) {
        Calibrated::valid(corrected)
    } else {
        Calibrated {
            value: Some(corrected.clamp(RH_MIN_PCT, RH_MAX_PCT)),
            flag: SampleFlag::OutOfRange,
        }
    }
}

/// Attitude-derived wind from pitch, roll and yaw in degrees.
///
/// `speed = A·sqrt(tan(arccos(cos(pitch) − cos(roll)))) + B`
///
/// `direction = atan2(−cos(yaw)·sin(roll), sin(yaw)·sin(roll) + sin(pitch)·cos(yaw)·cos(roll))`
pub fn wind_e1(pitch_deg: f64, roll_deg: f64, yaw_deg: f64, a: f64, b: f64) -> WindSample {
    let (pitch, roll, yaw) = (
        pitch_deg.to_radians(),
        roll_deg.to_radians(),
        yaw_deg.to_radians(),
    );
    if !(pitch.is_finite() && roll.is_finite() && yaw.is_finite()) {
        return WindSample::missing();
    }

    let tilt = pitch.cos() - roll.cos();
    if !(-1.0..=1.0).contains(&tilt) {
        return WindSample::missing();
    }
    let speed = a * tilt.acos().tan().sqrt() + b;
    if !speed.is_finite() {
        return WindSample::missing();
    }

    let direction = (-yaw.cos() * roll.sin())
        .atan2(yaw.sin() * roll.sin() + pitch.sin() * yaw.cos() * roll.cos());
    let Some(direction) = normalize_radians(direction) else {
        return WindSample::missing();
    };

    WindSample {
        speed_ms: Some(speed),
        direction_rad: Some(direction),
        flag: SampleFlag::Valid,
    }
}

/// Maps an angle onto `[0, 2π)`.
pub fn normalize_radians(angle: f64) -> Option<f64> {
    if !angle.is_finite() {
        return None;
    }
    let wrapped = angle.rem_euclid(TAU);
    Some(if wrapped >= TAU { 0.0 } else { wrapped })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rh_within_bounds_is_valid() {
        let out = rh_offset(40.0, 2.5);
        assert_eq!(out, Calibrated::valid(42.5));
    }

    #[test]
    fn thermistor_rejects_non_finite_resistance() {
        assert_eq!(thermistor_e2(f64::NAN, 1e-3, 2e-4, 1e-7), Calibrated::missing());
        assert_eq!(thermistor_e2(0.0, 1e-3, 2e-4, 1e-7), Calibrated::missing());
    }

    #[test]
    fn direction_is_normalized() {
        let direction = normalize_radians(-0.5).expect("finite");
        assert!((direction - (TAU - 0.5)).abs() < 1e-12);
        assert_eq!(normalize_radians(TAU), Some(0.0));
        assert_eq!(normalize_radians(f64::INFINITY), None);
    }

    #[test]
    fn flags_round_trip_through_text() {
        for flag in [SampleFlag::Valid, SampleFlag::Missing, SampleFlag::OutOfRange] {
            assert_eq!(SampleFlag::parse(flag.as_str()), Some(flag));
        }
    }
}
