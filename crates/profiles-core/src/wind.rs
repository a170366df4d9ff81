use std::collections::BTreeMap;

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::debug;

use crate::calibration::{normalize_radians, wind_e1, Calibration, CalibrationError, SampleFlag};
use crate::error::Result;
use crate::model::{Equation, SensorSlot};
use crate::raw_profile::{f64_values, RawProfile, ALT_COL, PITCH_COL, ROLL_COL, TIMESTAMP_COL, TIME_COL, YAW_COL};
use crate::regrid::flag_column;
use crate::resolver::FlightResolution;

pub const SPEED_COL: &str = "wind_speed_ms";
pub const DIRECTION_COL: &str = "wind_dir_deg";
pub const U_COL: &str = "wind_u_ms";
pub const V_COL: &str = "wind_v_ms";
pub const SERIAL_COL: &str = "wind_serial";

/// Calibrated wind series of one flight.
#[derive(Debug, Clone)]
pub struct WindProfile {
    pub samples: DataFrame,
}

impl WindProfile {
    pub fn speeds(&self) -> Result<Vec<Option<f64>>> {
        f64_values(&self.samples, SPEED_COL)
    }

    pub fn directions_deg(&self) -> Result<Vec<Option<f64>>> {
        f64_values(&self.samples, DIRECTION_COL)
    }
}

/// Eastward and northward components of a wind blowing from `direction_deg`.
pub fn components(speed_ms: f64, direction_deg: f64) -> (f64, f64) {
    let direction = direction_deg.to_radians();
    (-speed_ms * direction.sin(), -speed_ms * direction.cos())
}

/// Direction the wind blows from, in degrees `[0, 360)`.
pub fn direction_from_components(u_ms: f64, v_ms: f64) -> Option<f64> {
    if u_ms == 0.0 && v_ms == 0.0 {
        return None;
    }
    normalize_radians((-u_ms).atan2(-v_ms)).map(|radians| {
        let degrees = radians.to_degrees();
        if degrees >= 360.0 {
            0.0
        } else {
            degrees
        }
    })
}

fn wind_coefficients(calibration: &Calibration) -> std::result::Result<(f64, f64), CalibrationError> {
    match calibration {
        Calibration::Wind { a, b } => Ok((*a, *b)),
        other => Err(CalibrationError::WrongEquation {
            expected: Equation::WindE1.as_str(),
            found: other.equation().as_str(),
        }),
    }
}

/// Estimates wind from the airframe attitude with the coefficients resolved
/// for each sample's UTC date.
pub fn calibrate_wind(
    raw: &RawProfile,
    resolution: &FlightResolution,
    sample_dates: &[NaiveDate],
) -> Result<WindProfile> {
    let frame = raw.frame();
    let pitch = raw.values(PITCH_COL)?;
    let roll = raw.values(ROLL_COL)?;
    let yaw = raw.values(YAW_COL)?;

    let mut by_date: BTreeMap<NaiveDate, Option<((f64, f64), String)>> = BTreeMap::new();
    for (date, segment) in &resolution.segments {
        let resolved = match segment.get(SensorSlot::Wind) {
            Some(sensor) => {
                let calibration = Calibration::from_record(&sensor.resolution.record)?;
                Some((wind_coefficients(&calibration)?, sensor.serial.to_string()))
            }
            None => {
                debug!(%date, "no wind coefficients resolved; wind samples will be missing");
                None
            }
        };
        by_date.insert(*date, resolved);
    }

    let len = raw.len();
    let mut speeds = Vec::with_capacity(len);
    let mut directions = Vec::with_capacity(len);
    let mut flags = Vec::with_capacity(len);
    let mut serials: Vec<Option<String>> = Vec::with_capacity(len);

    for idx in 0..len {
        let coefficients = sample_dates
            .get(idx)
            .and_then(|date| by_date.get(date))
            .and_then(Option::as_ref);
        let attitude = (pitch[idx], roll[idx], yaw[idx]);
        match (coefficients, attitude) {
            (Some(((a, b), serial)), (Some(pitch), Some(roll), Some(yaw))) => {
                let sample = wind_e1(pitch, roll, yaw, *a, *b);
                speeds.push(sample.speed_ms);
                directions.push(sample.direction_rad.map(f64::to_degrees));
                flags.push(sample.flag.as_str());
                serials.push(Some(serial.clone()));
            }
            (coefficients, _) => {
                speeds.push(None);
                directions.push(None);
                flags.push(SampleFlag::Missing.as_str());
                serials.push(coefficients.map(|(_, serial)| serial.clone()));
            }
        }
    }

    let mut columns: Vec<Column> = Vec::new();
    for name in [TIMESTAMP_COL, TIME_COL, ALT_COL] {
        columns.push(frame.column(name)?.clone());
    }
    columns.push(Series::new(SPEED_COL.into(), speeds).into());
    columns.push(Series::new(flag_column(SPEED_COL).as_str().into(), flags).into());
    columns.push(Series::new(DIRECTION_COL.into(), directions).into());
    columns.push(Series::new(SERIAL_COL.into(), serials).into());

    Ok(WindProfile {
        samples: DataFrame::new(columns)?,
    })
}

/// Adds `wind_u_ms` and `wind_v_ms`. A sample without speed loses its
/// direction too.
pub fn with_components(samples: &DataFrame) -> Result<DataFrame> {
    let speeds = f64_values(samples, SPEED_COL)?;
    let directions = f64_values(samples, DIRECTION_COL)?;

    let mut u = Vec::with_capacity(speeds.len());
    let mut v = Vec::with_capacity(speeds.len());
    let mut kept_directions = Vec::with_capacity(speeds.len());
    for (speed, direction) in speeds.iter().zip(&directions) {
        match (speed, direction) {
            (Some(speed), Some(direction)) => {
                let (east, north) = components(*speed, *direction);
                u.push(Some(east));
                v.push(Some(north));
                kept_directions.push(Some(*direction));
            }
            _ => {
                u.push(None);
                v.push(None);
                kept_directions.push(None);
            }
        }
    }

    let mut out = samples.clone();
    out.with_column(Series::new(DIRECTION_COL.into(), kept_directions))?;
    out.with_column(Series::new(U_COL.into(), u))?;
    out.with_column(Series::new(V_COL.into(), v))?;
    Ok(out)
}

/// Replaces interpolated directions on a gridded frame with the direction
/// of the interpolated components, which does not wrap at north.
pub fn recompute_direction(gridded: &mut DataFrame) -> Result<()> {
    if gridded.column(U_COL).is_err() || gridded.column(V_COL).is_err() {
        return Ok(());
    }
    let u = f64_values(gridded, U_COL)?;
    let v = f64_values(gridded, V_COL)?;
    let directions: Vec<Option<f64>> = u
        .iter()
        .zip(&v)
        .map(|pair| match pair {
            (Some(u), Some(v)) => direction_from_components(*u, *v),
            _ => None,
        })
        .collect();
    gridded.with_column(Series::new(DIRECTION_COL.into(), directions))?;
    Ok(())
}
