use std::collections::BTreeMap;

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{debug, warn};

use crate::calibration::{Calibrated, Calibration, SampleFlag};
use crate::error::Result;
use crate::model::{SensorSlot, SensorType};
use crate::quality_filters::{ensemble_flags, ensemble_mean, EnsembleFlag, EnsembleRules, QcReason, QcReport};
use crate::raw_profile::{raw_column, RawProfile, ALT_COL, TIMESTAMP_COL, TIME_COL};
use crate::regrid::flag_column;
use crate::resolver::FlightResolution;

pub const TEMPERATURE_COL: &str = "temp_k";
pub const HUMIDITY_COL: &str = "rh_pct";

/// Calibrated column of a thermo slot: `temp_k_imet<n>` or `rh_pct_rh<n>`.
pub fn value_column(slot: SensorSlot) -> String {
    match slot {
        SensorSlot::Imet(_) => format!("{TEMPERATURE_COL}_{slot}"),
        SensorSlot::Rh(_) => format!("{HUMIDITY_COL}_{slot}"),
        SensorSlot::Wind => "wind".to_string(),
    }
}

/// Serial number of the sensor that produced each sample of a slot.
pub fn serial_column(slot: SensorSlot) -> String {
    format!("{slot}_serial")
}

/// Calibrated thermistor and humidity series of one flight.
#[derive(Debug, Clone)]
pub struct ThermoProfile {
    pub samples: DataFrame,
    pub ensemble: BTreeMap<SensorSlot, EnsembleFlag>,
}

impl ThermoProfile {
    pub fn slots(&self) -> impl Iterator<Item = SensorSlot> + '_ {
        self.ensemble.keys().copied()
    }
}

/// Calibrates every thermo slot of `raw`. Each sample uses the coefficients
/// resolved for its own UTC date.
pub fn calibrate_thermo(
    raw: &RawProfile,
    resolution: &FlightResolution,
    sample_dates: &[NaiveDate],
) -> Result<DataFrame> {
    let frame = raw.frame();
    let mut columns: Vec<Column> = Vec::new();
    for name in [TIMESTAMP_COL, TIME_COL, ALT_COL] {
        columns.push(frame.column(name)?.clone());
    }

    for slot in raw.thermo_slots() {
        let Some(raw_name) = raw_column(slot) else {
            continue;
        };
        let readings = raw.values(&raw_name)?;

        let mut by_date: BTreeMap<NaiveDate, Option<(Calibration, String)>> = BTreeMap::new();
        for (date, segment) in &resolution.segments {
            let resolved = match segment.get(slot) {
                Some(sensor) => Some((
                    Calibration::from_record(&sensor.resolution.record)?,
                    sensor.serial.to_string(),
                )),
                None => {
                    debug!(%slot, %date, "slot has no sensor mounted; samples will be missing");
                    None
                }
            };
            by_date.insert(*date, resolved);
        }

        let mut values = Vec::with_capacity(readings.len());
        let mut flags = Vec::with_capacity(readings.len());
        let mut serials: Vec<Option<String>> = Vec::with_capacity(readings.len());
        for (reading, date) in readings.iter().zip(sample_dates) {
            let out = match by_date.get(date).and_then(Option::as_ref) {
                Some((calibration, serial)) => {
                    serials.push(Some(serial.clone()));
                    calibration.apply_scalar(*reading)?
                }
                None => {
                    serials.push(None);
                    Calibrated::missing()
                }
            };
            values.push(out.value);
            flags.push(out.flag.as_str());
        }

        let name = value_column(slot);
        columns.push(Series::new(name.as_str().into(), values).into());
        columns.push(Series::new(flag_column(&name).as_str().into(), flags).into());
        columns.push(Series::new(serial_column(slot).as_str().into(), serials).into());
    }

    Ok(DataFrame::new(columns)?)
}

fn combine_flags(rows: &[Option<&str>]) -> SampleFlag {
    if rows
        .iter()
        .any(|flag| flag.and_then(SampleFlag::parse) == Some(SampleFlag::OutOfRange))
    {
        SampleFlag::OutOfRange
    } else {
        SampleFlag::Valid
    }
}

/// Flags disagreeing redundant sensors and adds the ensemble mean columns
/// `temp_k` and `rh_pct`.
pub fn apply_ensemble(
    samples: DataFrame,
    rules: &EnsembleRules,
    report: &mut QcReport,
) -> Result<ThermoProfile> {
    let mut samples = samples;
    let mut ensemble = BTreeMap::new();

    let slots: Vec<SensorSlot> = samples
        .get_column_names()
        .iter()
        .filter_map(|name| name.as_str().strip_suffix("_serial"))
        .filter_map(SensorSlot::parse)
        .collect();

    for (sensor_type, output, limits) in [
        (SensorType::IMet, TEMPERATURE_COL, rules.temperature_k),
        (SensorType::Rh, HUMIDITY_COL, rules.rh_pct),
    ] {
        let group: Vec<SensorSlot> = slots
            .iter()
            .copied()
            .filter(|slot| slot.sensor_type() == sensor_type)
            .collect();
        if group.is_empty() {
            continue;
        }

        let mut series = Vec::with_capacity(group.len());
        let mut flag_series = Vec::with_capacity(group.len());
        for slot in &group {
            let name = value_column(*slot);
            series.push(crate::raw_profile::f64_values(&samples, &name)?);
            flag_series.push(
                samples
                    .column(&flag_column(&name))?
                    .as_materialized_series()
                    .str()?
                    .into_iter()
                    .map(|flag| flag.map(str::to_string))
                    .collect::<Vec<Option<String>>>(),
            );
        }

        let flags = if rules.enabled && group.len() > 1 {
            ensemble_flags(&series, limits)
        } else {
            vec![EnsembleFlag::Good; group.len()]
        };

        for ((slot, flag), values) in group.iter().zip(&flags).zip(&series) {
            let reason = match flag {
                EnsembleFlag::Good => None,
                EnsembleFlag::Bias => Some(QcReason::EnsembleBias),
                EnsembleFlag::Variability => Some(QcReason::EnsembleVariability),
            };
            if let Some(reason) = reason {
                let samples_flagged = values.iter().flatten().count();
                warn!(%slot, reason = reason.as_str(), "sensor excluded from ensemble mean");
                report.record_flagged(&value_column(*slot), reason, samples_flagged);
            }
            ensemble.insert(*slot, *flag);
        }

        let mean = ensemble_mean(&series, &flags);
        let mean_flags: Vec<&'static str> = mean
            .iter()
            .enumerate()
            .map(|(row, value)| match value {
                None => SampleFlag::Missing.as_str(),
                Some(_) => {
                    let contributing: Vec<Option<&str>> = flag_series
                        .iter()
                        .zip(&flags)
                        .zip(&series)
                        .filter(|((_, flag), values)| {
                            **flag == EnsembleFlag::Good && values[row].is_some()
                        })
                        .map(|((sensor_flags, _), _)| sensor_flags[row].as_deref())
                        .collect();
                    combine_flags(&contributing).as_str()
                }
            })
            .collect();

        samples.with_column(Series::new(output.into(), mean))?;
        samples.with_column(Series::new(flag_column(output).as_str().into(), mean_flags))?;
    }

    Ok(ThermoProfile { samples, ensemble })
}
