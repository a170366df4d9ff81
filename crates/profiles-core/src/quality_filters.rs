use std::collections::BTreeMap;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calibration::SampleFlag;
use crate::regrid::flag_column;

pub const EXPLANATION_COL: &str = "quality_explanation";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Range checks applied to calibrated columns, matched by column prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcRules {
    pub temperature_k: Bounds,
    pub rh_pct: Bounds,
    pub wind_speed_ms: Bounds,
    /// Remove samples the calibration clamped instead of keeping them flagged.
    pub drop_out_of_range: bool,
    pub ensemble: EnsembleRules,
}

impl Default for QcRules {
    fn default() -> Self {
        Self {
            temperature_k: Bounds::new(200.0, 330.0),
            rh_pct: Bounds::new(0.0, 100.0),
            wind_speed_ms: Bounds::new(0.0, 50.0),
            drop_out_of_range: false,
            ensemble: EnsembleRules::default(),
        }
    }
}

impl QcRules {
    pub fn bounds_for(&self, column: &str) -> Option<Bounds> {
        if column.starts_with("temp_k") {
            Some(self.temperature_k)
        } else if column.starts_with("rh_pct") {
            Some(self.rh_pct)
        } else if column.starts_with("wind_speed_ms") {
            Some(self.wind_speed_ms)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcReason {
    CalibrationMissing,
    CalibrationOutOfRange,
    BelowMin,
    AboveMax,
    EnsembleBias,
    EnsembleVariability,
}

impl QcReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QcReason::CalibrationMissing => "calibration_missing",
            QcReason::CalibrationOutOfRange => "calibration_out_of_range",
            QcReason::BelowMin => "below_min",
            QcReason::AboveMax => "above_max",
            QcReason::EnsembleBias => "ensemble_bias",
            QcReason::EnsembleVariability => "ensemble_variability",
        }
    }
}

/// Samples removed (value nulled) and flagged (kept) per column and reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QcReport {
    pub removed: BTreeMap<String, BTreeMap<QcReason, usize>>,
    pub flagged: BTreeMap<String, BTreeMap<QcReason, usize>>,
}

impl QcReport {
    pub fn record_removed(&mut self, column: &str, reason: QcReason, count: usize) {
        if count > 0 {
            *self
                .removed
                .entry(column.to_string())
                .or_default()
                .entry(reason)
                .or_default() += count;
        }
    }

    pub fn record_flagged(&mut self, column: &str, reason: QcReason, count: usize) {
        if count > 0 {
            *self
                .flagged
                .entry(column.to_string())
                .or_default()
                .entry(reason)
                .or_default() += count;
        }
    }

    pub fn removed_count(&self, column: &str, reason: QcReason) -> usize {
        self.removed
            .get(column)
            .and_then(|reasons| reasons.get(&reason))
            .copied()
            .unwrap_or(0)
    }

    pub fn flagged_count(&self, column: &str, reason: QcReason) -> usize {
        self.flagged
            .get(column)
            .and_then(|reasons| reasons.get(&reason))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_removed(&self) -> usize {
        self.removed.values().flat_map(BTreeMap::values).sum()
    }

    pub fn merge(&mut self, other: &QcReport) {
        for (column, reasons) in &other.removed {
            for (reason, count) in reasons {
                self.record_removed(column, *reason, *count);
            }
        }
        for (column, reasons) in &other.flagged {
            for (reason, count) in reasons {
                self.record_flagged(column, *reason, *count);
            }
        }
    }
}

/// Nulls calibrated values that fail `rules` and records why.
///
/// Every `Float64` column with a `<column>_flag` companion is checked. Removed
/// samples get the `missing` flag, and a `quality_explanation` column lists
/// the reasons per row.
pub fn apply_quality_filters(
    df: &DataFrame,
    rules: &QcRules,
) -> Result<(DataFrame, QcReport), PolarsError> {
    let len = df.height();
    let mut report = QcReport::default();
    let mut explanations: Vec<Vec<String>> = vec![Vec::new(); len];
    let mut output = df.clone();

    let value_columns: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|column| column.dtype() == &DataType::Float64)
        .map(|column| column.name().to_string())
        .filter(|name| df.column(&flag_column(name)).is_ok())
        .collect();

    for name in value_columns {
        let flag_name = flag_column(&name);
        let values = df.column(&name)?.as_materialized_series().f64()?.clone();
        let flags = df.column(&flag_name)?.as_materialized_series().str()?.clone();
        let bounds = rules.bounds_for(&name);

        let mut new_values: Vec<Option<f64>> = Vec::with_capacity(len);
        let mut new_flags: Vec<&'static str> = Vec::with_capacity(len);

        for idx in 0..len {
            let value = values.get(idx);
            let flag = flags
                .get(idx)
                .and_then(SampleFlag::parse)
                .unwrap_or(if value.is_some() {
                    SampleFlag::Valid
                } else {
                    SampleFlag::Missing
                });

            let Some(value) = value.filter(|_| flag != SampleFlag::Missing) else {
                report.record_removed(&name, QcReason::CalibrationMissing, 1);
                new_values.push(None);
                new_flags.push(SampleFlag::Missing.as_str());
                continue;
            };

            let mut reason = None;
            if flag == SampleFlag::OutOfRange {
                if rules.drop_out_of_range {
                    reason = Some(QcReason::CalibrationOutOfRange);
                } else {
                    report.record_flagged(&name, QcReason::CalibrationOutOfRange, 1);
                }
            }
            if reason.is_none() {
                if let Some(bounds) = bounds {
                    if value < bounds.min {
                        reason = Some(QcReason::BelowMin);
                    } else if value > bounds.max {
                        reason = Some(QcReason::AboveMax);
                    }
                }
            }

            match reason {
                Some(reason) => {
                    report.record_removed(&name, reason, 1);
                    explanations[idx].push(format!("{name}_{}", reason.as_str()));
                    new_values.push(None);
                    new_flags.push(SampleFlag::Missing.as_str());
                }
                None => {
                    new_values.push(Some(value));
                    new_flags.push(flag.as_str());
                }
            }
        }

        output.with_column(Series::new(name.as_str().into(), new_values))?;
        output.with_column(Series::new(flag_name.as_str().into(), new_flags))?;
    }

    let explanation_series = Series::new(
        EXPLANATION_COL.into(),
        explanations
            .iter()
            .map(|reasons| (!reasons.is_empty()).then(|| reasons.join("|")))
            .collect::<Vec<Option<String>>>(),
    );
    output.with_column(explanation_series)?;

    Ok((output, report))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleLimits {
    /// Largest allowed spread between sensor means.
    pub max_bias: f64,
    /// Largest allowed spread between sensor standard deviations.
    pub max_sdev_diff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleRules {
    pub enabled: bool,
    pub temperature_k: EnsembleLimits,
    pub rh_pct: EnsembleLimits,
}

impl Default for EnsembleRules {
    fn default() -> Self {
        Self {
            enabled: true,
            temperature_k: EnsembleLimits {
                max_bias: 2.0,
                max_sdev_diff: 2.0,
            },
            rh_pct: EnsembleLimits {
                max_bias: 10.0,
                max_sdev_diff: 10.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleFlag {
    Good,
    Bias,
    Variability,
}

fn mean(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    (!present.is_empty()).then(|| present.iter().sum::<f64>() / present.len() as f64)
}

fn std_dev(values: &[Option<f64>]) -> Option<f64> {
    let center = mean(values)?;
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let variance =
        present.iter().map(|value| (value - center).powi(2)).sum::<f64>() / present.len() as f64;
    Some(variance.sqrt())
}

/// Repeatedly drops the statistic furthest from the mean of the remaining
/// ones while their spread exceeds `limit`. Returns the dropped indices.
fn outliers(statistics: &[Option<f64>], limit: f64) -> Vec<usize> {
    let mut active: Vec<(usize, f64)> = statistics
        .iter()
        .enumerate()
        .filter_map(|(idx, stat)| stat.map(|value| (idx, value)))
        .collect();
    let mut dropped = Vec::new();

    while active.len() > 1 {
        let center = active.iter().map(|(_, value)| value).sum::<f64>() / active.len() as f64;
        let (lo, hi) = active
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, value)| {
                (lo.min(*value), hi.max(*value))
            });
        if hi - lo <= limit {
            break;
        }
        let Some(furthest) = active
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                (a.1 - center)
                    .abs()
                    .partial_cmp(&(b.1 - center).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(position, _)| position)
        else {
            break;
        };
        dropped.push(active.remove(furthest).0);
    }
    dropped
}

/// Flags redundant sensors of one kind whose mean or variability disagrees
/// with the rest of the ensemble. Bias is checked first; variability is
/// checked among the sensors that passed.
pub fn ensemble_flags(sensors: &[Vec<Option<f64>>], limits: EnsembleLimits) -> Vec<EnsembleFlag> {
    let mut flags = vec![EnsembleFlag::Good; sensors.len()];

    let means: Vec<Option<f64>> = sensors.iter().map(|values| mean(values)).collect();
    for idx in outliers(&means, limits.max_bias) {
        flags[idx] = EnsembleFlag::Bias;
    }

    let sdevs: Vec<Option<f64>> = sensors
        .iter()
        .zip(&flags)
        .map(|(values, flag)| match flag {
            EnsembleFlag::Good => std_dev(values),
            _ => None,
        })
        .collect();
    for idx in outliers(&sdevs, limits.max_sdev_diff) {
        flags[idx] = EnsembleFlag::Variability;
    }

    flags
}

/// Per-row mean of the sensors marked good.
pub fn ensemble_mean(sensors: &[Vec<Option<f64>>], flags: &[EnsembleFlag]) -> Vec<Option<f64>> {
    let len = sensors.first().map_or(0, Vec::len);
    (0..len)
        .map(|row| {
            let values: Vec<Option<f64>> = sensors
                .iter()
                .zip(flags)
                .filter(|(_, flag)| **flag == EnsembleFlag::Good)
                .map(|(values, _)| values.get(row).copied().flatten())
                .collect();
            mean(&values)
        })
        .collect()
}
