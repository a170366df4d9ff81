//! Resampling of calibrated series onto uniform altitude or time grids.
//!
//! "Base" mode derives a [`Grid`] from a series ([`Grid::from_frame`]);
//! "data" mode projects a series onto an existing grid ([`regrid`]).

use std::cmp::Ordering;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::SampleFlag;
use crate::raw_profile::{ALT_COL, TIME_COL};

pub const FLAG_SUFFIX: &str = "_flag";

pub fn flag_column(value_column: &str) -> String {
    format!("{value_column}{FLAG_SUFFIX}")
}

#[derive(Debug, Error)]
pub enum RegridError {
    #[error("grid level {level} lies outside the {axis} span [{min}, {max}] by more than {tolerance}")]
    InsufficientCoverage {
        axis: &'static str,
        level: f64,
        min: f64,
        max: f64,
        tolerance: f64,
    },
    #[error("series has no {axis} values to grid")]
    EmptySeries { axis: &'static str },
    #[error("grid spacing must be positive and finite, got {spacing}")]
    InvalidSpacing { spacing: f64 },
    #[error("no {axis} grid level fits between {min} and {max} at spacing {spacing}")]
    EmptyGrid {
        axis: &'static str,
        min: f64,
        max: f64,
        spacing: f64,
    },
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridAxis {
    #[default]
    Altitude,
    Time,
}

impl GridAxis {
    pub fn column(&self) -> &'static str {
        match self {
            GridAxis::Altitude => ALT_COL,
            GridAxis::Time => TIME_COL,
        }
    }
}

/// Uniform levels at integer multiples of `spacing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    axis: GridAxis,
    spacing: f64,
    levels: Vec<f64>,
}

impl Grid {
    pub fn base(axis: GridAxis, min: f64, max: f64, spacing: f64) -> Result<Self, RegridError> {
        if !spacing.is_finite() || spacing <= 0.0 {
            return Err(RegridError::InvalidSpacing { spacing });
        }
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(RegridError::EmptySeries {
                axis: axis.column(),
            });
        }

        let first = (min / spacing).ceil() as i64;
        let last = (max / spacing).floor() as i64;
        if first > last {
            return Err(RegridError::EmptyGrid {
                axis: axis.column(),
                min,
                max,
                spacing,
            });
        }

        Ok(Self {
            axis,
            spacing,
            levels: (first..=last).map(|k| k as f64 * spacing).collect(),
        })
    }

    /// Grid covering the extent of `frame` along `axis`.
    pub fn from_frame(frame: &DataFrame, axis: GridAxis, spacing: f64) -> Result<Self, RegridError> {
        let (min, max) = axis_extent(frame, axis)?;
        Self::base(axis, min, max, spacing)
    }

    pub fn axis(&self) -> GridAxis {
        self.axis
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Integer index of a level, shared by every grid with the same spacing.
    pub fn level_key(&self, level: f64) -> i64 {
        (level / self.spacing).round() as i64
    }

    /// Levels inside `[min, max]`.
    pub fn restricted(&self, min: f64, max: f64) -> Self {
        Self {
            axis: self.axis,
            spacing: self.spacing,
            levels: self
                .levels
                .iter()
                .copied()
                .filter(|level| (min..=max).contains(level))
                .collect(),
        }
    }
}

pub fn axis_extent(frame: &DataFrame, axis: GridAxis) -> Result<(f64, f64), RegridError> {
    let values = frame
        .column(axis.column())?
        .cast(&DataType::Float64)?
        .as_materialized_series()
        .f64()?
        .into_iter()
        .flatten()
        .filter(|value| value.is_finite())
        .fold(None, |extent: Option<(f64, f64)>, value| match extent {
            Some((min, max)) => Some((min.min(value), max.max(value))),
            None => Some((value, value)),
        });
    values.ok_or(RegridError::EmptySeries {
        axis: axis.column(),
    })
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    x: f64,
    y: Option<f64>,
    flag: SampleFlag,
}

fn worse(a: SampleFlag, b: SampleFlag) -> SampleFlag {
    match (a, b) {
        (SampleFlag::OutOfRange, _) | (_, SampleFlag::OutOfRange) => SampleFlag::OutOfRange,
        _ => SampleFlag::Valid,
    }
}

/// Sorts by axis value and averages rows that share one.
fn merge_duplicates(mut samples: Vec<Sample>) -> Vec<Sample> {
    samples.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));

    let mut merged: Vec<Sample> = Vec::with_capacity(samples.len());
    let mut run: Vec<Sample> = Vec::new();
    let flush = |run: &mut Vec<Sample>, merged: &mut Vec<Sample>| {
        let Some(first) = run.first().copied() else {
            return;
        };
        let present: Vec<&Sample> = run.iter().filter(|sample| sample.y.is_some()).collect();
        let y = (!present.is_empty()).then(|| {
            present.iter().filter_map(|sample| sample.y).sum::<f64>() / present.len() as f64
        });
        let flag = present
            .iter()
            .fold(SampleFlag::Valid, |flag, sample| worse(flag, sample.flag));
        merged.push(Sample { x: first.x, y, flag });
        run.clear();
    };

    for sample in samples {
        if run.first().is_some_and(|head| head.x != sample.x) {
            flush(&mut run, &mut merged);
        }
        run.push(sample);
    }
    flush(&mut run, &mut merged);
    merged
}

fn lerp(x0: f64, y0: f64, x1: f64, y1: f64, x: f64) -> f64 {
    if x1 == x0 {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Value at `level`. A non-null sample lying exactly on the level is used as
/// is; otherwise the valid neighbours are interpolated, or the nearest end
/// value is used within `tolerance`.
fn value_at(rows: &[Sample], valid: &[Sample], level: f64, tolerance: f64) -> Sample {
    let missing = Sample {
        x: level,
        y: None,
        flag: SampleFlag::Missing,
    };

    let exact = rows.partition_point(|sample| sample.x < level);
    if let Some(sample) = rows
        .get(exact)
        .filter(|sample| sample.x == level && sample.y.is_some())
    {
        return Sample { x: level, ..*sample };
    }

    let (Some(head), Some(tail)) = (valid.first(), valid.last()) else {
        return missing;
    };
    let j = valid.partition_point(|sample| sample.x < level);
    let (y, flag) = if j == 0 {
        if head.x - level > tolerance {
            return missing;
        }
        (head.y, head.flag)
    } else if j == valid.len() {
        if level - tail.x > tolerance {
            return missing;
        }
        (tail.y, tail.flag)
    } else {
        let (lo, hi) = (valid[j - 1], valid[j]);
        match (lo.y, hi.y) {
            (Some(y0), Some(y1)) => (Some(lerp(lo.x, y0, hi.x, y1, level)), worse(lo.flag, hi.flag)),
            _ => return missing,
        }
    };
    Sample { x: level, y, flag }
}

/// Projects every `Float64` column of `frame` onto `grid` by linear
/// interpolation along the grid axis. A `<column>_flag` companion is carried
/// along; other columns are dropped.
///
/// Fails with [`RegridError::InsufficientCoverage`] if a level lies outside
/// the axis span by more than `tolerance`.
pub fn regrid(frame: &DataFrame, grid: &Grid, tolerance: f64) -> Result<DataFrame, RegridError> {
    let axis_name = grid.axis().column();
    let (min, max) = axis_extent(frame, grid.axis())?;
    if let Some(level) = grid
        .levels()
        .iter()
        .copied()
        .find(|level| *level < min - tolerance || *level > max + tolerance)
    {
        return Err(RegridError::InsufficientCoverage {
            axis: axis_name,
            level,
            min,
            max,
            tolerance,
        });
    }

    let axis: Vec<Option<f64>> = frame
        .column(axis_name)?
        .cast(&DataType::Float64)?
        .as_materialized_series()
        .f64()?
        .into_iter()
        .collect();

    let mut columns: Vec<Column> = vec![Series::new(axis_name.into(), grid.levels().to_vec()).into()];

    for column in frame.get_columns() {
        let name = column.name().to_string();
        if name == axis_name || column.dtype() != &DataType::Float64 {
            continue;
        }

        let values = column.as_materialized_series().f64()?;
        let flag_name = flag_column(&name);
        let flags: Option<Vec<Option<String>>> = match frame.column(&flag_name) {
            Ok(flag_col) => Some(
                flag_col
                    .as_materialized_series()
                    .str()?
                    .into_iter()
                    .map(|flag| flag.map(str::to_string))
                    .collect(),
            ),
            Err(_) => None,
        };

        let rows: Vec<Sample> = axis
            .iter()
            .zip(values.into_iter())
            .enumerate()
            .filter_map(|(idx, (x, y))| {
                let x = x.filter(|x| x.is_finite())?;
                let flag = flags
                    .as_ref()
                    .and_then(|flags| flags[idx].as_deref())
                    .and_then(SampleFlag::parse)
                    .unwrap_or(SampleFlag::Valid);
                Some(Sample { x, y, flag })
            })
            .collect();
        let rows = merge_duplicates(rows);
        let valid: Vec<Sample> = rows.iter().copied().filter(|row| row.y.is_some()).collect();

        let gridded: Vec<Sample> = grid
            .levels()
            .iter()
            .map(|level| value_at(&rows, &valid, *level, tolerance))
            .collect();

        columns.push(
            Series::new(
                name.as_str().into(),
                gridded.iter().map(|sample| sample.y).collect::<Vec<_>>(),
            )
            .into(),
        );
        if flags.is_some() {
            columns.push(
                Series::new(
                    flag_name.as_str().into(),
                    gridded
                        .iter()
                        .map(|sample| sample.flag.as_str())
                        .collect::<Vec<_>>(),
                )
                .into(),
            );
        }
    }

    Ok(DataFrame::new(columns)?)
}
