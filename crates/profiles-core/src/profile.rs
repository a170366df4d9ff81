//! One flight turned into a calibrated, quality-controlled, gridded profile.

use std::fs::File;
use std::path::Path;

use polars::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::CoefficientTables;
use crate::config::ProcessingConfig;
use crate::error::{ProfileError, Result};
use crate::legs::{select_leg, Leg};
use crate::meta::FlightMeta;
use crate::model::PlatformId;
use crate::quality_filters::{apply_quality_filters, QcReport, QcRules, EXPLANATION_COL};
use crate::raw_profile::RawProfile;
use crate::regrid::{axis_extent, regrid, Grid, GridAxis, RegridError};
use crate::resolver::{CoefficientDowngrade, FlightResolution, Resolver, ValidityRule};
use crate::thermo::{apply_ensemble, calibrate_thermo, ThermoProfile};
use crate::wind::{calibrate_wind, recompute_direction, with_components, WindProfile};

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileOptions {
    pub leg: Leg,
    pub axis: GridAxis,
    pub resolution: f64,
    pub tolerance: f64,
    pub bounds: Option<[f64; 2]>,
    pub qc: QcRules,
    pub validity: ValidityRule,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self::from(&ProcessingConfig::default())
    }
}

impl From<&ProcessingConfig> for ProfileOptions {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            leg: config.leg,
            axis: config.regrid.axis,
            resolution: config.regrid.resolution,
            tolerance: config.regrid.tolerance,
            bounds: config.regrid.bounds,
            qc: config.qc.clone(),
            validity: config.validity,
        }
    }
}

/// Non-fatal findings gathered while building a profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileReport {
    pub leg: Leg,
    /// Raw samples in the selected leg.
    pub samples: usize,
    pub downgrades: Vec<CoefficientDowngrade>,
    pub qc: QcReport,
    pub regrid_warnings: Vec<String>,
}

impl ProfileReport {
    pub fn has_warnings(&self) -> bool {
        !self.downgrades.is_empty() || !self.regrid_warnings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub id: Uuid,
    pub meta: FlightMeta,
    pub platform_id: PlatformId,
    pub resolution: FlightResolution,
    pub thermo: ThermoProfile,
    pub wind: Option<WindProfile>,
    pub grid: Grid,
    /// Every calibrated quantity on `grid`, one row per level.
    pub gridded: DataFrame,
    pub report: ProfileReport,
}

impl Profile {
    pub fn levels(&self) -> &[f64] {
        self.grid.levels()
    }

    pub fn column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        crate::raw_profile::f64_values(&self.gridded, name)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut frame = self.gridded.clone();
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut frame)?;
        Ok(())
    }
}

/// Appends the columns of `other` that `base` lacks. Quality explanations
/// present in both are joined per row.
fn join_samples(base: &DataFrame, other: &DataFrame) -> Result<DataFrame> {
    let mut joined = base.clone();
    for column in other.get_columns() {
        let name = column.name().as_str();
        if name == EXPLANATION_COL && base.column(EXPLANATION_COL).is_ok() {
            let left = base.column(EXPLANATION_COL)?.as_materialized_series().str()?.clone();
            let right = column.as_materialized_series().str()?.clone();
            let merged: Vec<Option<String>> = left
                .into_iter()
                .zip(right.into_iter())
                .map(|pair| match pair {
                    (Some(l), Some(r)) => Some(format!("{l}|{r}")),
                    (Some(l), None) => Some(l.to_string()),
                    (None, r) => r.map(str::to_string),
                })
                .collect();
            joined.with_column(Series::new(EXPLANATION_COL.into(), merged))?;
        } else if joined.column(name).is_err() {
            joined.with_column(column.clone())?;
        }
    }
    Ok(joined)
}

fn grid_for(frame: &DataFrame, options: &ProfileOptions) -> std::result::Result<Grid, RegridError> {
    match options.bounds {
        Some([min, max]) => Grid::base(options.axis, min, max, options.resolution),
        None => Grid::from_frame(frame, options.axis, options.resolution),
    }
}

/// Builds one profile.
///
/// Resolution failures are fatal for the flight. Coefficient downgrades, QC
/// removals and grid levels dropped for lack of coverage end up in
/// [`Profile::report`].
pub fn build_profile(
    raw: &RawProfile,
    meta: FlightMeta,
    tables: &CoefficientTables,
    options: &ProfileOptions,
) -> Result<Profile> {
    let platform_id = meta.platform_id().ok_or(ProfileError::MissingPlatformId)?;
    if raw.is_empty() {
        return Err(ProfileError::EmptyProfile);
    }

    let leg = select_leg(raw, options.leg)?;
    let sample_dates = leg.sample_dates()?;
    let with_wind = leg.has_attitude();

    let resolver = Resolver::new(tables).with_rule(options.validity);
    let resolution = resolver.resolve_flight(platform_id, &meta, &sample_dates, with_wind)?;

    let (thermo_samples, mut qc) =
        apply_quality_filters(&calibrate_thermo(&leg, &resolution, &sample_dates)?, &options.qc)?;
    let thermo = apply_ensemble(thermo_samples, &options.qc.ensemble, &mut qc)?;

    let wind = if with_wind {
        let calibrated = calibrate_wind(&leg, &resolution, &sample_dates)?;
        let (samples, wind_qc) = apply_quality_filters(&calibrated.samples, &options.qc)?;
        qc.merge(&wind_qc);
        Some(WindProfile {
            samples: with_components(&samples)?,
        })
    } else {
        None
    };

    let samples = match &wind {
        Some(wind) => join_samples(&thermo.samples, &wind.samples)?,
        None => thermo.samples.clone(),
    };

    let mut regrid_warnings = Vec::new();
    let mut grid = grid_for(&samples, options)?;
    let mut gridded = match regrid(&samples, &grid, options.tolerance) {
        Ok(gridded) => gridded,
        Err(err @ RegridError::InsufficientCoverage { .. }) => {
            let (min, max) = axis_extent(&samples, options.axis)?;
            let covered = grid.restricted(min - options.tolerance, max + options.tolerance);
            warn!(platform_id, error = %err, kept = covered.len(), "dropping uncovered grid levels");
            regrid_warnings.push(err.to_string());
            if covered.is_empty() {
                return Err(RegridError::EmptyGrid {
                    axis: options.axis.column(),
                    min,
                    max,
                    spacing: options.resolution,
                }
                .into());
            }
            grid = covered;
            regrid(&samples, &grid, options.tolerance)?
        }
        Err(err) => return Err(err.into()),
    };
    recompute_direction(&mut gridded)?;

    let mut meta = meta;
    if meta.platform_name().is_none() {
        if let Some(name) = resolution.platform_name.as_deref() {
            meta.set("platform_name", name);
        }
    }

    let report = ProfileReport {
        leg: options.leg,
        samples: leg.len(),
        downgrades: resolution.downgrades().cloned().collect(),
        qc,
        regrid_warnings,
    };
    info!(
        platform_id,
        scoop = %resolution.scoop_id,
        leg = options.leg.as_str(),
        samples = report.samples,
        levels = grid.len(),
        removed = report.qc.total_removed(),
        downgrades = report.downgrades.len(),
        "profile built"
    );

    Ok(Profile {
        id: Uuid::new_v4(),
        meta,
        platform_id,
        resolution,
        thermo,
        wind,
        grid,
        gridded,
        report,
    })
}
