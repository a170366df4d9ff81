use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::CoefficientTables;
use crate::error::{ProfileError, Result};
use crate::meta::FlightMeta;
use crate::profile::{build_profile, Profile, ProfileOptions};
use crate::raw_profile::RawProfile;

pub const HEADER_FILE: &str = "header.csv";
pub const FLIGHT_FILE: &str = "flight.csv";
pub const RAW_FILE: &str = "raw.csv";

/// Inputs of one flight before any coefficient lookup.
#[derive(Debug, Clone)]
pub struct Flight {
    pub source: String,
    pub raw: RawProfile,
    pub meta: FlightMeta,
}

impl Flight {
    /// Reads `raw.csv` plus the optional `header.csv` and `flight.csv`
    /// metadata files of a flight directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let existing = |name: &str| -> Option<PathBuf> {
            let path = dir.join(name);
            path.is_file().then_some(path)
        };
        let meta = FlightMeta::from_files(
            existing(HEADER_FILE).as_deref(),
            existing(FLIGHT_FILE).as_deref(),
        )?;
        let raw = RawProfile::read_csv(&dir.join(RAW_FILE))?;
        Ok(Self {
            source: dir.display().to_string(),
            raw,
            meta,
        })
    }
}

#[derive(Debug)]
pub struct FlightFailure {
    pub source: String,
    pub error: ProfileError,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub set: ProfileSet,
    pub failures: Vec<FlightFailure>,
}

/// Mean and sample variance of one grid level across the profiles of a set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelStatistics {
    pub level: f64,
    pub count: usize,
    pub mean: f64,
    /// `None` below two samples.
    pub variance: Option<f64>,
}

/// Profiles built with the same options. Read-only once built.
#[derive(Debug, Clone)]
pub struct ProfileSet {
    options: ProfileOptions,
    profiles: Vec<Arc<Profile>>,
}

impl ProfileSet {
    pub fn new(options: ProfileOptions) -> Self {
        Self {
            options,
            profiles: Vec::new(),
        }
    }

    pub fn from_profiles(options: ProfileOptions, profiles: Vec<Profile>) -> Self {
        Self {
            options,
            profiles: profiles.into_iter().map(Arc::new).collect(),
        }
    }

    /// Builds every flight in parallel against one coefficient snapshot.
    /// Flights that fail are reported and left out of the set.
    pub fn build(flights: Vec<Flight>, tables: &CoefficientTables, options: &ProfileOptions) -> BatchOutcome {
        let results: Vec<(String, Result<Profile>)> = flights
            .into_par_iter()
            .map(|flight| {
                let result = build_profile(&flight.raw, flight.meta, tables, options);
                (flight.source, result)
            })
            .collect();

        let mut profiles = Vec::new();
        let mut failures = Vec::new();
        for (source, result) in results {
            match result {
                Ok(profile) => profiles.push(profile),
                Err(error) => {
                    warn!(%source, %error, "flight skipped");
                    failures.push(FlightFailure { source, error });
                }
            }
        }
        info!(built = profiles.len(), failed = failures.len(), "profile batch finished");

        BatchOutcome {
            set: Self::from_profiles(options.clone(), profiles),
            failures,
        }
    }

    pub fn options(&self) -> &ProfileOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter().map(Arc::as_ref)
    }

    pub fn get(&self, index: usize) -> Option<&Profile> {
        self.profiles.get(index).map(Arc::as_ref)
    }

    /// Appends the profiles of `other`. Differing options are kept as this
    /// set's and logged.
    pub fn merge(&mut self, other: &ProfileSet) {
        if other.options != self.options {
            info!(
                kept = ?self.options,
                other = ?other.options,
                "merging profile sets built with different options"
            );
        }
        self.profiles.extend(other.profiles.iter().cloned());
    }

    /// Metadata fields shared by every profile.
    pub fn meta(&self) -> FlightMeta {
        let mut profiles = self.iter();
        let Some(first) = profiles.next() else {
            return FlightMeta::new();
        };
        profiles.fold(first.meta.clone(), |shared, profile| shared.combine(&profile.meta))
    }

    /// Per-level statistics of `column`, keyed by grid level index.
    pub fn level_statistics(&self, column: &str) -> Result<BTreeMap<i64, LevelStatistics>> {
        let mut samples: BTreeMap<i64, (f64, Vec<f64>)> = BTreeMap::new();
        for profile in self.iter() {
            if profile.gridded.column(column).is_err() {
                continue;
            }
            let values = profile.column(column)?;
            for (level, value) in profile.levels().iter().zip(values) {
                let Some(value) = value else {
                    continue;
                };
                samples
                    .entry(profile.grid.level_key(*level))
                    .or_insert_with(|| (*level, Vec::new()))
                    .1
                    .push(value);
            }
        }

        Ok(samples
            .into_iter()
            .map(|(key, (level, values))| {
                let count = values.len();
                let mean = values.iter().sum::<f64>() / count as f64;
                let variance = (count > 1).then(|| {
                    values.iter().map(|value| (value - mean).powi(2)).sum::<f64>()
                        / (count - 1) as f64
                });
                (
                    key,
                    LevelStatistics {
                        level,
                        count,
                        mean,
                        variance,
                    },
                )
            })
            .collect())
    }
}
