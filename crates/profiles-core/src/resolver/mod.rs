//! Time-valid lookups over a [`CoefficientTables`] snapshot.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::cache::CoefficientTables;
use crate::meta::FlightMeta;
use crate::model::{PlatformId, ScoopId, SensorRecord, SensorSlot, SensorType, SerialNumber};

pub mod coefficients;
pub mod scoop;

pub use coefficients::{
    CoefficientDowngrade, DowngradeReason, Resolution, ResolvedSensor, SensorCalibrations,
};
pub use scoop::ScoopSource;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("platform {platform_id} is not in the copter table")]
    UnknownPlatform { platform_id: PlatformId },
    #[error("no scoop recorded for platform {platform_id}: it has no fixed scoop and the flight metadata names none")]
    UnresolvedScoop { platform_id: PlatformId },
    #[error("scoop {scoop_id} has no assignment history")]
    UnknownScoop { scoop_id: ScoopId },
    #[error("every assignment of scoop {scoop_id} postdates the flight on {flight_date}")]
    NoAssignmentBeforeDate {
        scoop_id: ScoopId,
        flight_date: NaiveDate,
    },
    #[error("no default coefficients (serial 0) for sensor type {sensor_type} valid on {flight_date}")]
    NoDefaultCoefficients {
        sensor_type: SensorType,
        flight_date: NaiveDate,
    },
}

/// Whether a record dated exactly on the flight date is already in effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityRule {
    #[default]
    Inclusive,
    Exclusive,
}

impl ValidityRule {
    pub fn in_effect(self, valid_from: NaiveDate, flight_date: NaiveDate) -> bool {
        match self {
            ValidityRule::Inclusive => valid_from <= flight_date,
            ValidityRule::Exclusive => valid_from < flight_date,
        }
    }
}

/// Latest entry of a date-sorted slice that is in effect on `date`.
pub fn latest_at_or_before<T>(
    sorted: &[T],
    date: NaiveDate,
    rule: ValidityRule,
    valid_from: impl Fn(&T) -> NaiveDate,
) -> Option<&T> {
    let idx = sorted.partition_point(|item| rule.in_effect(valid_from(item), date));
    idx.checked_sub(1).map(|last| &sorted[last])
}

/// Resolution entry point bound to one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    tables: &'a CoefficientTables,
    rule: ValidityRule,
}

impl<'a> Resolver<'a> {
    pub fn new(tables: &'a CoefficientTables) -> Self {
        Self {
            tables,
            rule: ValidityRule::default(),
        }
    }

    pub fn with_rule(mut self, rule: ValidityRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn tables(&self) -> &'a CoefficientTables {
        self.tables
    }

    pub fn rule(&self) -> ValidityRule {
        self.rule
    }

    pub fn platform_name(&self, platform_id: PlatformId) -> Option<&'a str> {
        self.tables.platform_name(platform_id)
    }

    pub(crate) fn sensor_versions(
        &self,
        sensor_type: &SensorType,
        serial: &SerialNumber,
    ) -> &'a [SensorRecord] {
        self.tables
            .sensor_versions(sensor_type, serial)
            .unwrap_or_default()
    }

    /// Resolves scoop, serials and coefficients for every UTC date a flight
    /// touches. Any resolution failure fails the whole flight.
    ///
    /// With `with_wind`, a wind slot is resolved even if the scoop lists
    /// none, keyed by the platform tail number.
    pub fn resolve_flight(
        &self,
        platform_id: PlatformId,
        meta: &FlightMeta,
        sample_dates: &[NaiveDate],
        with_wind: bool,
    ) -> Result<FlightResolution, ResolutionError> {
        let dates: BTreeSet<NaiveDate> = sample_dates.iter().copied().collect();
        let first_date = dates
            .first()
            .copied()
            .or_else(|| meta.flight_date())
            .ok_or(ResolutionError::UnresolvedScoop { platform_id })?;

        let (scoop_id, scoop_source) = self.resolve_scoop(platform_id, first_date, meta)?;
        let platform_name = self.platform_name(platform_id).map(str::to_string);

        let extra = if with_wind {
            let serial = platform_name
                .as_deref()
                .map(SerialNumber::new)
                .unwrap_or_else(|| SerialNumber::new("unknown"));
            vec![(SensorSlot::Wind, serial)]
        } else {
            Vec::new()
        };

        let mut segments = BTreeMap::new();
        for date in dates {
            let assignment = self.resolve_slot_serials(&scoop_id, date)?;
            let calibrations = self.resolve_assignment(assignment, date, &extra)?;
            segments.insert(date, calibrations);
        }

        let resolution = FlightResolution {
            platform_id,
            platform_name,
            scoop_id,
            scoop_source,
            segments,
        };
        if resolution.crosses_reassignment() {
            info!(
                platform_id,
                scoop = %resolution.scoop_id,
                "flight spans a scoop reassignment; calibrating each part separately"
            );
        }
        Ok(resolution)
    }
}

/// Everything resolved for one flight, one segment per UTC date.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightResolution {
    pub platform_id: PlatformId,
    pub platform_name: Option<String>,
    pub scoop_id: ScoopId,
    pub scoop_source: ScoopSource,
    pub segments: BTreeMap<NaiveDate, SensorCalibrations>,
}

impl FlightResolution {
    pub fn for_date(&self, date: NaiveDate) -> Option<&SensorCalibrations> {
        self.segments.get(&date)
    }

    pub fn downgrades(&self) -> impl Iterator<Item = &CoefficientDowngrade> {
        self.segments.values().flat_map(SensorCalibrations::downgrades)
    }

    /// Whether different segments use different scoop assignments.
    pub fn crosses_reassignment(&self) -> bool {
        let assignments: BTreeSet<NaiveDate> = self
            .segments
            .values()
            .map(|segment| segment.assignment_valid_from)
            .collect();
        assignments.len() > 1
    }

    pub fn slots(&self) -> BTreeSet<SensorSlot> {
        self.segments
            .values()
            .flat_map(|segment| segment.sensors.keys().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).expect("valid date")
    }

    #[test]
    fn latest_at_or_before_never_picks_a_future_entry() {
        let dates = [day(5), day(10), day(20)];
        let pick = |date, rule| latest_at_or_before(&dates[..], date, rule, |d| *d).copied();

        assert_eq!(pick(day(4), ValidityRule::Inclusive), None);
        assert_eq!(pick(day(5), ValidityRule::Inclusive), Some(day(5)));
        assert_eq!(pick(day(15), ValidityRule::Inclusive), Some(day(10)));
        assert_eq!(pick(day(31), ValidityRule::Inclusive), Some(day(20)));
    }

    #[test]
    fn exclusive_rule_defers_same_day_entries() {
        let dates = [day(5), day(10)];
        let pick = |date, rule| latest_at_or_before(&dates[..], date, rule, |d| *d).copied();

        assert_eq!(pick(day(10), ValidityRule::Inclusive), Some(day(10)));
        assert_eq!(pick(day(10), ValidityRule::Exclusive), Some(day(5)));
        assert_eq!(pick(day(5), ValidityRule::Exclusive), None);
    }
}
