use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::{ResolutionError, Resolver, ValidityRule};
use crate::model::{
    ScoopAssignment, SensorRecord, SensorSlot, SensorStatus, SensorType, SerialNumber,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowngradeReason {
    /// The scoop did not record a serial for the slot.
    UnknownSerial,
    /// No record exists for the serial.
    NotFound,
    /// Every version of the record postdates the flight.
    NotYetValid,
    /// The version in effect on the flight date is retired.
    Retired,
}

impl fmt::Display for DowngradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DowngradeReason::UnknownSerial => "serial unknown",
            DowngradeReason::NotFound => "no coefficients for serial",
            DowngradeReason::NotYetValid => "coefficients not yet valid",
            DowngradeReason::Retired => "sensor retired",
        };
        f.write_str(text)
    }
}

/// Soft warning: calibration proceeds with the generic record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoefficientDowngrade {
    pub sensor_type: SensorType,
    pub requested: SerialNumber,
    pub flight_date: NaiveDate,
    pub reason: DowngradeReason,
}

impl fmt::Display for CoefficientDowngrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on {}: {}; using default coefficients",
            self.sensor_type, self.requested, self.flight_date, self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub record: SensorRecord,
    pub downgrade: Option<CoefficientDowngrade>,
}

impl Resolution {
    pub fn is_downgraded(&self) -> bool {
        self.downgrade.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSensor {
    pub slot: SensorSlot,
    pub serial: SerialNumber,
    pub resolution: Resolution,
}

/// Coefficients for every slot of one scoop assignment on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorCalibrations {
    pub flight_date: NaiveDate,
    pub assignment_valid_from: NaiveDate,
    pub sensors: BTreeMap<SensorSlot, ResolvedSensor>,
}

impl SensorCalibrations {
    pub fn get(&self, slot: SensorSlot) -> Option<&ResolvedSensor> {
        self.sensors.get(&slot)
    }

    pub fn downgrades(&self) -> impl Iterator<Item = &CoefficientDowngrade> {
        self.sensors
            .values()
            .filter_map(|sensor| sensor.resolution.downgrade.as_ref())
    }

    /// Slots of one sensor type, in slot order.
    pub fn of_type<'s>(
        &'s self,
        sensor_type: &'s SensorType,
    ) -> impl Iterator<Item = &'s ResolvedSensor> + 's {
        self.sensors
            .values()
            .filter(move |sensor| sensor.slot.sensor_type() == *sensor_type)
    }
}

enum Lookup<'r> {
    Found(&'r SensorRecord),
    Missing(DowngradeReason),
}

/// Version in effect on `flight_date`. Undated versions sort first and apply
/// to every date; the latest dated version in effect replaces them.
///
/// Retirement follows the same rule: a `Retired` version with a `ValidFrom`
/// downgrades flights from that date on, while an undated `Retired` record
/// carries no retirement date and so downgrades every flight.
fn version_in_effect(
    versions: &[SensorRecord],
    flight_date: NaiveDate,
    rule: ValidityRule,
) -> Lookup<'_> {
    if versions.is_empty() {
        return Lookup::Missing(DowngradeReason::NotFound);
    }
    let idx = versions.partition_point(|record| {
        record
            .valid_from
            .map_or(true, |valid_from| rule.in_effect(valid_from, flight_date))
    });
    match idx.checked_sub(1).map(|last| &versions[last]) {
        None => Lookup::Missing(DowngradeReason::NotYetValid),
        Some(record) if record.status == SensorStatus::Retired => {
            Lookup::Missing(DowngradeReason::Retired)
        }
        Some(record) => Lookup::Found(record),
    }
}

impl<'a> Resolver<'a> {
    pub fn resolve_coefficients(
        &self,
        sensor_type: &SensorType,
        serial: &SerialNumber,
        flight_date: NaiveDate,
    ) -> Result<Resolution, ResolutionError> {
        let lookup = if serial.is_unknown() {
            Lookup::Missing(DowngradeReason::UnknownSerial)
        } else {
            version_in_effect(
                self.sensor_versions(sensor_type, serial),
                flight_date,
                self.rule(),
            )
        };

        let reason = match lookup {
            Lookup::Found(record) => {
                debug!(%sensor_type, %serial, %flight_date, "resolved coefficients");
                return Ok(Resolution {
                    record: record.clone(),
                    downgrade: None,
                });
            }
            Lookup::Missing(reason) => reason,
        };

        let default_serial = SerialNumber::default_record();
        let fallback = match version_in_effect(
            self.sensor_versions(sensor_type, &default_serial),
            flight_date,
            self.rule(),
        ) {
            Lookup::Found(record) => record,
            Lookup::Missing(_) => {
                return Err(ResolutionError::NoDefaultCoefficients {
                    sensor_type: sensor_type.clone(),
                    flight_date,
                })
            }
        };

        let downgrade = CoefficientDowngrade {
            sensor_type: sensor_type.clone(),
            requested: serial.clone(),
            flight_date,
            reason,
        };
        if !serial.is_default() {
            warn!(%downgrade, "coefficient downgrade");
        }

        Ok(Resolution {
            record: fallback.clone(),
            downgrade: (!serial.is_default()).then_some(downgrade),
        })
    }

    /// Resolves every slot the assignment lists. `extra` adds slots the
    /// scoop does not record, such as a platform-level wind sensor.
    pub fn resolve_assignment(
        &self,
        assignment: &ScoopAssignment,
        flight_date: NaiveDate,
        extra: &[(SensorSlot, SerialNumber)],
    ) -> Result<SensorCalibrations, ResolutionError> {
        let mut sensors = BTreeMap::new();
        let slots = assignment
            .serials
            .iter()
            .map(|(slot, serial)| (*slot, serial.clone()))
            .chain(
                extra
                    .iter()
                    .filter(|(slot, _)| !assignment.serials.contains_key(slot))
                    .cloned(),
            );

        for (slot, serial) in slots {
            let resolution =
                self.resolve_coefficients(&slot.sensor_type(), &serial, flight_date)?;
            sensors.insert(
                slot,
                ResolvedSensor {
                    slot,
                    serial,
                    resolution,
                },
            );
        }

        Ok(SensorCalibrations {
            flight_date,
            assignment_valid_from: assignment.valid_from,
            sensors,
        })
    }
}
