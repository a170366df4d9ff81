use chrono::NaiveDate;
use tracing::{debug, warn};

use super::{latest_at_or_before, ResolutionError, Resolver};
use crate::meta::FlightMeta;
use crate::model::{PlatformId, PlatformMapping, ScoopAssignment, ScoopId};

/// Where the scoop of a flight was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoopSource {
    /// The scoop is permanently mounted on the platform.
    FixedToPlatform,
    /// The flight metadata named the scoop.
    FlightMeta,
}

impl<'a> Resolver<'a> {
    pub fn platform(&self, platform_id: PlatformId) -> Result<&'a PlatformMapping, ResolutionError> {
        self.tables()
            .platform(platform_id)
            .ok_or(ResolutionError::UnknownPlatform { platform_id })
    }

    /// Scoop attached to `platform_id` for a flight. A fixed platform scoop
    /// wins over the one named in the flight metadata.
    pub fn resolve_scoop(
        &self,
        platform_id: PlatformId,
        flight_date: NaiveDate,
        meta: &FlightMeta,
    ) -> Result<(ScoopId, ScoopSource), ResolutionError> {
        let fixed = self
            .tables()
            .platform(platform_id)
            .and_then(|mapping| mapping.scoop_id.clone());
        let named = meta.scoop_id();

        match (fixed, named) {
            (Some(fixed), named) => {
                if let Some(named) = named.filter(|named| *named != fixed) {
                    warn!(
                        platform_id,
                        fixed = %fixed,
                        named = %named,
                        "flight metadata names a different scoop than the one fixed to the platform"
                    );
                }
                debug!(platform_id, %flight_date, scoop = %fixed, "using fixed platform scoop");
                Ok((fixed, ScoopSource::FixedToPlatform))
            }
            (None, Some(named)) => {
                debug!(platform_id, %flight_date, scoop = %named, "using scoop from flight metadata");
                Ok((named, ScoopSource::FlightMeta))
            }
            (None, None) => Err(ResolutionError::UnresolvedScoop { platform_id }),
        }
    }

    /// Assignment of `scoop_id` in effect on `flight_date`; its `serials`
    /// map each slot to the mounted sensor.
    pub fn resolve_slot_serials(
        &self,
        scoop_id: &ScoopId,
        flight_date: NaiveDate,
    ) -> Result<&'a ScoopAssignment, ResolutionError> {
        let history = self
            .tables()
            .scoop_history(scoop_id)
            .ok_or_else(|| ResolutionError::UnknownScoop {
                scoop_id: scoop_id.clone(),
            })?;

        latest_at_or_before(history, flight_date, self.rule(), |assignment| {
            assignment.valid_from
        })
        .ok_or_else(|| ResolutionError::NoAssignmentBeforeDate {
            scoop_id: scoop_id.clone(),
            flight_date,
        })
    }
}
