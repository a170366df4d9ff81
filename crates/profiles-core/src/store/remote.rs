use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use profiles_tables::{
    property_text, Entity, TableClient, TableError, PARTITION_KEY, ROW_KEY, SYSTEM_PROPERTIES,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::schema::{self, RawRow};
use super::{CoefficientStore, CopterTable, Loaded, MalformedRecord, StoreError};
use crate::model::{ScoopAssignment, ScoopId, SensorRecord};

pub const BACKEND_NAME: &str = "table-store";

pub const COPTERS_TABLE: &str = "Copters";
pub const SCOOPS_TABLE: &str = "Scoops";
pub const MASTER_COEF_TABLE: &str = "MasterCoef";

/// Bounded exponential backoff applied to transient table failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1).min(16));
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Coefficient store over the `Copters`, `Scoops` and `MasterCoef` tables.
pub struct TableStore<C> {
    client: C,
    retry: RetryPolicy,
}

impl<C: TableClient> TableStore<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn with_retries<F, Fut>(&self, table: &str, query: F) -> Result<Vec<Entity>, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<Entity>, TableError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match query().await {
                Ok(entities) => {
                    debug!(table, rows = entities.len(), attempt, "table query succeeded");
                    return Ok(entities);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(table, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying table query");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(StoreError::BackendUnavailable {
                        backend: BACKEND_NAME,
                        reason: format!("{table}: {err} (after {attempt} attempt(s))"),
                    });
                }
            }
        }
    }
}

fn text(entity: &Entity, key: &str) -> Option<String> {
    entity.get(key).and_then(property_text)
}

/// Non-system properties of an entity, in the order the service returned them.
fn payload(entity: &Entity) -> impl Iterator<Item = (&str, String)> {
    entity
        .iter()
        .filter(|(name, _)| !SYSTEM_PROPERTIES.contains(&name.as_str()))
        .filter_map(|(name, value)| property_text(value).map(|text| (name.as_str(), text)))
}

fn copter_row(entity: &Entity) -> RawRow {
    let mut row = RawRow::new();
    row.push("platformId", text(entity, ROW_KEY).unwrap_or_default());
    row.push("name", text(entity, "Name").unwrap_or_default());
    if let Some(scoop) = text(entity, "ScoopID") {
        row.push("scoopId", scoop);
    }
    row
}

fn scoop_row(entity: &Entity) -> RawRow {
    let mut row = RawRow::new();
    row.push("validFrom", text(entity, ROW_KEY).unwrap_or_default());
    for (name, value) in payload(entity) {
        row.push(name, value);
    }
    row
}

/// `SerialNumber` may be stored as a property when the row key has to carry a
/// version suffix; otherwise the row key is the serial.
fn coef_row(entity: &Entity) -> RawRow {
    let mut row = RawRow::new();
    row.push("SensorType", text(entity, PARTITION_KEY).unwrap_or_default());
    let serial = text(entity, "SerialNumber").or_else(|| text(entity, ROW_KEY));
    row.push("SerialNumber", serial.unwrap_or_default());
    for (name, value) in payload(entity) {
        if !name.eq_ignore_ascii_case("SerialNumber") {
            row.push(name, value);
        }
    }
    row
}

#[async_trait]
impl<C: TableClient> CoefficientStore for TableStore<C> {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn fetch_copter_table(&self) -> Result<Loaded<CopterTable>, StoreError> {
        let entities = self
            .with_retries(COPTERS_TABLE, || self.client.query_table(COPTERS_TABLE))
            .await?;

        let mut table = CopterTable::new();
        let mut skipped = Vec::new();
        for (idx, entity) in entities.iter().enumerate() {
            match schema::platform_from_row(&copter_row(entity)) {
                Ok(mapping) => {
                    table.insert(mapping.platform_id, mapping);
                }
                Err(reason) => skipped.push(MalformedRecord::new(COPTERS_TABLE, idx + 1, reason)),
            }
        }

        for malformed in &skipped {
            warn!(%malformed, "skipping platform entity");
        }
        Ok(Loaded::new(table, skipped))
    }

    async fn fetch_scoop_history(
        &self,
        scoop_id: &ScoopId,
    ) -> Result<Loaded<Vec<ScoopAssignment>>, StoreError> {
        let entities = self
            .with_retries(SCOOPS_TABLE, || {
                self.client.query_partition(SCOOPS_TABLE, scoop_id.as_str())
            })
            .await?;

        let mut rows = Vec::new();
        let mut skipped = Vec::new();
        for (idx, entity) in entities.iter().enumerate() {
            match schema::assignment_from_row(scoop_id, &scoop_row(entity)) {
                Ok(assignment) => rows.push((idx + 1, assignment)),
                Err(reason) => skipped.push(MalformedRecord::new(SCOOPS_TABLE, idx + 1, reason)),
            }
        }

        let history = schema::order_history(SCOOPS_TABLE, rows, &mut skipped);
        for malformed in &skipped {
            warn!(%malformed, "skipping scoop entity");
        }
        debug!(scoop = %scoop_id, assignments = history.len(), "loaded scoop history");
        Ok(Loaded::new(history, skipped))
    }

    async fn fetch_master_coef_list(&self) -> Result<Loaded<Vec<SensorRecord>>, StoreError> {
        let entities = self
            .with_retries(MASTER_COEF_TABLE, || {
                self.client.query_table(MASTER_COEF_TABLE)
            })
            .await?;

        let mut rows = Vec::new();
        let mut skipped = Vec::new();
        for (idx, entity) in entities.iter().enumerate() {
            match schema::sensor_from_row(&coef_row(entity)) {
                Ok(record) => rows.push((idx + 1, record)),
                Err(reason) => {
                    skipped.push(MalformedRecord::new(MASTER_COEF_TABLE, idx + 1, reason))
                }
            }
        }

        let records = schema::dedupe_sensors(MASTER_COEF_TABLE, rows, &mut skipped);
        for malformed in &skipped {
            warn!(%malformed, "skipping coefficient entity");
        }
        Ok(Loaded::new(records, skipped))
    }

    async fn list_scoops(&self) -> Result<Vec<ScoopId>, StoreError> {
        let entities = self
            .with_retries(SCOOPS_TABLE, || self.client.query_table(SCOOPS_TABLE))
            .await?;

        let scoops: BTreeSet<ScoopId> = entities
            .iter()
            .filter_map(|entity| text(entity, PARTITION_KEY))
            .filter(|id| !id.trim().is_empty())
            .map(ScoopId::new)
            .collect();
        Ok(scoops.into_iter().collect())
    }
}
