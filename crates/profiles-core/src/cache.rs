//! Per-run snapshot of the coefficient tables.
//!
//! A [`CoefficientTables`] value is fully loaded before it is published, and
//! [`CoefficientCache`] only ever swaps whole snapshots, so readers holding an
//! `Arc` keep a consistent view while a refresh is in flight.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::model::{PlatformMapping, ScoopAssignment, ScoopId, SensorRecord, SensorType, SerialNumber};
use crate::store::{CoefficientStore, CopterTable, MalformedRecord, StoreError};

/// Counts of what a load produced plus every row it skipped.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub backend: String,
    pub platforms: usize,
    pub scoops: usize,
    pub assignments: usize,
    pub sensor_records: usize,
    pub skipped: Vec<MalformedRecord>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

pub type SensorKey = (SensorType, SerialNumber);

#[derive(Debug, Clone)]
pub struct CoefficientTables {
    copters: CopterTable,
    histories: BTreeMap<ScoopId, Vec<ScoopAssignment>>,
    /// Versions of each sensor, undated record first, then by `valid_from`.
    sensors: BTreeMap<SensorKey, Vec<SensorRecord>>,
    report: LoadReport,
    loaded_at: DateTime<Utc>,
}

impl CoefficientTables {
    pub async fn load(store: &dyn CoefficientStore) -> Result<Self, StoreError> {
        let copters = store.fetch_copter_table().await?;
        let mut skipped = copters.skipped;

        let mut histories = BTreeMap::new();
        for scoop_id in store.list_scoops().await? {
            let history = store.fetch_scoop_history(&scoop_id).await?;
            skipped.extend(history.skipped);
            histories.insert(scoop_id, history.records);
        }

        let sensors = store.fetch_master_coef_list().await?;
        skipped.extend(sensors.skipped);

        let tables = Self::from_parts(copters.records, histories, sensors.records, skipped)
            .with_backend(store.backend_name());

        let report = tables.report();
        info!(
            backend = store.backend_name(),
            platforms = report.platforms,
            scoops = report.scoops,
            assignments = report.assignments,
            sensor_records = report.sensor_records,
            skipped = report.skipped.len(),
            "loaded coefficient tables"
        );
        if !report.is_clean() {
            warn!(skipped = report.skipped.len(), "coefficient tables loaded with skipped rows");
        }
        Ok(tables)
    }

    /// Builds a snapshot from already-normalized records.
    pub fn from_parts(
        copters: CopterTable,
        histories: BTreeMap<ScoopId, Vec<ScoopAssignment>>,
        records: Vec<SensorRecord>,
        skipped: Vec<MalformedRecord>,
    ) -> Self {
        let mut histories = histories;
        for history in histories.values_mut() {
            history.sort_by_key(|assignment| assignment.valid_from);
        }

        let record_count = records.len();
        let mut sensors: BTreeMap<SensorKey, Vec<SensorRecord>> = BTreeMap::new();
        for record in records {
            sensors
                .entry((record.sensor_type.clone(), record.serial_number.clone()))
                .or_default()
                .push(record);
        }
        for versions in sensors.values_mut() {
            versions.sort_by_key(|record| record.valid_from);
        }

        let report = LoadReport {
            backend: String::new(),
            platforms: copters.len(),
            scoops: histories.len(),
            assignments: histories.values().map(Vec::len).sum(),
            sensor_records: record_count,
            skipped,
        };

        Self {
            copters,
            histories,
            sensors,
            report,
            loaded_at: Utc::now(),
        }
    }

    fn with_backend(mut self, backend: &str) -> Self {
        self.report.backend = backend.to_string();
        self
    }

    pub fn platform(&self, platform_id: u32) -> Option<&PlatformMapping> {
        self.copters.get(&platform_id)
    }

    pub fn platforms(&self) -> impl Iterator<Item = &PlatformMapping> {
        self.copters.values()
    }

    /// Tail number of a platform.
    pub fn platform_name(&self, platform_id: u32) -> Option<&str> {
        self.platform(platform_id)
            .map(|mapping| mapping.platform_name.as_str())
    }

    pub fn scoop_history(&self, scoop_id: &ScoopId) -> Option<&[ScoopAssignment]> {
        self.histories.get(scoop_id).map(Vec::as_slice)
    }

    pub fn scoops(&self) -> impl Iterator<Item = &ScoopId> {
        self.histories.keys()
    }

    pub fn sensor_versions(
        &self,
        sensor_type: &SensorType,
        serial: &SerialNumber,
    ) -> Option<&[SensorRecord]> {
        self.sensors
            .get(&(sensor_type.clone(), serial.clone()))
            .map(Vec::as_slice)
    }

    pub fn sensor_records(&self) -> impl Iterator<Item = &SensorRecord> {
        self.sensors.values().flatten()
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Shared handle to the current snapshot. Refreshes load a complete new
/// snapshot before taking the write lock.
pub struct CoefficientCache {
    store: Arc<dyn CoefficientStore>,
    current: RwLock<Arc<CoefficientTables>>,
}

impl CoefficientCache {
    pub async fn load(store: Arc<dyn CoefficientStore>) -> Result<Self, StoreError> {
        let tables = CoefficientTables::load(store.as_ref()).await?;
        Ok(Self {
            store,
            current: RwLock::new(Arc::new(tables)),
        })
    }

    pub fn from_tables(store: Arc<dyn CoefficientStore>, tables: CoefficientTables) -> Self {
        Self {
            store,
            current: RwLock::new(Arc::new(tables)),
        }
    }

    pub async fn snapshot(&self) -> Arc<CoefficientTables> {
        Arc::clone(&*self.current.read().await)
    }

    /// Reloads every table from the store and publishes the result. On
    /// failure the previous snapshot stays current.
    pub async fn refresh(&self) -> Result<Arc<CoefficientTables>, StoreError> {
        let tables = Arc::new(CoefficientTables::load(self.store.as_ref()).await?);
        let mut current = self.current.write().await;
        *current = Arc::clone(&tables);
        info!(backend = self.store.backend_name(), "published refreshed coefficient tables");
        Ok(tables)
    }
}
