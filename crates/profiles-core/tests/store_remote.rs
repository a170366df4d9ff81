use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use profiles_core::cache::CoefficientTables;
use profiles_core::model::{ScoopId, SensorType, SerialNumber};
use profiles_core::store::remote::{COPTERS_TABLE, MASTER_COEF_TABLE, SCOOPS_TABLE};
use profiles_core::store::{CoefficientStore, LocalCsvStore, RetryPolicy, StoreError, TableStore};
use profiles_tables::{Entity, MemoryTableClient, TableClient, TableError};
use serde_json::{json, Value};

fn entity(value: Value) -> Entity {
    value.as_object().cloned().expect("object literal")
}

fn seeded_client() -> MemoryTableClient {
    let client = MemoryTableClient::new();
    client.upsert(COPTERS_TABLE, "copters", "1", entity(json!({ "Name": "N991UA" })));
    client.upsert(
        COPTERS_TABLE,
        "copters",
        "2",
        entity(json!({ "Name": "N992UA", "ScoopID": "B" })),
    );

    client.upsert(
        SCOOPS_TABLE,
        "A",
        "20200101",
        entity(json!({
            "imet1": "57562", "imet2": "57563", "imet3": "57564",
            "rh1": "4025", "rh2": "4026", "rh3": "4027",
            "Engineer": "Avery",
            "Timestamp": "2020-01-02T10:00:00Z",
        })),
    );
    client.upsert(
        SCOOPS_TABLE,
        "A",
        "20200615",
        entity(json!({
            "imet1": "58001", "imet2": "58002", "imet3": "58003",
            "rh1": "4101", "rh2": "4102", "rh3": "4103",
            "wind": "na",
            "Engineer": "Jordan",
        })),
    );

    let thermistor = |a: f64| {
        json!({
            "ScoopID": "A",
            "Equation": "E2",
            "A": a,
            "B": 2.63743049e-4,
            "C": 1.47415476e-7,
            "SensorStatus": "Active",
        })
    };
    client.upsert(MASTER_COEF_TABLE, "IMet", "57562", entity(thermistor(9.93118592e-4)));
    let mut dated = entity(thermistor(9.9e-4));
    dated.insert("SerialNumber".into(), json!("57562"));
    dated.insert("ValidFrom".into(), json!("2020-03-01"));
    client.upsert(MASTER_COEF_TABLE, "IMet", "57562-20200301", dated);
    client.upsert(
        MASTER_COEF_TABLE,
        "IMet",
        "0",
        entity(json!({
            "ScoopID": "na", "Equation": "E2",
            "A": 9.93118592e-4, "B": 2.63743049e-4, "C": 1.47415476e-7,
            "SensorStatus": "Active",
        })),
    );
    client.upsert(
        MASTER_COEF_TABLE,
        "RH",
        "4025",
        entity(json!({ "ScoopID": "A", "Equation": "offset", "Offset": 2.0, "SensorStatus": "Active" })),
    );
    client.upsert(
        MASTER_COEF_TABLE,
        "IMet",
        "57567",
        entity(json!({ "Equation": "E2", "A": "abc", "B": 2.6e-4, "C": 1.4e-7 })),
    );
    client
}

async fn local_tables() -> CoefficientTables {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/coefs");
    let store = LocalCsvStore::open(dir).expect("store");
    CoefficientTables::load(&store).await.expect("tables")
}

#[tokio::test]
async fn table_store_matches_local_files_for_equivalent_rows() {
    let store = TableStore::new(seeded_client());
    let remote = CoefficientTables::load(&store).await.expect("remote tables");
    let local = local_tables().await;

    assert_eq!(remote.report().backend, "table-store");
    assert_eq!(remote.platform(1), local.platform(1));
    assert_eq!(remote.platform(2), local.platform(2));

    let scoop = ScoopId::new("A");
    assert_eq!(remote.scoop_history(&scoop), local.scoop_history(&scoop));

    for (sensor_type, serial) in [
        (SensorType::IMet, "57562"),
        (SensorType::IMet, "0"),
        (SensorType::Rh, "4025"),
    ] {
        let serial = SerialNumber::new(serial);
        assert_eq!(
            remote.sensor_versions(&sensor_type, &serial),
            local.sensor_versions(&sensor_type, &serial),
            "{sensor_type} {serial}"
        );
    }

    let skipped = &remote.report().skipped;
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].source, MASTER_COEF_TABLE);
}

/// Fails with a transient error a fixed number of times before delegating.
struct FlakyClient {
    inner: MemoryTableClient,
    failures_left: AtomicU32,
    calls: AtomicU32,
    error: fn() -> TableError,
}

impl FlakyClient {
    fn new(failures: u32, error: fn() -> TableError) -> Self {
        Self {
            inner: seeded_client(),
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            error,
        }
    }

    fn fail(&self) -> Option<TableError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return None;
        }
        self.failures_left.store(left - 1, Ordering::SeqCst);
        Some((self.error)())
    }
}

#[async_trait]
impl TableClient for FlakyClient {
    async fn query_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<Entity>, TableError> {
        match self.fail() {
            Some(err) => Err(err),
            None => self.inner.query_partition(table, partition_key).await,
        }
    }

    async fn query_table(&self, table: &str) -> Result<Vec<Entity>, TableError> {
        match self.fail() {
            Some(err) => Err(err),
            None => self.inner.query_table(table).await,
        }
    }
}

fn throttled() -> TableError {
    TableError::Status {
        table: COPTERS_TABLE.to_string(),
        status: 503,
        message: "server busy".to_string(),
    }
}

fn forbidden() -> TableError {
    TableError::Status {
        table: COPTERS_TABLE.to_string(),
        status: 403,
        message: "bad signature".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let store = TableStore::new(FlakyClient::new(2, throttled));
    let copters = store.fetch_copter_table().await.expect("copters");
    assert_eq!(copters.records.len(), 2);
    assert_eq!(store.client().calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_backend_unavailable() {
    let retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 10,
        max_backoff_ms: 20,
    };
    let store = TableStore::new(FlakyClient::new(10, throttled)).with_retry(retry);
    let err = store.fetch_copter_table().await.expect_err("unavailable");

    match err {
        StoreError::BackendUnavailable { backend, reason } => {
            assert_eq!(backend, "table-store");
            assert!(reason.contains("after 3 attempt(s)"), "{reason}");
        }
        other => panic!("expected BackendUnavailable, got {other:?}"),
    }
    assert_eq!(store.client().calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let store = TableStore::new(FlakyClient::new(1, forbidden));
    let err = store.fetch_copter_table().await.expect_err("forbidden");
    assert!(matches!(err, StoreError::BackendUnavailable { .. }));
    assert_eq!(store.client().calls.load(Ordering::SeqCst), 1);
}
