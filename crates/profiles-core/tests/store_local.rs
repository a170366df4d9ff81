use std::path::PathBuf;

use profiles_core::cache::CoefficientTables;
use profiles_core::model::{Equation, ScoopId, SensorSlot, SensorStatus, SensorType, SerialNumber};
use profiles_core::store::{CoefficientStore, LocalCsvStore, StoreError};

fn coefs_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/coefs")
}

#[tokio::test]
async fn copter_table_skips_optional_header() {
    let store = LocalCsvStore::open(coefs_dir()).expect("store");
    let copters = store.fetch_copter_table().await.expect("copters");

    assert!(copters.skipped.is_empty());
    assert_eq!(copters.records.len(), 3);
    assert_eq!(copters.records[&1u32].platform_name, "N991UA");
    assert_eq!(copters.records[&1u32].scoop_id, None);
    assert_eq!(copters.records[&2u32].scoop_id, Some(ScoopId::new("B")));
    assert_eq!(copters.records[&3u32].scoop_id, None);
}

#[tokio::test]
async fn scoop_history_is_ordered_and_rejects_bad_rows() {
    let store = LocalCsvStore::open(coefs_dir()).expect("store");

    let scoops = store.list_scoops().await.expect("scoops");
    assert_eq!(scoops, vec![ScoopId::new("A"), ScoopId::new("B")]);

    let history = store
        .fetch_scoop_history(&ScoopId::new("A"))
        .await
        .expect("history");
    assert!(history.skipped.is_empty());
    assert_eq!(history.records.len(), 2);
    assert!(history.records[0].valid_from < history.records[1].valid_from);
    assert_eq!(
        history.records[0].serials.get(&SensorSlot::Imet(1)),
        Some(&SerialNumber::new("57562"))
    );
    assert!(!history.records[0].serials.contains_key(&SensorSlot::Wind));
    assert_eq!(history.records[1].engineer.as_deref(), Some("Jordan"));

    let history = store
        .fetch_scoop_history(&ScoopId::new("B"))
        .await
        .expect("history");
    assert_eq!(history.records.len(), 1);
    assert_eq!(history.skipped.len(), 2);
    assert_eq!(history.skipped[0].row, 3);
    assert!(history.skipped[1].reason.contains("duplicate validFrom"));
    assert_eq!(history.skipped[1].row, 2);
    assert_eq!(
        history.records[0].serials.get(&SensorSlot::Imet(1)),
        Some(&SerialNumber::new("99999"))
    );
}

#[tokio::test]
async fn malformed_coefficient_row_is_skipped_and_others_load() {
    let store = LocalCsvStore::open(coefs_dir()).expect("store");
    let loaded = store.fetch_master_coef_list().await.expect("coefficients");

    assert_eq!(loaded.records.len(), 23);
    assert_eq!(loaded.skipped.len(), 2);

    let malformed = &loaded.skipped[0];
    assert_eq!(malformed.row, 11);
    assert!(malformed.reason.contains("not numeric"), "{}", malformed.reason);
    assert!(loaded
        .records
        .iter()
        .all(|record| record.serial_number != SerialNumber::new("57567")));
    assert!(loaded.skipped[1].reason.contains("duplicate"));

    let defaulted = loaded
        .records
        .iter()
        .find(|record| record.serial_number == SerialNumber::new("58003"))
        .expect("58003");
    assert_eq!(defaulted.equation, Equation::ThermistorE2);
    assert_eq!(defaulted.status, SensorStatus::Active);

    let retired = loaded
        .records
        .iter()
        .find(|record| record.serial_number == SerialNumber::new("57570"))
        .expect("57570");
    assert_eq!(retired.status, SensorStatus::Retired);
}

#[tokio::test]
async fn tables_load_counts_every_source() {
    let store = LocalCsvStore::open(coefs_dir()).expect("store");
    let tables = CoefficientTables::load(&store).await.expect("tables");
    let report = tables.report();

    assert_eq!(report.backend, "local-csv");
    assert_eq!(report.platforms, 3);
    assert_eq!(report.scoops, 2);
    assert_eq!(report.assignments, 3);
    assert_eq!(report.sensor_records, 23);
    assert_eq!(report.skipped.len(), 4);
    assert!(!report.is_clean());

    let versions = tables
        .sensor_versions(&SensorType::IMet, &SerialNumber::new("57562"))
        .expect("versions");
    assert_eq!(versions.len(), 2);
    assert!(versions[0].valid_from.is_none());
}

#[tokio::test]
async fn unexpected_master_header_is_rejected() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/bad_header");
    let store = LocalCsvStore::open(dir).expect("store");
    let err = store.fetch_master_coef_list().await.expect_err("header");
    assert!(matches!(err, StoreError::InvalidHeader { .. }), "{err}");
}

#[test]
fn missing_directory_is_backend_unavailable() {
    let err = LocalCsvStore::open(coefs_dir().join("nope")).expect_err("missing");
    assert!(matches!(err, StoreError::BackendUnavailable { .. }));
}
