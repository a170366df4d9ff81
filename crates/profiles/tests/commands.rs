use std::path::PathBuf;

use chrono::NaiveDate;
use profiles::commands::process::{process, ProcessArgs};
use profiles::commands::resolve::{self, ResolveArgs};
use profiles::commands::check_coefs;
use profiles_core::store::LocalCsvStore;
use profiles_core::{CoefficientTables, ProcessingConfig, ValidityRule};

fn core_data(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../profiles-core/tests/data")
        .join(relative)
}

async fn tables() -> CoefficientTables {
    let store = LocalCsvStore::open(core_data("coefs")).expect("store");
    CoefficientTables::load(&store).await.expect("tables")
}

fn resolve_args(platform: u32, scoop: Option<&str>) -> ResolveArgs {
    ResolveArgs {
        platform,
        date: NaiveDate::from_ymd_opt(2019, 7, 20).expect("valid date"),
        scoop: scoop.map(str::to_string),
        wind: false,
    }
}

#[tokio::test]
async fn check_coefs_reports_counts_and_skipped_rows() {
    let tables = tables().await;
    let report = check_coefs::render(&tables);

    assert!(report.contains("local-csv"));
    assert!(report.contains("23"));
    assert!(report.contains("Skipped rows:"));
    assert!(report.contains("scoopB"));
    assert!(report.contains("Tables loaded at"));
}

#[tokio::test]
async fn resolve_shows_fixed_scoop_and_downgrades() {
    let tables = tables().await;
    let report = resolve::render(&tables, ValidityRule::Inclusive, &resolve_args(2, Some("A")))
        .expect("resolve");

    assert!(report.starts_with("Platform 2 (N992UA) flies scoop B on 2019-07-20"));
    assert!(report.contains("FixedToPlatform"));
    assert!(report.contains("57565"));
    assert!(report.contains("WARNING:"));
    assert!(report.contains("99999"));
}

#[tokio::test]
async fn resolve_rejects_an_unknown_platform() {
    let tables = tables().await;
    let error = resolve::render(&tables, ValidityRule::Inclusive, &resolve_args(9, None))
        .expect_err("platform 9 is not in the copter table");

    assert!(format!("{error:#}").contains("platform 9 is not in the copter table"));
}

#[tokio::test]
async fn process_writes_profile_and_public_metadata() {
    let tables = tables().await;
    let out = tempfile::tempdir().expect("temp dir");
    let args = ProcessArgs {
        flights: vec![
            core_data("flights/n992_20190720"),
            out.path().join("no_such_flight"),
        ],
        glob: None,
        out: out.path().join("profiles"),
        leg: None,
    };

    let summary = process(&tables, &ProcessingConfig::default(), &args).expect("process");

    assert_eq!(summary.built, 1);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].source.ends_with("no_such_flight"));
    assert!(summary.report.contains("Failed flights:"));
    assert_eq!(summary.written.len(), 2);

    let profile_name = summary.written[0]
        .file_name()
        .and_then(|name| name.to_str())
        .expect("file name");
    assert!(profile_name.starts_with("N992UA_20190720_"));
    assert!(profile_name.ends_with("_ascent.csv"));

    let profile_csv = std::fs::read_to_string(&summary.written[0]).expect("profile csv");
    assert_eq!(profile_csv.lines().count(), 8);

    let meta_csv = std::fs::read_to_string(&summary.written[1]).expect("meta csv");
    assert!(summary.written[1].to_string_lossy().ends_with("_ascent_meta.csv"));
    assert!(meta_csv.contains("calm morning"));
    assert!(!meta_csv.contains("spare props used"));
    assert!(!meta_csv.contains("PIC"));
}

#[tokio::test]
async fn process_without_flights_is_an_error() {
    let tables = tables().await;
    let out = tempfile::tempdir().expect("temp dir");
    let args = ProcessArgs {
        flights: Vec::new(),
        glob: None,
        out: out.path().to_path_buf(),
        leg: None,
    };

    let error = process(&tables, &ProcessingConfig::default(), &args).expect_err("no flights");
    assert!(error.to_string().contains("no flight directories given"));
}
