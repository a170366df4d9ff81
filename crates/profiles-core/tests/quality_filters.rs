use polars::prelude::*;

use profiles_core::quality_filters::{
    apply_quality_filters, ensemble_flags, ensemble_mean, EnsembleFlag, EnsembleLimits, QcReason,
    QcRules, EXPLANATION_COL,
};

fn thermo_frame() -> DataFrame {
    df![
        "alt_m" => &[0.0, 10.0, 20.0, 30.0, 40.0],
        "temp_k_imet1" => &[Some(250.0), Some(150.0), None, Some(400.0), Some(300.0)],
        "temp_k_imet1_flag" => &["valid", "valid", "missing", "valid", "out_of_range"],
    ]
    .expect("df")
}

#[test]
fn quality_filters_remove_out_of_bounds_samples() -> PolarsResult<()> {
    let (filtered, report) = apply_quality_filters(&thermo_frame(), &QcRules::default())?;

    let values: Vec<Option<f64>> = filtered
        .column("temp_k_imet1")?
        .as_materialized_series()
        .f64()?
        .into_iter()
        .collect();
    assert_eq!(values, vec![Some(250.0), None, None, None, Some(300.0)]);

    let flags: Vec<Option<&str>> = filtered
        .column("temp_k_imet1_flag")?
        .as_materialized_series()
        .str()?
        .into_iter()
        .collect();
    assert_eq!(
        flags,
        vec![
            Some("valid"),
            Some("missing"),
            Some("missing"),
            Some("missing"),
            Some("out_of_range"),
        ]
    );

    let explanations: Vec<Option<&str>> = filtered
        .column(EXPLANATION_COL)?
        .as_materialized_series()
        .str()?
        .into_iter()
        .collect();
    assert_eq!(explanations[0], None);
    assert_eq!(explanations[1], Some("temp_k_imet1_below_min"));
    assert_eq!(explanations[3], Some("temp_k_imet1_above_max"));

    assert_eq!(report.removed_count("temp_k_imet1", QcReason::BelowMin), 1);
    assert_eq!(report.removed_count("temp_k_imet1", QcReason::AboveMax), 1);
    assert_eq!(report.removed_count("temp_k_imet1", QcReason::CalibrationMissing), 1);
    assert_eq!(report.flagged_count("temp_k_imet1", QcReason::CalibrationOutOfRange), 1);
    assert_eq!(report.total_removed(), 3);

    // The axis column has no flag companion and is left alone.
    assert_eq!(filtered.column("alt_m")?.null_count(), 0);
    Ok(())
}

#[test]
fn clamped_samples_can_be_dropped() -> PolarsResult<()> {
    let rules = QcRules {
        drop_out_of_range: true,
        ..QcRules::default()
    };
    let (filtered, report) = apply_quality_filters(&thermo_frame(), &rules)?;

    let last = filtered
        .column("temp_k_imet1")?
        .as_materialized_series()
        .f64()?
        .get(4);
    assert_eq!(last, None);
    assert_eq!(
        report.removed_count("temp_k_imet1", QcReason::CalibrationOutOfRange),
        1
    );
    Ok(())
}

#[test]
fn biased_sensor_is_left_out_of_the_ensemble() {
    let limits = EnsembleLimits {
        max_bias: 2.0,
        max_sdev_diff: 2.0,
    };
    let sensors = vec![
        vec![Some(280.0), Some(281.0), Some(282.0)],
        vec![Some(280.5), Some(281.5), None],
        vec![Some(290.0), Some(291.0), Some(292.0)],
    ];

    let flags = ensemble_flags(&sensors, limits);
    assert_eq!(
        flags,
        vec![EnsembleFlag::Good, EnsembleFlag::Good, EnsembleFlag::Bias]
    );

    let mean = ensemble_mean(&sensors, &flags);
    assert_eq!(mean, vec![Some(280.25), Some(281.25), Some(282.0)]);
}

#[test]
fn noisy_sensor_is_flagged_for_variability() {
    let limits = EnsembleLimits {
        max_bias: 5.0,
        max_sdev_diff: 1.0,
    };
    let sensors = vec![
        vec![Some(280.0), Some(280.0), Some(280.0), Some(280.0)],
        vec![Some(280.1), Some(280.1), Some(280.1), Some(280.1)],
        vec![Some(276.0), Some(284.0), Some(276.0), Some(284.0)],
    ];

    let flags = ensemble_flags(&sensors, limits);
    assert_eq!(
        flags,
        vec![EnsembleFlag::Good, EnsembleFlag::Good, EnsembleFlag::Variability]
    );
}
