use polars::prelude::*;

use profiles_core::regrid::{regrid, Grid, GridAxis, RegridError};

fn column(frame: &DataFrame, name: &str) -> Vec<Option<f64>> {
    frame
        .column(name)
        .expect("column")
        .as_materialized_series()
        .f64()
        .expect("f64")
        .into_iter()
        .collect()
}

fn flags(frame: &DataFrame, name: &str) -> Vec<Option<String>> {
    frame
        .column(name)
        .expect("column")
        .as_materialized_series()
        .str()
        .expect("str")
        .into_iter()
        .map(|flag| flag.map(str::to_string))
        .collect()
}

fn sounding() -> DataFrame {
    df![
        "alt_m" => &[0.0, 3.0, 7.0, 12.0, 18.0, 25.0],
        "time_s" => &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
        "temp_k" => &[Some(290.0), Some(289.7), Some(289.3), None, Some(288.2), Some(287.5)],
        "temp_k_flag" => &["valid", "valid", "out_of_range", "missing", "valid", "valid"],
        "label" => &["a", "b", "c", "d", "e", "f"],
    ]
    .expect("df")
}

#[test]
fn base_grid_interpolates_between_valid_samples() {
    let frame = sounding();
    let grid = Grid::from_frame(&frame, GridAxis::Altitude, 5.0).expect("grid");
    assert_eq!(grid.levels(), &[0.0, 5.0, 10.0, 15.0, 20.0, 25.0]);

    let gridded = regrid(&frame, &grid, 2.0).expect("regrid");
    assert!(gridded.column("label").is_err());

    let temps = column(&gridded, "temp_k");
    assert_eq!(temps[0], Some(290.0));
    assert!((temps[1].expect("5 m") - 289.5).abs() < 1e-9);
    // 12 m is missing, so 10 and 15 m bridge 7 m and 18 m.
    assert!((temps[2].expect("10 m") - (289.3 + (288.2 - 289.3) * 3.0 / 11.0)).abs() < 1e-9);
    assert_eq!(temps[5], Some(287.5));

    let flags = flags(&gridded, "temp_k_flag");
    assert_eq!(flags[0].as_deref(), Some("valid"));
    assert_eq!(flags[1].as_deref(), Some("out_of_range"));
    assert_eq!(flags[2].as_deref(), Some("out_of_range"));
    assert_eq!(flags[4].as_deref(), Some("valid"));

    let times = column(&gridded, "time_s");
    assert!((times[1].expect("time") - 1.5).abs() < 1e-9);
}

#[test]
fn regrid_is_idempotent() {
    let frame = sounding();
    let grid = Grid::from_frame(&frame, GridAxis::Altitude, 5.0).expect("grid");

    let once = regrid(&frame, &grid, 5.0).expect("first pass");
    let twice = regrid(&once, &grid, 5.0).expect("second pass");
    assert!(once.equals_missing(&twice));
}

#[test]
fn levels_beyond_tolerance_are_rejected() {
    let frame = sounding();
    let grid = Grid::base(GridAxis::Altitude, 0.0, 40.0, 5.0).expect("grid");

    match regrid(&frame, &grid, 5.0) {
        Err(RegridError::InsufficientCoverage { level, max, .. }) => {
            assert_eq!(level, 35.0);
            assert_eq!(max, 25.0);
        }
        other => panic!("expected insufficient coverage, got {other:?}"),
    }

    let grid = Grid::base(GridAxis::Altitude, 0.0, 30.0, 5.0).expect("grid");
    let gridded = regrid(&frame, &grid, 5.0).expect("within tolerance");
    assert_eq!(column(&gridded, "temp_k")[6], Some(287.5));

    let gridded = regrid(&frame, &grid.restricted(0.0, 25.0), 0.0).expect("restricted");
    assert_eq!(gridded.height(), 6);
}

#[test]
fn time_axis_grids_on_elapsed_seconds() {
    let frame = sounding();
    let grid = Grid::from_frame(&frame, GridAxis::Time, 2.0).expect("grid");
    assert_eq!(grid.levels(), &[0.0, 2.0, 4.0]);

    let gridded = regrid(&frame, &grid, 0.0).expect("regrid");
    assert_eq!(column(&gridded, "alt_m"), vec![Some(0.0), Some(7.0), Some(18.0)]);
    assert_eq!(grid.level_key(4.0), 2);
}

#[test]
fn null_sample_on_a_level_is_bridged_by_its_neighbours() {
    let frame = df![
        "alt_m" => &[0.0, 7.0, 15.0, 18.0, 25.0],
        "temp_k" => &[Some(290.0), Some(289.3), None, Some(288.2), Some(287.5)],
        "temp_k_flag" => &["valid", "valid", "missing", "valid", "valid"],
    ]
    .expect("df");
    let grid = Grid::from_frame(&frame, GridAxis::Altitude, 5.0).expect("grid");

    let gridded = regrid(&frame, &grid, 0.0).expect("regrid");
    let temps = column(&gridded, "temp_k");
    let expected = 289.3 + (288.2 - 289.3) * 8.0 / 11.0;
    assert!((temps[3].expect("15 m") - expected).abs() < 1e-9);
    assert!(temps.iter().all(Option::is_some));
    assert_eq!(flags(&gridded, "temp_k_flag")[3].as_deref(), Some("valid"));

    let again = regrid(&gridded, &grid, 0.0).expect("second pass");
    assert!(gridded.equals_missing(&again));
}
