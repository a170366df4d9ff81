use profiles_core::calibration::{
    rh_offset, thermistor_e2, wind_e1, Calibration, CalibrationError, SampleFlag,
};
use profiles_core::model::{Coefficients, Equation, SensorRecord, SensorStatus, SensorType, SerialNumber};

const A: f64 = 9.93118592e-4;
const B: f64 = 2.63743049e-4;
const C: f64 = 1.47415476e-7;

fn record(sensor_type: SensorType, equation: Equation, coefficients: Coefficients) -> SensorRecord {
    SensorRecord {
        sensor_type,
        serial_number: SerialNumber::new("1"),
        scoop_id: None,
        equation,
        coefficients,
        status: SensorStatus::Active,
        valid_from: None,
    }
}

#[test]
fn thermistor_follows_the_e2_curve() {
    let out = thermistor_e2(1000.0, A, B, C);
    let ln_r = 1000f64.ln();
    let expected = 1.0 / (A + B * ln_r + C * ln_r.powi(3));

    assert_eq!(out.flag, SampleFlag::Valid);
    let value = out.value.expect("temperature");
    assert!((value - expected).abs() < 1e-9);
    assert!((value - 349.213).abs() < 1e-3, "{value}");

    assert_eq!(thermistor_e2(1000.0, A, B, C), out);
}

#[test]
fn non_positive_resistance_is_missing_not_nan() {
    for resistance in [0.0, -12.0] {
        let out = thermistor_e2(resistance, A, B, C);
        assert_eq!(out.flag, SampleFlag::Missing);
        assert_eq!(out.value, None);
    }
}

#[test]
fn rh_offset_is_clamped_and_flagged() {
    let out = rh_offset(50.0, 1843.0);
    assert_eq!(out.value, Some(100.0));
    assert_eq!(out.flag, SampleFlag::OutOfRange);

    let out = rh_offset(3.0, -10.0);
    assert_eq!(out.value, Some(0.0));
    assert_eq!(out.flag, SampleFlag::OutOfRange);
}

#[test]
fn calibration_from_record_dispatches_on_equation() {
    let rh = record(
        SensorType::Rh,
        Equation::HumidityOffset,
        Coefficients {
            offset: Some(1843.0),
            ..Coefficients::default()
        },
    );
    let calibration = Calibration::from_record(&rh).expect("offset");
    let out = calibration.apply_scalar(Some(50.0)).expect("scalar");
    assert_eq!(out.value, Some(100.0));
    assert_eq!(out.flag, SampleFlag::OutOfRange);
    assert_eq!(calibration.apply_scalar(None).expect("scalar").flag, SampleFlag::Missing);

    let incomplete = record(
        SensorType::IMet,
        Equation::ThermistorE2,
        Coefficients {
            a: Some(A),
            b: Some(B),
            ..Coefficients::default()
        },
    );
    let err = Calibration::from_record(&incomplete).expect_err("missing C");
    assert!(matches!(
        err,
        CalibrationError::MissingCoefficient { coefficient: "C", .. }
    ));

    let wind = record(
        SensorType::Wind,
        Equation::WindE1,
        Coefficients {
            a: Some(15.0),
            b: Some(-0.5),
            ..Coefficients::default()
        },
    );
    let calibration = Calibration::from_record(&wind).expect("wind");
    assert!(matches!(
        calibration.apply_scalar(Some(1.0)),
        Err(CalibrationError::WrongEquation { .. })
    ));
}

#[test]
fn wind_uses_the_attitude_formula() {
    let (pitch, roll, yaw) = (2.0f64, 80.0f64, 30.0f64);
    let sample = wind_e1(pitch, roll, yaw, 15.0, -0.5);

    let (p, r, y) = (pitch.to_radians(), roll.to_radians(), yaw.to_radians());
    let speed = 15.0 * (p.cos() - r.cos()).acos().tan().sqrt() - 0.5;
    let direction = (-y.cos() * r.sin())
        .atan2(y.sin() * r.sin() + p.sin() * y.cos() * r.cos())
        .rem_euclid(std::f64::consts::TAU);

    assert_eq!(sample.flag, SampleFlag::Valid);
    assert!((sample.speed_ms.expect("speed") - speed).abs() < 1e-9);
    assert!((sample.direction_rad.expect("direction") - direction).abs() < 1e-9);
}

#[test]
fn undefined_wind_is_missing() {
    // cos(pitch) < cos(roll) makes the tangent negative.
    let sample = wind_e1(5.0, 3.0, 0.0, 15.0, -0.5);
    assert_eq!(sample.flag, SampleFlag::Missing);
    assert_eq!(sample.speed_ms, None);
    assert_eq!(sample.direction_rad, None);

    let sample = wind_e1(f64::NAN, 3.0, 0.0, 15.0, -0.5);
    assert_eq!(sample.flag, SampleFlag::Missing);
}
