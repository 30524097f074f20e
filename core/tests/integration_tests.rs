//! End-to-end tests of the laser/radar fusion filter
//!
//! These tests drive the public API the way the command line tool does: measurements are
//! fed one at a time through [FusionFilter], or a whole stream is run with
//! [sensorfusion::sim::run_filter] and scored against ground truth.
//!
//! The error bounds on the simulated track are not design goals. They are loose
//! regression checks derived from the noise levels of the default configuration.
//!
//! A CTRV state and its mirror (−v, ψ+π) describe the same motion, and a filter started
//! from a laser fix at rest can settle on either. Heading is therefore only compared
//! through the Cartesian velocity or modulo π.
use sensorfusion::config::FilterConfig;
use sensorfusion::fusion::FusionFilter;
use sensorfusion::messages::{
    MeasurementPackage, SensorType, read_measurement_file, write_measurement_file,
};
use sensorfusion::sim::{SensorNoise, TrackSimulation, run_filter, simulate_track};
use sensorfusion::{BayesianFilter, STATE_SIZE, wrap_to_pi};

use assert_approx_eq::assert_approx_eq;
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("sensorfusion_it_{}_{}", std::process::id(), name))
}

#[test]
fn laser_first_measurement_initializes_state() {
    let mut filter = FusionFilter::new(FilterConfig::default()).unwrap();
    let output = filter
        .process_measurement(&MeasurementPackage::laser(0, 1.0, 2.0))
        .unwrap()
        .unwrap();
    assert_eq!(
        output.state,
        DVector::from_vec(vec![1.0, 2.0, 0.0, 0.0, 0.0])
    );
    assert_eq!(
        output.covariance,
        DMatrix::<f64>::identity(STATE_SIZE, STATE_SIZE)
    );
    assert_eq!(output.nis, None);
    assert_eq!(filter.nis_laser(), None);
}

#[test]
fn radar_first_measurement_initializes_state() {
    let mut filter = FusionFilter::new(FilterConfig::default()).unwrap();
    let output = filter
        .process_measurement(&MeasurementPackage::radar(0, 5.0, 0.0, 1.0))
        .unwrap()
        .unwrap();
    let expected = [5.0, 0.0, 1.0, 0.0, 0.0];
    for (i, value) in expected.iter().enumerate() {
        assert_approx_eq!(output.state[i], *value, 1e-12);
    }
}

#[test]
fn second_laser_measurement_corrects_prediction() {
    let mut filter = FusionFilter::new(FilterConfig::default()).unwrap();
    filter
        .process_measurement(&MeasurementPackage::laser(0, 1.0, 2.0))
        .unwrap();
    let mut predicted = filter.filter().clone();
    predicted.predict(0.1).unwrap();

    let output = filter
        .process_measurement(&MeasurementPackage::laser(100_000, 1.1, 2.05))
        .unwrap()
        .unwrap();
    let prior = predicted.state();
    let posterior = output.ctrv_state();
    // closer to the measurement than the prediction was
    let before = (prior.position_x - 1.1).hypot(prior.position_y - 2.05);
    let after = (posterior.position_x - 1.1).hypot(posterior.position_y - 2.05);
    assert!(after < before);
    assert!(output.covariance.trace() < predicted.get_certainty().trace());
    assert!(output.nis.unwrap() >= 0.0);
    assert_eq!(filter.previous_timestamp_us(), 100_000);
}

#[test]
fn disabled_radar_leaves_filter_untouched() {
    let config = FilterConfig {
        use_radar: false,
        ..FilterConfig::default()
    };
    let mut filter = FusionFilter::new(config).unwrap();
    filter
        .process_measurement(&MeasurementPackage::laser(0, 1.0, 2.0))
        .unwrap();
    let state = filter.state();
    let covariance = filter.covariance();
    let output = filter
        .process_measurement(&MeasurementPackage::radar(100_000, 3.0, 0.5, 1.0))
        .unwrap();
    assert!(output.is_none());
    assert_eq!(filter.state(), state);
    assert_eq!(filter.covariance(), covariance);
    assert_eq!(filter.nis_radar(), None);
}

#[test]
fn heading_stays_wrapped_through_a_full_turn() {
    let mut filter = FusionFilter::new(FilterConfig::default()).unwrap();
    let sim = TrackSimulation {
        initial_state: [5.0, 0.0, 3.0, PI / 2.0, 0.6],
        duration_s: 15.0,
        ..Default::default()
    };
    let records = simulate_track(&sim, &SensorNoise::default(), 3).unwrap();
    for record in &records {
        if let Ok(Some(output)) = filter.process_measurement(&record.package) {
            let yaw = output.state[3];
            assert!(yaw > -PI && yaw <= PI, "yaw {}", yaw);
            let p = &output.covariance;
            assert!((p - p.transpose()).amax() < 1e-9);
        }
    }
    // circles around the origin at radius 5, so the heading crosses the cut repeatedly
    let truth = records.last().unwrap().ground_truth.unwrap();
    let estimate = sensorfusion::CtrvState::from_slice(filter.state().as_slice());
    let (vx, vy) = estimate.velocity();
    assert!((vx - truth.vx).hypot(vy - truth.vy) < 1.5, "{:?}", filter.state());
    // heading modulo π, which ignores the sign of the speed
    let truth_yaw = truth.vy.atan2(truth.vx);
    let yaw_error = wrap_to_pi(estimate.yaw - truth_yaw).abs();
    assert!(yaw_error.min(PI - yaw_error) < 0.5, "{:?}", filter.state());
}

#[test]
fn simulated_track_is_tracked() {
    let mut filter = FusionFilter::new(FilterConfig::default()).unwrap();
    let records = simulate_track(&TrackSimulation::default(), &SensorNoise::default(), 42).unwrap();
    let result = run_filter(&mut filter, &records, "simulated");
    assert_eq!(result.failed_updates, 0);
    assert_eq!(result.records.len(), records.len());

    let rmse = result.rmse().unwrap();
    assert!(rmse.px < 0.3, "{}", rmse);
    assert!(rmse.py < 0.3, "{}", rmse);
    assert!(rmse.vx < 1.5, "{}", rmse);
    assert!(rmse.vy < 1.5, "{}", rmse);

    for sensor in [SensorType::Laser, SensorType::Radar] {
        let summary = result.nis_summary(sensor).unwrap();
        assert!(summary.count > 200);
        assert!(summary.mean > 0.0 && summary.mean.is_finite());
        assert!(summary.fraction_above_95 < 0.25, "{:?}: {}", sensor, summary);
    }
    assert!(result.records.iter().filter_map(|r| r.nis).all(|nis| nis >= 0.0));
}

#[test]
fn laser_only_tracking() {
    let config = FilterConfig {
        use_radar: false,
        ..FilterConfig::default()
    };
    let mut filter = FusionFilter::new(config).unwrap();
    let records = simulate_track(&TrackSimulation::default(), &SensorNoise::default(), 9).unwrap();
    let result = run_filter(&mut filter, &records, "laser only");
    assert_eq!(result.records.len(), records.len().div_ceil(2));
    assert!(result.records.iter().all(|r| r.sensor == SensorType::Laser));
    assert!(result.nis_summary(SensorType::Radar).is_none());
    let rmse = result.rmse().unwrap();
    assert!(rmse.px < 0.3 && rmse.py < 0.3, "{}", rmse);
}

#[test]
fn measurement_file_and_config_file_pipeline() {
    let measurements = temp_path("pipeline.txt");
    let config_file = temp_path("pipeline.yaml");
    let estimates = temp_path("pipeline.csv");

    let sim = TrackSimulation {
        duration_s: 5.0,
        ..Default::default()
    };
    let records = simulate_track(&sim, &SensorNoise::default(), 11).unwrap();
    write_measurement_file(&measurements, &records).unwrap();
    let mut config = FilterConfig::default();
    config.process_noise.acceleration_std = 1.0;
    config.to_file(&config_file).unwrap();

    let read_back = read_measurement_file(&measurements).unwrap();
    assert_eq!(read_back.len(), records.len());
    let config = FilterConfig::from_file(&config_file).unwrap();
    assert_eq!(config.process_noise.acceleration_std, 1.0);

    let mut filter = FusionFilter::new(config).unwrap();
    let result = run_filter(&mut filter, &read_back, "pipeline");
    result.to_csv(&estimates).unwrap();
    let reloaded = sensorfusion::sim::EstimationResult::from_csv(&estimates, "pipeline").unwrap();
    assert_eq!(reloaded.records, result.records);

    for path in [measurements, config_file, estimates] {
        let _ = std::fs::remove_file(path);
    }
}

#[test]
fn failed_update_is_counted_and_skipped() {
    let mut filter = FusionFilter::new(FilterConfig::default()).unwrap();
    let records = vec![
        sensorfusion::messages::MeasurementRecord {
            package: MeasurementPackage::laser(0, 0.0, 0.0),
            ground_truth: None,
        },
        // radar model is singular at the origin
        sensorfusion::messages::MeasurementRecord {
            package: MeasurementPackage::radar(50_000, 0.0, 0.0, 0.0),
            ground_truth: None,
        },
        sensorfusion::messages::MeasurementRecord {
            package: MeasurementPackage::laser(100_000, 0.1, 0.0),
            ground_truth: None,
        },
    ];
    let result = run_filter(&mut filter, &records, "singular");
    assert_eq!(result.failed_updates, 1);
    assert_eq!(result.records.len(), 2);
    assert_eq!(filter.previous_timestamp_us(), 100_000);
}
