//! Batch runs, evaluation, and synthetic data.
//!
//! This module provides:
//! - [run_filter], which feeds a recorded measurement stream through a [FusionFilter]
//! - [EstimationResult] for storing the estimates of a run, exporting them to CSV, and
//!   scoring them against ground truth (RMSE) and the NIS consistency bounds
//! - [simulate_track], which generates a noisy laser/radar stream with ground truth from
//!   a constant turn rate trajectory

use crate::config::{FilterConfig, LaserNoise, RadarNoise};
use crate::fusion::{FilterOutput, FusionFilter};
use crate::messages::{GroundTruth, MeasurementPackage, MeasurementRecord, SensorType};
use crate::{CtrvState, NoiseSample, forward, wrap_to_pi};

use anyhow::{Context, Result, bail};
use log::{error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};
use std::io;
use std::path::Path;

/// One row of an estimation CSV file.
///
/// Holds the estimate after a measurement, the measurement itself expressed as a
/// Cartesian position, and the ground truth and NIS when they are available.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimationRecord {
    pub timestamp_us: u64,
    pub sensor: SensorType,
    pub px: f64,
    pub py: f64,
    pub v: f64,
    pub yaw: f64,
    pub yaw_rate: f64,
    pub vx: f64,
    pub vy: f64,
    pub measured_px: f64,
    pub measured_py: f64,
    pub gt_px: Option<f64>,
    pub gt_py: Option<f64>,
    pub gt_vx: Option<f64>,
    pub gt_vy: Option<f64>,
    pub nis: Option<f64>,
}
impl EstimationRecord {
    pub fn new(
        output: &FilterOutput,
        package: &MeasurementPackage,
        ground_truth: Option<GroundTruth>,
    ) -> Self {
        let state = output.ctrv_state();
        let (vx, vy) = state.velocity();
        let (measured_px, measured_py) = package.position();
        EstimationRecord {
            timestamp_us: output.timestamp_us,
            sensor: output.sensor_type,
            px: state.position_x,
            py: state.position_y,
            v: state.speed,
            yaw: state.yaw,
            yaw_rate: state.yaw_rate,
            vx,
            vy,
            measured_px,
            measured_py,
            gt_px: ground_truth.map(|gt| gt.px),
            gt_py: ground_truth.map(|gt| gt.py),
            gt_vx: ground_truth.map(|gt| gt.vx),
            gt_vy: ground_truth.map(|gt| gt.vy),
            nis: output.nis,
        }
    }
    fn ground_truth(&self) -> Option<GroundTruth> {
        Some(GroundTruth {
            px: self.gt_px?,
            py: self.gt_py?,
            vx: self.gt_vx?,
            vy: self.gt_vy?,
        })
    }
}

/// Root mean squared error of the estimated position and velocity
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rmse {
    pub px: f64,
    pub py: f64,
    pub vx: f64,
    pub vy: f64,
}
impl Display for Rmse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RMSE px: {:.4}, py: {:.4}, vx: {:.4}, vy: {:.4}",
            self.px, self.py, self.vx, self.vy
        )
    }
}

/// NIS statistics for one sensor over a run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NisSummary {
    pub count: usize,
    pub mean: f64,
    /// Share of NIS values above the 95% chi-squared bound; close to 0.05 for a
    /// consistently tuned filter
    pub fraction_above_95: f64,
}
impl Display for NisSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} updates, mean NIS {:.3}, {:.1}% above the 95% bound",
            self.count,
            self.mean,
            100.0 * self.fraction_above_95
        )
    }
}

/// Estimates produced by a single run of the filter.
#[derive(Clone, Debug, Default)]
pub struct EstimationResult {
    pub name: String,
    pub records: Vec<EstimationRecord>,
    /// Measurements whose update failed and were skipped
    pub failed_updates: usize,
}
impl EstimationResult {
    pub fn new(name: &str) -> Self {
        EstimationResult {
            name: name.to_string(),
            ..Default::default()
        }
    }
    /// Writes the estimates to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Reads estimates previously written by [EstimationResult::to_csv].
    pub fn from_csv<P: AsRef<Path>>(path: P, name: &str) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let mut result = EstimationResult::new(name);
        for record in reader.deserialize() {
            result.records.push(record?);
        }
        Ok(result)
    }
    /// RMSE over every record that carries ground truth, `None` if none do.
    pub fn rmse(&self) -> Option<Rmse> {
        let mut sum = [0.0; 4];
        let mut count = 0usize;
        for record in &self.records {
            if let Some(gt) = record.ground_truth() {
                sum[0] += (record.px - gt.px).powi(2);
                sum[1] += (record.py - gt.py).powi(2);
                sum[2] += (record.vx - gt.vx).powi(2);
                sum[3] += (record.vy - gt.vy).powi(2);
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(Rmse {
            px: (sum[0] / n).sqrt(),
            py: (sum[1] / n).sqrt(),
            vx: (sum[2] / n).sqrt(),
            vy: (sum[3] / n).sqrt(),
        })
    }
    /// NIS statistics of one sensor, `None` if it never completed an update.
    pub fn nis_summary(&self, sensor: SensorType) -> Option<NisSummary> {
        let values: Vec<f64> = self
            .records
            .iter()
            .filter(|r| r.sensor == sensor)
            .filter_map(|r| r.nis)
            .collect();
        if values.is_empty() {
            return None;
        }
        let threshold = sensor.nis_threshold_95();
        let n = values.len() as f64;
        Some(NisSummary {
            count: values.len(),
            mean: values.iter().sum::<f64>() / n,
            fraction_above_95: values.iter().filter(|v| **v > threshold).count() as f64 / n,
        })
    }
}

/// Run the filter over a recorded stream, in order.
///
/// Ignored measurements (disabled sensors) produce no record. A failed update is logged,
/// counted, and skipped; the filter continues from its previous estimate.
pub fn run_filter(
    filter: &mut FusionFilter,
    records: &[MeasurementRecord],
    name: &str,
) -> EstimationResult {
    let mut result = EstimationResult::new(name);
    for (i, record) in records.iter().enumerate() {
        match filter.process_measurement(&record.package) {
            Ok(Some(output)) => result.records.push(EstimationRecord::new(
                &output,
                &record.package,
                record.ground_truth,
            )),
            Ok(None) => {}
            Err(e) => {
                error!(
                    "measurement {} ({} at {} us) failed: {}",
                    i, record.package.sensor_type, record.package.timestamp_us, e
                );
                result.failed_updates += 1;
            }
        }
    }
    info!(
        "{}: {} estimates from {} measurements, {} failed",
        name,
        result.records.len(),
        records.len(),
        result.failed_updates
    );
    result
}

/// Parameters of a synthetic constant turn rate trajectory.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackSimulation {
    pub initial_state: [f64; 5],
    pub duration_s: f64,
    /// Time between consecutive measurements; laser and radar alternate
    pub period_us: u64,
    pub start_timestamp_us: u64,
}
impl Default for TrackSimulation {
    fn default() -> Self {
        TrackSimulation {
            initial_state: [5.0, 2.0, 4.0, 0.0, 0.15],
            duration_s: 25.0,
            period_us: 50_000,
            start_timestamp_us: 1_477_010_443_000_000,
        }
    }
}

/// Measurement noise used to corrupt simulated measurements
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SensorNoise {
    pub laser: LaserNoise,
    pub radar: RadarNoise,
}
impl From<&FilterConfig> for SensorNoise {
    fn from(config: &FilterConfig) -> Self {
        SensorNoise {
            laser: config.laser_noise,
            radar: config.radar_noise,
        }
    }
}

fn normal(std: f64, what: &str) -> Result<Normal<f64>> {
    // Normal::new accepts a negative deviation and mirrors it
    if !(std.is_finite() && std > 0.0) {
        bail!("invalid {} standard deviation {}", what, std);
    }
    Normal::new(0.0, std).with_context(|| format!("invalid {} standard deviation {}", what, std))
}

/// Simulate an alternating laser/radar measurement stream along a CTRV trajectory.
///
/// The truth is propagated with the same motion model as the filter, without process
/// noise. The same seed always produces the same stream.
pub fn simulate_track(
    sim: &TrackSimulation,
    noise: &SensorNoise,
    seed: u64,
) -> Result<Vec<MeasurementRecord>> {
    if sim.period_us == 0 {
        bail!("simulation period must be positive");
    }
    if !(sim.duration_s.is_finite() && sim.duration_s >= 0.0) {
        bail!("invalid simulation duration {}", sim.duration_s);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let laser_x = normal(noise.laser.px_std, "laser px")?;
    let laser_y = normal(noise.laser.py_std, "laser py")?;
    let range = normal(noise.radar.range_std, "radar range")?;
    let bearing = normal(noise.radar.bearing_std, "radar bearing")?;
    let range_rate = normal(noise.radar.range_rate_std, "radar range rate")?;

    let dt = sim.period_us as f64 * 1e-6;
    let steps = (sim.duration_s * 1e6).round() as u64 / sim.period_us;
    let mut truth = CtrvState::from_slice(&sim.initial_state);
    let mut records = Vec::with_capacity(steps as usize + 1);
    for k in 0..=steps {
        if k > 0 {
            forward(&mut truth, NoiseSample::default(), dt);
        }
        let timestamp_us = sim.start_timestamp_us + k * sim.period_us;
        let (px, py) = (truth.position_x, truth.position_y);
        let (vx, vy) = truth.velocity();
        let package = if k % 2 == 0 {
            MeasurementPackage::laser(
                timestamp_us,
                px + laser_x.sample(&mut rng),
                py + laser_y.sample(&mut rng),
            )
        } else {
            let rho = px.hypot(py);
            MeasurementPackage::radar(
                timestamp_us,
                rho + range.sample(&mut rng),
                wrap_to_pi(py.atan2(px) + bearing.sample(&mut rng)),
                (px * vx + py * vy) / rho + range_rate.sample(&mut rng),
            )
        };
        records.push(MeasurementRecord {
            package,
            ground_truth: Some(GroundTruth { px, py, vx, vy }),
        });
    }
    Ok(records)
}
