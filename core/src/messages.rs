//! Timestamped sensor measurements and the text file format used to store them.
//!
//! One measurement per line, whitespace separated:
//!
//! ```text
//! L <px> <py> <timestamp_us> [<gt_px> <gt_py> <gt_vx> <gt_vy>]
//! R <rho> <phi> <rho_dot> <timestamp_us> [<gt_px> <gt_py> <gt_vx> <gt_vy>]
//! ```
//!
//! The trailing ground truth columns are optional. Columns past the fourth ground truth
//! value are ignored, so recordings that also log the true heading and yaw rate can be
//! read as they are. Blank lines and lines starting with `#` are skipped.

use anyhow::{Context, Result, bail};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

/// Sensor that produced a measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorType {
    /// Cartesian position sensor (lidar)
    Laser,
    /// Range, bearing, and range rate sensor
    Radar,
}
impl SensorType {
    /// Number of values the sensor reports
    pub fn dimension(&self) -> usize {
        match self {
            SensorType::Laser => 2,
            SensorType::Radar => 3,
        }
    }
    /// 95% quantile of the chi-squared distribution with [SensorType::dimension] degrees
    /// of freedom, the usual bound for a consistent NIS.
    pub fn nis_threshold_95(&self) -> f64 {
        match self {
            SensorType::Laser => 5.991,
            SensorType::Radar => 7.815,
        }
    }
}
impl Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorType::Laser => write!(f, "L"),
            SensorType::Radar => write!(f, "R"),
        }
    }
}
impl FromStr for SensorType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "L" | "l" => Ok(SensorType::Laser),
            "R" | "r" => Ok(SensorType::Radar),
            other => bail!("unknown sensor tag '{}', expected L or R", other),
        }
    }
}

/// A single timestamped sensor reading.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementPackage {
    pub sensor_type: SensorType,
    /// Microseconds; must be non-decreasing along a stream
    pub timestamp_us: u64,
    /// `[px, py]` for the laser, `[rho, phi, rho_dot]` for the radar
    pub raw_measurements: DVector<f64>,
}
impl MeasurementPackage {
    pub fn laser(timestamp_us: u64, px: f64, py: f64) -> Self {
        MeasurementPackage {
            sensor_type: SensorType::Laser,
            timestamp_us,
            raw_measurements: DVector::from_vec(vec![px, py]),
        }
    }
    pub fn radar(timestamp_us: u64, rho: f64, phi: f64, rho_dot: f64) -> Self {
        MeasurementPackage {
            sensor_type: SensorType::Radar,
            timestamp_us,
            raw_measurements: DVector::from_vec(vec![rho, phi, rho_dot]),
        }
    }
    pub fn dimension(&self) -> usize {
        self.raw_measurements.len()
    }
    /// Measured position in Cartesian coordinates
    pub fn position(&self) -> (f64, f64) {
        let z = &self.raw_measurements;
        match self.sensor_type {
            SensorType::Laser => (z[0], z[1]),
            SensorType::Radar => (z[0] * z[1].cos(), z[0] * z[1].sin()),
        }
    }
}

/// True kinematic state recorded alongside a measurement
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub px: f64,
    pub py: f64,
    pub vx: f64,
    pub vy: f64,
}

/// One line of a measurement file
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementRecord {
    pub package: MeasurementPackage,
    pub ground_truth: Option<GroundTruth>,
}
impl Display for MeasurementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package.sensor_type)?;
        for value in self.package.raw_measurements.iter() {
            write!(f, "\t{:e}", value)?;
        }
        write!(f, "\t{}", self.package.timestamp_us)?;
        if let Some(gt) = &self.ground_truth {
            write!(f, "\t{:e}\t{:e}\t{:e}\t{:e}", gt.px, gt.py, gt.vx, gt.vy)?;
        }
        Ok(())
    }
}

/// Parse one line of a measurement file.
///
/// Returns `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<MeasurementRecord>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let mut fields = trimmed.split_whitespace();
    let sensor_type: SensorType = fields.next().unwrap_or_default().parse()?;
    let fields: Vec<&str> = fields.collect();
    let n = sensor_type.dimension();
    if fields.len() < n + 1 {
        bail!(
            "{} record needs {} values and a timestamp, found {} fields",
            sensor_type,
            n,
            fields.len()
        );
    }
    let values = fields[..n]
        .iter()
        .map(|s| s.parse::<f64>().with_context(|| format!("invalid value '{}'", s)))
        .collect::<Result<Vec<f64>>>()?;
    let timestamp_us = fields[n]
        .parse::<u64>()
        .with_context(|| format!("invalid timestamp '{}'", fields[n]))?;
    let rest = &fields[n + 1..];
    let ground_truth = match rest.len() {
        0 => None,
        1..=3 => bail!("incomplete ground truth: expected 4 values, found {}", rest.len()),
        _ => {
            let gt = rest[..4]
                .iter()
                .map(|s| {
                    s.parse::<f64>()
                        .with_context(|| format!("invalid ground truth value '{}'", s))
                })
                .collect::<Result<Vec<f64>>>()?;
            Some(GroundTruth {
                px: gt[0],
                py: gt[1],
                vx: gt[2],
                vy: gt[3],
            })
        }
    };
    Ok(Some(MeasurementRecord {
        package: MeasurementPackage {
            sensor_type,
            timestamp_us,
            raw_measurements: DVector::from_vec(values),
        },
        ground_truth,
    }))
}

/// Read every measurement in a file, in file order.
pub fn read_measurement_file<P: AsRef<Path>>(path: P) -> Result<Vec<MeasurementRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if let Some(record) =
            parse_line(&line).with_context(|| format!("{}:{}", path.display(), i + 1))?
        {
            records.push(record);
        }
    }
    Ok(records)
}

/// Write measurements in the format read by [read_measurement_file].
pub fn write_measurement_file<P: AsRef<Path>>(path: P, records: &[MeasurementRecord]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        writeln!(writer, "{}", record)?;
    }
    writer.flush()?;
    Ok(())
}
