//! Filter configuration.
//!
//! All noise parameters are fixed configuration: they are set once when the filter is
//! built and never estimated. The measurement noise defaults are the values published
//! for the sensors; the process noise defaults suit an urban cyclist- or car-like target.
//!
//! Configurations can be stored as JSON, YAML, or TOML. The format is picked from the
//! file extension.
//!
//! ```
//! use sensorfusion::config::FilterConfig;
//!
//! let config = FilterConfig::default();
//! assert!(config.use_laser && config.use_radar);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::{FilterError, STATE_SIZE};

/// Process noise standard deviations driving the augmented sigma points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessNoise {
    /// Longitudinal acceleration noise (m/s²)
    pub acceleration_std: f64,
    /// Yaw acceleration noise (rad/s²)
    pub yaw_acceleration_std: f64,
}
impl Default for ProcessNoise {
    fn default() -> Self {
        ProcessNoise {
            acceleration_std: 3.0,
            yaw_acceleration_std: 0.5 * PI,
        }
    }
}

/// Laser measurement noise standard deviations (m)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaserNoise {
    pub px_std: f64,
    pub py_std: f64,
}
impl Default for LaserNoise {
    fn default() -> Self {
        LaserNoise {
            px_std: 0.15,
            py_std: 0.15,
        }
    }
}

/// Radar measurement noise standard deviations
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadarNoise {
    /// Range noise (m)
    pub range_std: f64,
    /// Bearing noise (rad)
    pub bearing_std: f64,
    /// Range rate noise (m/s)
    pub range_rate_std: f64,
}
impl Default for RadarNoise {
    fn default() -> Self {
        RadarNoise {
            range_std: 0.3,
            bearing_std: 0.03,
            range_rate_std: 0.3,
        }
    }
}

/// Logging preferences used by the command line tool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (off, error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path; logs go to stderr when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}
impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Complete configuration of the fusion filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Process laser measurements. When false they are ignored, including for initialization.
    pub use_laser: bool,
    /// Process radar measurements. When false they are ignored, including for initialization.
    pub use_radar: bool,
    pub process_noise: ProcessNoise,
    pub laser_noise: LaserNoise,
    pub radar_noise: RadarNoise,
    /// Diagonal of the covariance installed when the filter initializes
    pub initial_covariance_diagonal: [f64; STATE_SIZE],
    pub logging: LoggingConfig,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            use_laser: true,
            use_radar: true,
            process_noise: ProcessNoise::default(),
            laser_noise: LaserNoise::default(),
            radar_noise: RadarNoise::default(),
            initial_covariance_diagonal: [1.0; STATE_SIZE],
            logging: LoggingConfig::default(),
        }
    }
}

impl FilterConfig {
    /// Check that every standard deviation and initial variance is finite and strictly positive.
    ///
    /// A zero or negative noise term would make the augmented or innovation covariance
    /// singular, so such configurations are rejected up front.
    pub fn validate(&self) -> Result<(), FilterError> {
        let named = [
            ("process_noise.acceleration_std", self.process_noise.acceleration_std),
            (
                "process_noise.yaw_acceleration_std",
                self.process_noise.yaw_acceleration_std,
            ),
            ("laser_noise.px_std", self.laser_noise.px_std),
            ("laser_noise.py_std", self.laser_noise.py_std),
            ("radar_noise.range_std", self.radar_noise.range_std),
            ("radar_noise.bearing_std", self.radar_noise.bearing_std),
            ("radar_noise.range_rate_std", self.radar_noise.range_rate_std),
        ];
        for (name, value) in named {
            if !(value.is_finite() && value > 0.0) {
                return Err(FilterError::InvalidConfiguration(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if let Some(bad) = self
            .initial_covariance_diagonal
            .iter()
            .find(|v| !(v.is_finite() && **v > 0.0))
        {
            return Err(FilterError::InvalidConfiguration(format!(
                "initial_covariance_diagonal entries must be positive, got {}",
                bad
            )));
        }
        Ok(())
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
}

fn extension(p: &Path) -> Option<String> {
    p.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported_extension(p: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "unsupported config extension for {}; use .json, .yaml, .yml, or .toml",
            p.display()
        ),
    )
}
