//! Measurement-by-measurement fusion controller.
//!
//! [FusionFilter] owns the unscented filter and feeds it one [MeasurementPackage] at a
//! time. The first accepted measurement seeds the state directly from whatever that
//! sensor observes; every later measurement runs a predict over the elapsed time followed
//! by the matching laser or radar update.
//!
//! ```
//! use sensorfusion::config::FilterConfig;
//! use sensorfusion::fusion::FusionFilter;
//! use sensorfusion::messages::MeasurementPackage;
//!
//! let mut filter = FusionFilter::new(FilterConfig::default()).unwrap();
//! filter.process_measurement(&MeasurementPackage::laser(0, 1.0, 2.0)).unwrap();
//! let output = filter
//!     .process_measurement(&MeasurementPackage::laser(100_000, 1.1, 2.05))
//!     .unwrap()
//!     .unwrap();
//! assert!(output.nis.unwrap() >= 0.0);
//! ```

use crate::config::FilterConfig;
use crate::kalman::UnscentedKalmanFilter;
use crate::measurements::{LaserMeasurement, RadarMeasurement};
use crate::messages::{MeasurementPackage, SensorType};
use crate::{BayesianFilter, CtrvState, FilterError, Result};

use std::fmt::{self, Debug};

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};

/// Callback invoked with the sensor, timestamp, and NIS after every successful update
pub type NisObserver = Box<dyn FnMut(SensorType, u64, f64)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStatus {
    /// No measurement accepted yet
    Uninitialized,
    /// State seeded; measurements run predict and update
    Tracking,
}

/// Estimate reported after an accepted measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterOutput {
    pub timestamp_us: u64,
    pub sensor_type: SensorType,
    pub state: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// NIS of the update; `None` for the measurement that initialized the filter
    pub nis: Option<f64>,
}
impl FilterOutput {
    pub fn ctrv_state(&self) -> CtrvState {
        CtrvState::from_slice(self.state.as_slice())
    }
}

/// Laser/radar fusion filter
pub struct FusionFilter {
    config: FilterConfig,
    ukf: UnscentedKalmanFilter,
    status: FilterStatus,
    previous_timestamp_us: u64,
    nis_laser: Option<f64>,
    nis_radar: Option<f64>,
    nis_observer: Option<NisObserver>,
}
impl Debug for FusionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusionFilter")
            .field("status", &self.status)
            .field("ukf", &self.ukf)
            .field("previous_timestamp_us", &self.previous_timestamp_us)
            .field("nis_laser", &self.nis_laser)
            .field("nis_radar", &self.nis_radar)
            .finish()
    }
}
impl FusionFilter {
    /// Build an uninitialized filter. The configuration is validated first.
    pub fn new(config: FilterConfig) -> Result<FusionFilter> {
        config.validate()?;
        let ukf = UnscentedKalmanFilter::new(
            CtrvState::default(),
            initial_covariance(&config),
            config.process_noise,
        )?;
        Ok(FusionFilter {
            config,
            ukf,
            status: FilterStatus::Uninitialized,
            previous_timestamp_us: 0,
            nis_laser: None,
            nis_radar: None,
            nis_observer: None,
        })
    }
    /// Register a callback that receives every NIS value as it is computed.
    pub fn set_nis_observer(&mut self, observer: NisObserver) {
        self.nis_observer = Some(observer);
    }
    /// Process a single measurement.
    ///
    /// Returns `Ok(None)` when the measurement comes from a disabled sensor and was
    /// ignored. On error nothing about the filter changes, so the caller may continue
    /// with the next measurement.
    ///
    /// Timestamps must be non-decreasing. A measurement older than the previous one is
    /// still processed (with a negative time step) and logged as a warning.
    pub fn process_measurement(
        &mut self,
        package: &MeasurementPackage,
    ) -> Result<Option<FilterOutput>> {
        if !self.sensor_enabled(package.sensor_type) {
            debug!(
                "ignoring {} measurement at {} us: sensor disabled",
                package.sensor_type, package.timestamp_us
            );
            return Ok(None);
        }
        let expected = package.sensor_type.dimension();
        if package.dimension() != expected {
            return Err(FilterError::DimensionMismatch {
                expected,
                found: package.dimension(),
            });
        }
        if self.status == FilterStatus::Uninitialized {
            self.initialize(package)?;
            return Ok(Some(self.output(package, None)));
        }

        let dt = (package.timestamp_us as f64 - self.previous_timestamp_us as f64) / 1.0e6;
        if dt < 0.0 {
            warn!(
                "{} measurement at {} us is older than the previous one ({} us)",
                package.sensor_type, package.timestamp_us, self.previous_timestamp_us
            );
        }
        let mut ukf = self.ukf.clone();
        ukf.predict(dt)?;
        let z = &package.raw_measurements;
        let nis = match package.sensor_type {
            SensorType::Laser => {
                ukf.update(&LaserMeasurement::new(z[0], z[1], self.config.laser_noise))?
            }
            SensorType::Radar => ukf.update(&RadarMeasurement::new(
                z[0],
                z[1],
                z[2],
                self.config.radar_noise,
            ))?,
        };

        self.ukf = ukf;
        self.previous_timestamp_us = package.timestamp_us;
        match package.sensor_type {
            SensorType::Laser => self.nis_laser = Some(nis),
            SensorType::Radar => self.nis_radar = Some(nis),
        }
        if let Some(observer) = self.nis_observer.as_mut() {
            observer(package.sensor_type, package.timestamp_us, nis);
        }
        debug!(
            "{} update at {} us (dt {:.3} s): {} NIS {:.3}",
            package.sensor_type,
            package.timestamp_us,
            dt,
            self.ukf.state(),
            nis
        );
        Ok(Some(self.output(package, Some(nis))))
    }
    fn sensor_enabled(&self, sensor_type: SensorType) -> bool {
        match sensor_type {
            SensorType::Laser => self.config.use_laser,
            SensorType::Radar => self.config.use_radar,
        }
    }
    fn initialize(&mut self, package: &MeasurementPackage) -> Result<()> {
        let z = &package.raw_measurements;
        let state = match package.sensor_type {
            SensorType::Laser => CtrvState::new(z[0], z[1], 0.0, 0.0, 0.0),
            SensorType::Radar => {
                let (rho, phi, rho_dot) = (z[0], z[1], z[2]);
                CtrvState::new(rho * phi.cos(), rho * phi.sin(), rho_dot, phi, 0.0)
            }
        };
        self.ukf.reset(state, initial_covariance(&self.config))?;
        self.previous_timestamp_us = package.timestamp_us;
        self.status = FilterStatus::Tracking;
        info!(
            "initialized from {} measurement at {} us: {}",
            package.sensor_type,
            package.timestamp_us,
            self.ukf.state()
        );
        Ok(())
    }
    fn output(&self, package: &MeasurementPackage, nis: Option<f64>) -> FilterOutput {
        FilterOutput {
            timestamp_us: package.timestamp_us,
            sensor_type: package.sensor_type,
            state: self.ukf.get_estimate(),
            covariance: self.ukf.get_certainty(),
            nis,
        }
    }
    pub fn status(&self) -> FilterStatus {
        self.status
    }
    pub fn is_initialized(&self) -> bool {
        self.status == FilterStatus::Tracking
    }
    pub fn state(&self) -> DVector<f64> {
        self.ukf.get_estimate()
    }
    pub fn covariance(&self) -> DMatrix<f64> {
        self.ukf.get_certainty()
    }
    /// NIS of the most recent laser update
    pub fn nis_laser(&self) -> Option<f64> {
        self.nis_laser
    }
    /// NIS of the most recent radar update
    pub fn nis_radar(&self) -> Option<f64> {
        self.nis_radar
    }
    pub fn previous_timestamp_us(&self) -> u64 {
        self.previous_timestamp_us
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    /// The underlying unscented filter
    pub fn filter(&self) -> &UnscentedKalmanFilter {
        &self.ukf
    }
}

fn initial_covariance(config: &FilterConfig) -> DMatrix<f64> {
    DMatrix::from_diagonal(&DVector::from_row_slice(&config.initial_covariance_diagonal))
}
