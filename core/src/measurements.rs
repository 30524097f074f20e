//! Measurement models for the laser and radar sensors.
//!
//! This module defines the generic measurement model trait consumed by the unscented
//! update and the two concrete sensor models: a Cartesian position sensor (laser) and
//! a polar range/bearing/range-rate sensor (radar). Each model maps a state-space
//! sigma point into its measurement space and carries the fixed noise of its sensor.

use crate::config::{LaserNoise, RadarNoise};

use std::fmt::{self, Display};

use nalgebra::{DMatrix, DVector};

/// Generic measurement model trait for all types of measurements
pub trait MeasurementModel {
    /// Get the dimension of the measurement vector
    fn get_dimension(&self) -> usize;
    /// Get the measurement in a vector format
    fn get_vector(&self) -> DVector<f64>;
    /// Get the measurement noise characteristics in a matrix format
    fn get_noise(&self) -> DMatrix<f64>;
    /// Get the expected measurements from the state. Measurement model function
    /// that maps the state values to measurement space.
    fn get_expected_measurement(&self, state: &DVector<f64>) -> DVector<f64>;
    /// Index of the measurement component that is an angle and must be wrapped
    /// when differenced, if any.
    fn angular_component(&self) -> Option<usize> {
        None
    }
}

/// Laser (lidar) position measurement model
#[derive(Clone, Debug, Default)]
pub struct LaserMeasurement {
    pub position_x: f64,
    pub position_y: f64,
    pub noise: LaserNoise,
}
impl LaserMeasurement {
    pub fn new(position_x: f64, position_y: f64, noise: LaserNoise) -> Self {
        LaserMeasurement {
            position_x,
            position_y,
            noise,
        }
    }
}
impl Display for LaserMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LaserMeasurement(px: {}, py: {}, px_std: {}, py_std: {})",
            self.position_x, self.position_y, self.noise.px_std, self.noise.py_std
        )
    }
}
impl MeasurementModel for LaserMeasurement {
    fn get_dimension(&self) -> usize {
        2
    }
    fn get_vector(&self) -> DVector<f64> {
        DVector::from_vec(vec![self.position_x, self.position_y])
    }
    fn get_noise(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_vec(vec![
            self.noise.px_std.powi(2),
            self.noise.py_std.powi(2),
        ]))
    }
    fn get_expected_measurement(&self, state: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![state[0], state[1]])
    }
}

/// Radar measurement model
///
/// The radar reports the range $\rho$ (m), the bearing $\phi$ (rad, measured from the
/// x axis), and the range rate $\dot{\rho}$ (m/s) of the target:
///
/// $$
/// \begin{aligned}
/// \rho &= \sqrt{p_x^2 + p_y^2} \\\\
/// \phi &= \operatorname{atan2}(p_y, p_x) \\\\
/// \dot{\rho} &= \frac{p_x v \cos\psi + p_y v \sin\psi}{\rho}
/// \end{aligned}
/// $$
///
/// The range rate is undefined for a target at the origin ($\rho = 0$). This singularity
/// is not clamped: the expected measurement becomes non-finite and the filter reports the
/// failed update.
#[derive(Clone, Debug, Default)]
pub struct RadarMeasurement {
    pub range: f64,
    pub bearing: f64,
    pub range_rate: f64,
    pub noise: RadarNoise,
}
impl RadarMeasurement {
    pub fn new(range: f64, bearing: f64, range_rate: f64, noise: RadarNoise) -> Self {
        RadarMeasurement {
            range,
            bearing,
            range_rate,
            noise,
        }
    }
}
impl Display for RadarMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadarMeasurement(rho: {}, phi: {}, rho_dot: {}, rho_std: {}, phi_std: {}, rho_dot_std: {})",
            self.range,
            self.bearing,
            self.range_rate,
            self.noise.range_std,
            self.noise.bearing_std,
            self.noise.range_rate_std
        )
    }
}
impl MeasurementModel for RadarMeasurement {
    fn get_dimension(&self) -> usize {
        3
    }
    fn get_vector(&self) -> DVector<f64> {
        DVector::from_vec(vec![self.range, self.bearing, self.range_rate])
    }
    fn get_noise(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_vec(vec![
            self.noise.range_std.powi(2),
            self.noise.bearing_std.powi(2),
            self.noise.range_rate_std.powi(2),
        ]))
    }
    fn get_expected_measurement(&self, state: &DVector<f64>) -> DVector<f64> {
        let (px, py, speed, yaw) = (state[0], state[1], state[2], state[3]);
        let vx = speed * yaw.cos();
        let vy = speed * yaw.sin();
        let range = px.hypot(py);
        DVector::from_vec(vec![range, py.atan2(px), (px * vx + py * vy) / range])
    }
    fn angular_component(&self) -> Option<usize> {
        Some(1)
    }
}
