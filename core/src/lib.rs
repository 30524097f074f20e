//! Laser/radar sensor fusion with an Unscented Kalman Filter
//!
//! This crate estimates the kinematic state of a single moving object from two asynchronous sensor
//! streams: a Cartesian position sensor (laser/lidar) and a range, bearing, and range-rate sensor (radar).
//! The radar observation model and the motion model are both nonlinear, so the estimator uses the
//! unscented transform rather than linearizing either of them. After each measurement the filter exposes
//! the updated state, its covariance, and the Normalized Innovation Squared (NIS) for the sensor that was
//! just processed, which is the usual statistic for checking noise tuning offline.
//!
//! Primarily built off of [`nalgebra`](https://crates.io/crates/nalgebra), which provides the matrix and
//! vector types and the Cholesky factorization used by the filter.
//!
//! # State definition
//!
//! The filter state is the five-element CTRV (constant turn rate and velocity magnitude) state:
//!
//! $$
//! x = [p_x, p_y, v, \psi, \dot{\psi}]
//! $$
//!
//! Where:
//! - $p_x$ and $p_y$ are the Cartesian position (m)
//! - $v$ is the magnitude of the velocity along the heading (m/s)
//! - $\psi$ is the heading angle (rad), kept in $(-\pi, \pi]$
//! - $\dot{\psi}$ is the yaw rate (rad/s)
//!
//! ## Motion model
//!
//! For a yaw rate that is not (numerically) zero, the object travels along a circular arc:
//!
//! $$
//! \begin{aligned}
//! p_x(+) &= p_x + \frac{v}{\dot{\psi}} \left( \sin(\psi + \dot{\psi} t) - \sin(\psi) \right) \\\\
//! p_y(+) &= p_y + \frac{v}{\dot{\psi}} \left( \cos(\psi) - \cos(\psi + \dot{\psi} t) \right) \\\\
//! \psi(+) &= \psi + \dot{\psi} t
//! \end{aligned}
//! $$
//!
//! When $|\dot{\psi}| \le 0.001$ rad/s the straight-line limit $p(+) = p + v t [\cos\psi, \sin\psi]$ is used
//! instead. The longitudinal acceleration noise $\nu_a$ and yaw acceleration noise $\nu_{\ddot{\psi}}$ are then
//! added as:
//!
//! $$
//! \begin{aligned}
//! p_x &\mathrel{+}= \tfrac{1}{2} \nu_a t^2 \cos\psi, \quad p_y \mathrel{+}= \tfrac{1}{2} \nu_a t^2 \sin\psi \\\\
//! v &\mathrel{+}= \nu_a t \\\\
//! \psi &\mathrel{+}= \tfrac{1}{2} \nu_{\ddot{\psi}} t^2, \quad \dot{\psi} \mathrel{+}= \nu_{\ddot{\psi}} t
//! \end{aligned}
//! $$
//!
//! The filter itself lives in [kalman], the sensor models in [measurements], and the
//! measurement-by-measurement controller in [fusion].
pub mod config;
pub mod fusion;
pub mod kalman;
pub mod linalg;
pub mod measurements;
pub mod messages;
pub mod sim;

use nalgebra::{DMatrix, DVector};

use std::f64::consts::{PI, TAU};
use std::fmt::{self, Display};

use crate::measurements::MeasurementModel;

/// Dimension of the CTRV state vector
pub const STATE_SIZE: usize = 5;
/// Dimension of the state vector augmented with the two process noise terms
pub const AUGMENTED_SIZE: usize = STATE_SIZE + 2;
/// Index of the heading angle in the state vector
pub const YAW_INDEX: usize = 3;
/// Yaw rates at or below this magnitude (rad/s) are propagated along a straight line
pub const YAW_RATE_THRESHOLD: f64 = 1e-3;

/// Errors raised by the estimator.
///
/// Numerical failures abort the current predict/update cycle. The filter that raised
/// them keeps the estimate it held before the cycle started.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// A covariance that must be factored is not positive definite
    NotPositiveDefinite(&'static str),
    /// A matrix that must be inverted is singular
    SingularMatrix(&'static str),
    /// A computation produced NaN or infinite values
    NonFinite(&'static str),
    /// A vector or matrix does not have the expected number of rows
    DimensionMismatch { expected: usize, found: usize },
    /// Configuration values are out of range
    InvalidConfiguration(String),
}

impl std::error::Error for FilterError {}

impl Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::NotPositiveDefinite(what) => {
                write!(f, "{} is not positive definite", what)
            }
            FilterError::SingularMatrix(what) => write!(f, "{} is singular", what),
            FilterError::NonFinite(what) => write!(f, "{} contains non-finite values", what),
            FilterError::DimensionMismatch { expected, found } => {
                write!(f, "dimension mismatch: expected {}, found {}", expected, found)
            }
            FilterError::InvalidConfiguration(reason) => {
                write!(f, "invalid configuration: {}", reason)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;

/// Generic Bayesian filter trait providing the predict/update interface
/// used by the fusion controller.
pub trait BayesianFilter {
    /// Propagate the estimate forward by `dt` seconds.
    fn predict(&mut self, dt: f64) -> Result<()>;
    /// Correct the estimate with a measurement and return the NIS of the innovation.
    fn update<M: MeasurementModel + ?Sized>(&mut self, measurement: &M) -> Result<f64>;
    fn get_estimate(&self) -> DVector<f64>;
    fn get_certainty(&self) -> DMatrix<f64>;
}

/// Kinematic state of the tracked object under the CTRV motion model.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CtrvState {
    /// Position along the x axis in meters
    pub position_x: f64,
    /// Position along the y axis in meters
    pub position_y: f64,
    /// Velocity magnitude along the heading in m/s
    pub speed: f64,
    /// Heading angle in radians
    pub yaw: f64,
    /// Yaw rate in rad/s
    pub yaw_rate: f64,
}

impl Display for CtrvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CtrvState(px: {:.4}, py: {:.4}, v: {:.4}, yaw: {:.4}, yaw_rate: {:.4})",
            self.position_x, self.position_y, self.speed, self.yaw, self.yaw_rate
        )
    }
}

impl CtrvState {
    pub fn new(position_x: f64, position_y: f64, speed: f64, yaw: f64, yaw_rate: f64) -> CtrvState {
        CtrvState {
            position_x,
            position_y,
            speed,
            yaw,
            yaw_rate,
        }
    }
    /// Build a state from the first [STATE_SIZE] entries of a (possibly augmented) vector.
    ///
    /// # Panics
    /// Panics if the slice holds fewer than [STATE_SIZE] values.
    pub fn from_slice(values: &[f64]) -> CtrvState {
        CtrvState::new(values[0], values[1], values[2], values[3], values[4])
    }
    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.position_x,
            self.position_y,
            self.speed,
            self.yaw,
            self.yaw_rate,
        ])
    }
    /// Cartesian velocity components (vx, vy) in m/s
    pub fn velocity(&self) -> (f64, f64) {
        (self.speed * self.yaw.cos(), self.speed * self.yaw.sin())
    }
}

/// Process noise realization applied to one sigma point: longitudinal acceleration (m/s²)
/// and yaw acceleration (rad/s²).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoiseSample {
    pub acceleration: f64,
    pub yaw_acceleration: f64,
}

/// CTRV forward propagation.
///
/// Advances `state` by `dt` seconds and adds the contribution of the acceleration
/// noise sample. See the crate documentation for the equations. The heading is not
/// wrapped here; sigma points must stay continuous so that their weighted mean is
/// meaningful. `dt` must be non-negative.
pub fn forward(state: &mut CtrvState, noise: NoiseSample, dt: f64) {
    let CtrvState {
        position_x,
        position_y,
        speed,
        yaw,
        yaw_rate,
    } = *state;
    let (mut px, mut py) = if yaw_rate.abs() > YAW_RATE_THRESHOLD {
        (
            position_x + speed / yaw_rate * ((yaw + yaw_rate * dt).sin() - yaw.sin()),
            position_y + speed / yaw_rate * (yaw.cos() - (yaw + yaw_rate * dt).cos()),
        )
    } else {
        (
            position_x + speed * dt * yaw.cos(),
            position_y + speed * dt * yaw.sin(),
        )
    };
    let half_dt2 = 0.5 * dt * dt;
    px += half_dt2 * noise.acceleration * yaw.cos();
    py += half_dt2 * noise.acceleration * yaw.sin();
    state.position_x = px;
    state.position_y = py;
    state.speed = speed + noise.acceleration * dt;
    state.yaw = yaw + yaw_rate * dt + half_dt2 * noise.yaw_acceleration;
    state.yaw_rate = yaw_rate + noise.yaw_acceleration * dt;
}

/// Wrap an angle to the range $(-\pi, \pi]$ radians
///
/// Closed-form (modulo based) normalization, so arbitrarily large inputs take constant time.
///
/// # Arguments
/// * `angle` - The angle to be wrapped in radians
/// # Returns
/// * The equivalent angle in $(-\pi, \pi]$
/// # Example
/// ```rust
/// use sensorfusion::wrap_to_pi;
/// use std::f64::consts::PI;
/// let wrapped = wrap_to_pi(3.0 * PI / 2.0);
/// assert!((wrapped + PI / 2.0).abs() < 1e-12);
/// assert_eq!(wrap_to_pi(-PI), PI);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    let wrapped = PI - (PI - angle).rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn wrap_to_pi_range() {
        for i in -2000..2000 {
            let angle = i as f64 * 0.37;
            let wrapped = wrap_to_pi(angle);
            assert!(wrapped > -PI && wrapped <= PI, "{} -> {}", angle, wrapped);
            // same direction
            assert_approx_eq!(wrapped.sin(), angle.sin(), 1e-9);
            assert_approx_eq!(wrapped.cos(), angle.cos(), 1e-9);
        }
    }

    #[test]
    fn wrap_to_pi_boundaries() {
        assert_eq!(wrap_to_pi(PI), PI);
        assert_eq!(wrap_to_pi(-PI), PI);
        assert_eq!(wrap_to_pi(0.0), 0.0);
        assert_approx_eq!(wrap_to_pi(3.0 * PI), PI, 1e-12);
        assert_approx_eq!(wrap_to_pi(-0.5), -0.5, 1e-15);
        assert_approx_eq!(wrap_to_pi(1e6), 1e6_f64.sin().atan2(1e6_f64.cos()), 1e-6);
    }

    #[test]
    fn forward_straight_line() {
        let mut state = CtrvState::new(1.0, 2.0, 2.0, 0.0, 0.0);
        forward(&mut state, NoiseSample::default(), 0.5);
        assert_approx_eq!(state.position_x, 2.0, 1e-12);
        assert_approx_eq!(state.position_y, 2.0, 1e-12);
        assert_approx_eq!(state.speed, 2.0, 1e-12);
        assert_approx_eq!(state.yaw, 0.0, 1e-12);
    }

    #[test]
    fn forward_small_yaw_rate_uses_straight_line() {
        let mut state = CtrvState::new(0.0, 0.0, 1.0, PI / 2.0, 5e-4);
        forward(&mut state, NoiseSample::default(), 1.0);
        assert_approx_eq!(state.position_x, 0.0, 1e-12);
        assert_approx_eq!(state.position_y, 1.0, 1e-12);
        assert_approx_eq!(state.yaw, PI / 2.0 + 5e-4, 1e-12);
    }

    #[test]
    fn forward_quarter_turn() {
        // radius v / yaw_rate = 1, quarter circle after pi/2 seconds
        let mut state = CtrvState::new(0.0, 0.0, 1.0, 0.0, 1.0);
        forward(&mut state, NoiseSample::default(), PI / 2.0);
        assert_approx_eq!(state.position_x, 1.0, 1e-12);
        assert_approx_eq!(state.position_y, 1.0, 1e-12);
        assert_approx_eq!(state.yaw, PI / 2.0, 1e-12);
        assert_approx_eq!(state.yaw_rate, 1.0, 1e-12);
    }

    #[test]
    fn forward_noise_terms() {
        let mut state = CtrvState::new(0.0, 0.0, 0.0, 0.0, 0.0);
        let noise = NoiseSample {
            acceleration: 2.0,
            yaw_acceleration: 0.4,
        };
        forward(&mut state, noise, 1.0);
        assert_approx_eq!(state.position_x, 1.0, 1e-12);
        assert_approx_eq!(state.position_y, 0.0, 1e-12);
        assert_approx_eq!(state.speed, 2.0, 1e-12);
        assert_approx_eq!(state.yaw, 0.2, 1e-12);
        assert_approx_eq!(state.yaw_rate, 0.4, 1e-12);
    }

    #[test]
    fn forward_zero_dt_is_identity() {
        let original = CtrvState::new(3.0, -1.0, 4.0, 2.5, -0.3);
        let mut state = original;
        let noise = NoiseSample {
            acceleration: 1.5,
            yaw_acceleration: -0.7,
        };
        forward(&mut state, noise, 0.0);
        assert_eq!(state, original);
    }

    #[test]
    fn state_vector_conversion() {
        let state = CtrvState::new(1.0, 2.0, 3.0, 0.5, 0.1);
        let v = state.to_vector();
        assert_eq!(v.len(), STATE_SIZE);
        assert_eq!(CtrvState::from_slice(v.as_slice()), state);
        let (vx, vy) = state.velocity();
        assert_approx_eq!(vx, 3.0 * 0.5_f64.cos(), 1e-12);
        assert_approx_eq!(vy, 3.0 * 0.5_f64.sin(), 1e-12);
    }

    #[test]
    fn filter_error_display() {
        let err = FilterError::DimensionMismatch {
            expected: 2,
            found: 3,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 2, found 3");
        assert!(
            FilterError::NotPositiveDefinite("augmented covariance")
                .to_string()
                .contains("augmented covariance")
        );
    }
}
