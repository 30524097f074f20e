//! Unscented Kalman filter over the CTRV state
//!
//! The filter carries the five-element CTRV mean and covariance and implements the
//! [BayesianFilter] predict/update cycle with an augmented unscented transform: the two
//! process noise terms are appended to the state so that their effect on the nonlinear
//! motion model is captured by the same set of sigma points.
//!
//! The building blocks are public so that each stage can be inspected on its own:
//! [unscented_weights], [UnscentedKalmanFilter::augmented_sigma_points],
//! [predict_sigma_points] and [unscented_mean_and_covariance].

use crate::config::ProcessNoise;
use crate::linalg::{cholesky_lower, spd_inverse, symmetrize};
use crate::measurements::MeasurementModel;
use crate::{
    AUGMENTED_SIZE, BayesianFilter, CtrvState, FilterError, NoiseSample, Result, STATE_SIZE,
    YAW_INDEX, forward, wrap_to_pi,
};

use std::fmt::{self, Debug, Display};

use nalgebra::{DMatrix, DVector};

/// Unscented weights for a sigma point set of `2 * augmented_size + 1` columns.
///
/// $w_0 = \lambda / (\lambda + L)$ and $w_i = 1 / (2 (\lambda + L))$ for every other column.
/// The same weights are used for the mean and the covariance.
pub fn unscented_weights(augmented_size: usize, lambda: f64) -> DVector<f64> {
    let n = augmented_size as f64;
    let mut weights = DVector::from_element(2 * augmented_size + 1, 0.5 / (lambda + n));
    weights[0] = lambda / (lambda + n);
    weights
}

/// Propagate every augmented sigma point through the CTRV model.
///
/// Rows `0..STATE_SIZE` of each column hold the state, the last two rows hold the
/// acceleration and yaw acceleration noise. The result has [STATE_SIZE] rows and the
/// same column order as the input.
pub fn predict_sigma_points(augmented: &DMatrix<f64>, dt: f64) -> DMatrix<f64> {
    let mut predicted = DMatrix::<f64>::zeros(STATE_SIZE, augmented.ncols());
    for (i, sigma_point) in augmented.column_iter().enumerate() {
        let mut state = CtrvState::from_slice(sigma_point.as_slice());
        let noise = NoiseSample {
            acceleration: sigma_point[STATE_SIZE],
            yaw_acceleration: sigma_point[STATE_SIZE + 1],
        };
        forward(&mut state, noise, dt);
        predicted.set_column(i, &state.to_vector());
    }
    predicted
}

/// Weighted mean and covariance of a set of sigma points.
///
/// When `angle_index` names an angular row, that row is averaged relative to the first
/// column with wrapped differences so that points straddling the ±π cut do not average
/// to the opposite direction, and every difference used in the covariance is wrapped
/// into $(-\pi, \pi]$. The returned mean angle is wrapped as well.
pub fn unscented_mean_and_covariance(
    sigma_points: &DMatrix<f64>,
    weights: &DVector<f64>,
    angle_index: Option<usize>,
) -> (DVector<f64>, DMatrix<f64>) {
    let dim = sigma_points.nrows();
    let mut mean = DVector::<f64>::zeros(dim);
    for (i, sigma_point) in sigma_points.column_iter().enumerate() {
        mean += weights[i] * sigma_point;
    }
    if let Some(a) = angle_index {
        let reference = sigma_points[(a, 0)];
        let offset: f64 = sigma_points
            .row(a)
            .iter()
            .enumerate()
            .map(|(i, angle)| weights[i] * wrap_to_pi(angle - reference))
            .sum();
        mean[a] = wrap_to_pi(reference + offset);
    }
    let mut covariance = DMatrix::<f64>::zeros(dim, dim);
    for (i, sigma_point) in sigma_points.column_iter().enumerate() {
        let diff = wrapped_difference(sigma_point - &mean, angle_index);
        covariance += weights[i] * &diff * diff.transpose();
    }
    (mean, symmetrize(&covariance))
}

fn wrapped_difference(mut diff: DVector<f64>, angle_index: Option<usize>) -> DVector<f64> {
    if let Some(a) = angle_index {
        diff[a] = wrap_to_pi(diff[a]);
    }
    diff
}

fn ensure_finite<'a, I>(values: I, what: &'static str) -> Result<()>
where
    I: IntoIterator<Item = &'a f64>,
{
    if values.into_iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(FilterError::NonFinite(what))
    }
}

/// Unscented Kalman Filter implementation
///
/// Uses the spread parameter $\lambda = 3 - L$ with $L$ = [AUGMENTED_SIZE]. The sigma
/// points produced by the last [BayesianFilter::predict] are kept and reused by the next
/// [BayesianFilter::update]; an update without a preceding predict regenerates them at
/// $\Delta t = 0$.
///
/// Every operation either completes or leaves the filter untouched.
#[derive(Clone)]
pub struct UnscentedKalmanFilter {
    mean_state: DVector<f64>,
    covariance: DMatrix<f64>,
    process_noise: ProcessNoise,
    lambda: f64,
    weights: DVector<f64>,
    predicted_sigma_points: Option<DMatrix<f64>>,
}
impl Debug for UnscentedKalmanFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UKF")
            .field("mean_state", &self.mean_state)
            .field("covariance", &self.covariance)
            .field("process_noise", &self.process_noise)
            .field("lambda", &self.lambda)
            .finish()
    }
}
impl Display for UnscentedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnscentedKalmanFilter")
            .field("state", &CtrvState::from_slice(self.mean_state.as_slice()))
            .field("covariance_diagonal", &self.covariance.diagonal().as_slice())
            .field("process_noise", &self.process_noise)
            .finish()
    }
}
impl UnscentedKalmanFilter {
    /// Create a filter from an initial state and covariance.
    ///
    /// # Arguments
    /// * `initial_state` - initial CTRV state; the heading is wrapped into $(-\pi, \pi]$
    /// * `covariance` - 5×5 initial covariance
    /// * `process_noise` - acceleration and yaw acceleration standard deviations
    pub fn new(
        initial_state: CtrvState,
        covariance: DMatrix<f64>,
        process_noise: ProcessNoise,
    ) -> Result<UnscentedKalmanFilter> {
        let lambda = 3.0 - AUGMENTED_SIZE as f64;
        let mut ukf = UnscentedKalmanFilter {
            mean_state: DVector::zeros(STATE_SIZE),
            covariance: DMatrix::identity(STATE_SIZE, STATE_SIZE),
            process_noise,
            lambda,
            weights: unscented_weights(AUGMENTED_SIZE, lambda),
            predicted_sigma_points: None,
        };
        ukf.reset(initial_state, covariance)?;
        Ok(ukf)
    }
    /// Replace the estimate and discard any cached sigma points.
    pub fn reset(&mut self, state: CtrvState, covariance: DMatrix<f64>) -> Result<()> {
        if covariance.shape() != (STATE_SIZE, STATE_SIZE) {
            return Err(FilterError::DimensionMismatch {
                expected: STATE_SIZE,
                found: covariance.nrows().max(covariance.ncols()),
            });
        }
        let mut mean_state = state.to_vector();
        ensure_finite(mean_state.iter(), "initial state")?;
        ensure_finite(covariance.iter(), "initial covariance")?;
        mean_state[YAW_INDEX] = wrap_to_pi(mean_state[YAW_INDEX]);
        self.mean_state = mean_state;
        self.covariance = covariance;
        self.predicted_sigma_points = None;
        Ok(())
    }
    pub fn lambda(&self) -> f64 {
        self.lambda
    }
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }
    pub fn process_noise(&self) -> ProcessNoise {
        self.process_noise
    }
    /// Current estimate as a [CtrvState]
    pub fn state(&self) -> CtrvState {
        CtrvState::from_slice(self.mean_state.as_slice())
    }
    /// Augmented sigma points, [AUGMENTED_SIZE] rows by `2 * AUGMENTED_SIZE + 1` columns.
    ///
    /// Column 0 is the augmented mean (state followed by two zero noise means), columns
    /// `1..=L` are the mean plus the scaled columns of the lower Cholesky factor of the
    /// augmented covariance, and columns `L+1..=2L` the mean minus the same offsets.
    pub fn augmented_sigma_points(&self) -> Result<DMatrix<f64>> {
        let mut mean = DVector::<f64>::zeros(AUGMENTED_SIZE);
        mean.rows_mut(0, STATE_SIZE).copy_from(&self.mean_state);

        let mut p_aug = DMatrix::<f64>::zeros(AUGMENTED_SIZE, AUGMENTED_SIZE);
        p_aug
            .view_mut((0, 0), (STATE_SIZE, STATE_SIZE))
            .copy_from(&self.covariance);
        p_aug[(STATE_SIZE, STATE_SIZE)] = self.process_noise.acceleration_std.powi(2);
        p_aug[(STATE_SIZE + 1, STATE_SIZE + 1)] = self.process_noise.yaw_acceleration_std.powi(2);

        let sqrt_p = cholesky_lower(&p_aug, "augmented covariance")?
            * (self.lambda + AUGMENTED_SIZE as f64).sqrt();
        let mut pts = DMatrix::<f64>::zeros(AUGMENTED_SIZE, 2 * AUGMENTED_SIZE + 1);
        pts.column_mut(0).copy_from(&mean);
        for (i, offset) in sqrt_p.column_iter().enumerate() {
            pts.column_mut(i + 1).copy_from(&(&mean + offset));
            pts.column_mut(i + 1 + AUGMENTED_SIZE)
                .copy_from(&(&mean - offset));
        }
        Ok(pts)
    }
}
impl BayesianFilter for UnscentedKalmanFilter {
    fn predict(&mut self, dt: f64) -> Result<()> {
        let sigma_points = predict_sigma_points(&self.augmented_sigma_points()?, dt);
        ensure_finite(sigma_points.iter(), "predicted sigma points")?;
        let (mean, covariance) =
            unscented_mean_and_covariance(&sigma_points, &self.weights, Some(YAW_INDEX));
        self.mean_state = mean;
        self.covariance = covariance;
        self.predicted_sigma_points = Some(sigma_points);
        Ok(())
    }
    fn update<M: MeasurementModel + ?Sized>(&mut self, measurement: &M) -> Result<f64> {
        let dim = measurement.get_dimension();
        let z = measurement.get_vector();
        if z.len() != dim {
            return Err(FilterError::DimensionMismatch {
                expected: dim,
                found: z.len(),
            });
        }
        let noise = measurement.get_noise();
        if noise.shape() != (dim, dim) {
            return Err(FilterError::DimensionMismatch {
                expected: dim,
                found: noise.nrows().max(noise.ncols()),
            });
        }
        let angle = measurement.angular_component();
        let sigma_points = match &self.predicted_sigma_points {
            Some(points) => points.clone(),
            None => predict_sigma_points(&self.augmented_sigma_points()?, 0.0),
        };

        let mut measurement_sigma_points = DMatrix::<f64>::zeros(dim, sigma_points.ncols());
        for (i, sigma_point) in sigma_points.column_iter().enumerate() {
            let expected = measurement.get_expected_measurement(&sigma_point.clone_owned());
            measurement_sigma_points.set_column(i, &expected);
        }
        ensure_finite(measurement_sigma_points.iter(), "predicted measurement")?;
        let (z_hat, mut s) =
            unscented_mean_and_covariance(&measurement_sigma_points, &self.weights, angle);
        s += noise;

        let mut cross_covariance = DMatrix::<f64>::zeros(STATE_SIZE, dim);
        for (i, measurement_sigma_point) in measurement_sigma_points.column_iter().enumerate() {
            let measurement_diff = wrapped_difference(measurement_sigma_point - &z_hat, angle);
            let state_diff =
                wrapped_difference(sigma_points.column(i) - &self.mean_state, Some(YAW_INDEX));
            cross_covariance += self.weights[i] * state_diff * measurement_diff.transpose();
        }

        let s_inv = spd_inverse(&s, "innovation covariance")?;
        let k = &cross_covariance * &s_inv;
        let residual = wrapped_difference(z - &z_hat, angle);

        let mut mean_state = &self.mean_state + &k * &residual;
        mean_state[YAW_INDEX] = wrap_to_pi(mean_state[YAW_INDEX]);
        let covariance = symmetrize(&(&self.covariance - &k * &s * k.transpose()));
        let nis = residual.dot(&(&s_inv * &residual));
        ensure_finite(mean_state.iter(), "updated state")?;
        ensure_finite(covariance.iter(), "updated covariance")?;
        ensure_finite([nis].iter(), "normalized innovation squared")?;

        self.mean_state = mean_state;
        self.covariance = covariance;
        self.predicted_sigma_points = None;
        Ok(nis)
    }
    fn get_estimate(&self) -> DVector<f64> {
        self.mean_state.clone()
    }
    fn get_certainty(&self) -> DMatrix<f64> {
        self.covariance.clone()
    }
}
