//! Measurement models for landmark-based localization.
//!
//! A measurement model maps a candidate [State] into measurement space and scores an observed
//! [Measurement] against that prediction. Both landmark models here assume zero-mean additive Gaussian
//! sensor noise with a diagonal covariance, so the score is an (unnormalized) Gaussian likelihood:
//!
//! $$
//! \ln p(z | x) = -\frac{1}{2} (z - h(x))^T R^{-1} (z - h(x))
//! $$
//!
//! Likelihoods are evaluated in log space by the particle set so that a cycle in which every raw
//! likelihood underflows is still weighted correctly.

use std::fmt::{self, Debug, Display};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::{HEADING, State, X, Y, wrap_to_pi};

/// A landmark with a known, fixed position in the world frame (m).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
}
impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Landmark { x, y }
    }
    /// Distance (m) and world-frame direction (rad) from `(x, y)` to this landmark.
    pub fn range_and_direction(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = self.x - x;
        let dy = self.y - y;
        (dx.hypot(dy), dy.atan2(dx))
    }
}
impl From<(f64, f64)> for Landmark {
    fn from(position: (f64, f64)) -> Self {
        Landmark::new(position.0, position.1)
    }
}

/// One cycle's observation vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub values: DVector<f64>,
}
impl Measurement {
    pub fn new(values: Vec<f64>) -> Self {
        Measurement {
            values: DVector::from_vec(values),
        }
    }
    /// Flatten `(range, bearing)` pairs into the `[r0, b0, r1, b1, ...]` layout used by
    /// [LandmarkRangeBearingModel].
    pub fn from_range_bearing(pairs: &[(f64, f64)]) -> Self {
        Measurement::new(pairs.iter().flat_map(|&(r, b)| [r, b]).collect())
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }
}
impl From<DVector<f64>> for Measurement {
    fn from(values: DVector<f64>) -> Self {
        Measurement { values }
    }
}
impl Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(|v| format!("{:.4}", v)).collect();
        write!(f, "Measurement([{}])", values.join(", "))
    }
}

/// Generic measurement model trait for scoring observations against particle states
pub trait MeasurementModel {
    /// Get the dimension of the measurement vector
    fn dimension(&self) -> usize;
    /// Get the measurement noise covariance
    fn noise(&self) -> DMatrix<f64>;
    /// Map a state into measurement space
    fn expected_measurement(&self, state: &State) -> DVector<f64>;
    /// Difference between an observation and a prediction. Angular components should be wrapped.
    fn residual(&self, measurement: &DVector<f64>, expected: &DVector<f64>) -> DVector<f64> {
        measurement - expected
    }
    /// Likelihood of `measurement` given `state`, finite and non-negative.
    ///
    /// This is the weight factor applied to a particle. The default is the unnormalized Gaussian
    /// likelihood of [Self::residual] under [Self::noise], see [gaussian_score].
    ///
    /// # Errors
    /// [ConfigurationError::DimensionMismatch] if the measurement does not have [Self::dimension]
    /// components, or [ConfigurationError::InvalidParameter] if the noise covariance is not positive
    /// definite.
    fn likelihood(&self, state: &State, measurement: &Measurement) -> Result<f64, ConfigurationError> {
        Ok(gaussian_score(self, state, measurement)?.exp())
    }
    /// Natural log of [Self::likelihood], used by the particle set to weight in log space.
    ///
    /// Defaults to `ln(likelihood)`. Override only with an equivalent that stays finite where the
    /// raw likelihood underflows.
    fn log_likelihood(
        &self,
        state: &State,
        measurement: &Measurement,
    ) -> Result<f64, ConfigurationError> {
        Ok(self.likelihood(state, measurement)?.ln())
    }
}

impl<T: MeasurementModel + ?Sized> MeasurementModel for Box<T> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }
    fn noise(&self) -> DMatrix<f64> {
        (**self).noise()
    }
    fn expected_measurement(&self, state: &State) -> DVector<f64> {
        (**self).expected_measurement(state)
    }
    fn residual(&self, measurement: &DVector<f64>, expected: &DVector<f64>) -> DVector<f64> {
        (**self).residual(measurement, expected)
    }
    fn log_likelihood(
        &self,
        state: &State,
        measurement: &Measurement,
    ) -> Result<f64, ConfigurationError> {
        (**self).log_likelihood(state, measurement)
    }
    fn likelihood(&self, state: &State, measurement: &Measurement) -> Result<f64, ConfigurationError> {
        (**self).likelihood(state, measurement)
    }
}

/// Ensure a measurement has the dimension a model expects.
pub fn check_dimension(expected: usize, measurement: &Measurement) -> Result<(), ConfigurationError> {
    if measurement.len() != expected {
        return Err(ConfigurationError::DimensionMismatch {
            expected,
            found: measurement.len(),
        });
    }
    Ok(())
}

/// Unnormalized Gaussian log-likelihood of `measurement` against the model's prediction for `state`.
pub fn gaussian_score<M: MeasurementModel + ?Sized>(
    model: &M,
    state: &State,
    measurement: &Measurement,
) -> Result<f64, ConfigurationError> {
    check_dimension(model.dimension(), measurement)?;
    let expected = model.expected_measurement(state);
    let residual = model.residual(measurement.values(), &expected);
    gaussian_log_likelihood(&residual, &model.noise())
}

/// Unnormalized Gaussian log-likelihood of a residual under covariance `noise`.
///
/// Non-finite residuals score as $-\infty$ (zero likelihood).
pub fn gaussian_log_likelihood(
    residual: &DVector<f64>,
    noise: &DMatrix<f64>,
) -> Result<f64, ConfigurationError> {
    if noise.nrows() != residual.len() || !noise.is_square() {
        return Err(ConfigurationError::DimensionMismatch {
            expected: noise.nrows(),
            found: residual.len(),
        });
    }
    if residual.iter().any(|v| !v.is_finite()) {
        return Ok(f64::NEG_INFINITY);
    }
    let cholesky = noise.clone().cholesky().ok_or_else(|| {
        ConfigurationError::invalid("measurement_noise", "covariance is not positive definite")
    })?;
    let whitened = cholesky.solve(residual);
    Ok(-0.5 * residual.dot(&whitened))
}

fn validate_std(name: &str, std: f64) -> Result<(), ConfigurationError> {
    if !std.is_finite() || std <= 0.0 {
        return Err(ConfigurationError::invalid(
            name,
            format!("standard deviation must be positive and finite, got {}", std),
        ));
    }
    Ok(())
}

fn validate_landmarks(landmarks: &[Landmark]) -> Result<(), ConfigurationError> {
    if landmarks.is_empty() {
        return Err(ConfigurationError::invalid(
            "landmarks",
            "at least one landmark is required",
        ));
    }
    if landmarks.iter().any(|l| !l.x.is_finite() || !l.y.is_finite()) {
        return Err(ConfigurationError::invalid(
            "landmarks",
            "landmark positions must be finite",
        ));
    }
    Ok(())
}

/// Range and bearing to every known landmark.
///
/// The measurement layout is `[r0, b0, r1, b1, ...]` where `r` is the distance (m) from the agent to
/// the landmark and `b` is the bearing (rad) of the landmark relative to the agent's heading,
/// in $(-\pi, \pi]$.
#[derive(Clone, Debug)]
pub struct LandmarkRangeBearingModel {
    pub landmarks: Vec<Landmark>,
    pub range_std: f64,
    pub bearing_std: f64,
}
impl LandmarkRangeBearingModel {
    pub fn new(
        landmarks: Vec<Landmark>,
        range_std: f64,
        bearing_std: f64,
    ) -> Result<Self, ConfigurationError> {
        validate_landmarks(&landmarks)?;
        validate_std("range_std", range_std)?;
        validate_std("bearing_std", bearing_std)?;
        Ok(LandmarkRangeBearingModel {
            landmarks,
            range_std,
            bearing_std,
        })
    }
}
impl Display for LandmarkRangeBearingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LandmarkRangeBearingModel(landmarks: {}, range_std: {}, bearing_std: {})",
            self.landmarks.len(),
            self.range_std,
            self.bearing_std
        )
    }
}
impl MeasurementModel for LandmarkRangeBearingModel {
    fn dimension(&self) -> usize {
        2 * self.landmarks.len()
    }
    fn noise(&self) -> DMatrix<f64> {
        let variances: Vec<f64> = self
            .landmarks
            .iter()
            .flat_map(|_| [self.range_std.powi(2), self.bearing_std.powi(2)])
            .collect();
        DMatrix::from_diagonal(&DVector::from_vec(variances))
    }
    fn expected_measurement(&self, state: &State) -> DVector<f64> {
        let values: Vec<f64> = self
            .landmarks
            .iter()
            .flat_map(|landmark| {
                let (range, direction) = landmark.range_and_direction(state[X], state[Y]);
                [range, wrap_to_pi(direction - state[HEADING])]
            })
            .collect();
        DVector::from_vec(values)
    }
    fn residual(&self, measurement: &DVector<f64>, expected: &DVector<f64>) -> DVector<f64> {
        let mut residual = measurement - expected;
        for i in (1..residual.len()).step_by(2) {
            residual[i] = wrap_to_pi(residual[i]);
        }
        residual
    }
    fn log_likelihood(
        &self,
        state: &State,
        measurement: &Measurement,
    ) -> Result<f64, ConfigurationError> {
        gaussian_score(self, state, measurement)
    }
}

/// Range to every known landmark, layout `[r0, r1, ...]`.
#[derive(Clone, Debug)]
pub struct LandmarkRangeModel {
    pub landmarks: Vec<Landmark>,
    pub range_std: f64,
}
impl LandmarkRangeModel {
    pub fn new(landmarks: Vec<Landmark>, range_std: f64) -> Result<Self, ConfigurationError> {
        validate_landmarks(&landmarks)?;
        validate_std("range_std", range_std)?;
        Ok(LandmarkRangeModel {
            landmarks,
            range_std,
        })
    }
}
impl Display for LandmarkRangeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LandmarkRangeModel(landmarks: {}, range_std: {})",
            self.landmarks.len(),
            self.range_std
        )
    }
}
impl MeasurementModel for LandmarkRangeModel {
    fn dimension(&self) -> usize {
        self.landmarks.len()
    }
    fn noise(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal_element(
            self.landmarks.len(),
            self.landmarks.len(),
            self.range_std.powi(2),
        )
    }
    fn expected_measurement(&self, state: &State) -> DVector<f64> {
        DVector::from_iterator(
            self.landmarks.len(),
            self.landmarks
                .iter()
                .map(|landmark| landmark.range_and_direction(state[X], state[Y]).0),
        )
    }
    fn log_likelihood(
        &self,
        state: &State,
        measurement: &Measurement,
    ) -> Result<f64, ConfigurationError> {
        gaussian_score(self, state, measurement)
    }
}
