//! Particle filter toolbox for planar mobile-agent localization
//!
//! This crate provides a sequential Monte-Carlo (particle) approximation of the Bayesian posterior
//! over the pose of a mobile agent moving in a plane. The agent is commanded with a forward distance
//! and a rotation each cycle and observes a set of landmarks whose positions are known. The filter is
//! organized as a set of small, interchangeable pieces that are wired together by [filter::ParticleFilter]:
//!
//! - [motion]: process models that move a pose forward under a control input and stochastic noise.
//! - [measurements]: measurement models that score an observation against a candidate pose.
//! - [particle]: the weighted particle set and its statistics (weighted mean, covariance, effective sample size).
//! - [resampling]: the algorithms that redraw an equally weighted set from a weighted one.
//! - [trigger]: the policies that decide *when* resampling should run at all.
//! - [filter]: the predict, weight, resample, estimate cycle.
//! - [config]: the serializable configuration surface (JSON, YAML and TOML).
//! - [sim]: a landmark world and a simulated robot for producing control and measurement streams.
//! - [logging]: logger setup for command line front ends.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): state vectors and covariance matrices.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): seedable
//!   random number generation for process noise, initialization and resampling.
//!
//! ## State definition
//!
//! The state vector is the planar pose:
//!
//! $$
//! x = [p_x, p_y, \psi]
//! $$
//!
//! Where $p_x$ and $p_y$ are positions (m) in the world frame and $\psi$ is the heading (rad) measured
//! counter-clockwise from the world x-axis. Heading is always stored in the canonical range $(-\pi, \pi]$
//! and averaged with a circular mean:
//!
//! $$
//! \bar{\psi} = \operatorname{atan2}\left( \sum_i w_i \sin \psi_i, \sum_i w_i \cos \psi_i \right)
//! $$
//!
//! ## Reproducibility
//!
//! Every filter instance owns exactly one [`rand::rngs::StdRng`] seeded from its configuration. Particles
//! are propagated, weighted and resampled sequentially in index order so that two filters built from the
//! same configuration and fed the same cycles produce identical particle sets.
pub mod config;
pub mod error;
pub mod filter;
pub mod linalg;
pub mod logging;
pub mod measurements;
pub mod motion;
pub mod particle;
pub mod resampling;
pub mod sim;
pub mod trigger;

use std::f64::consts::PI;
use std::fmt::{self, Display};

use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub use crate::config::{ConfigFile, FilterConfig};
pub use crate::error::{ConfigurationError, DegeneracyError, FilterError};
pub use crate::filter::{Estimate, ParticleFilter};
pub use crate::measurements::{Measurement, MeasurementModel};
pub use crate::motion::ProcessModel;
pub use crate::particle::{InitializationMode, Particle, ParticleSet};
pub use crate::resampling::ResamplingAlgorithm;
pub use crate::trigger::ResamplingTrigger;

/// Planar pose `[x (m), y (m), heading (rad)]`.
pub type State = Vector3<f64>;

/// Index of the x position in a [State].
pub const X: usize = 0;
/// Index of the y position in a [State].
pub const Y: usize = 1;
/// Index of the heading angle in a [State].
pub const HEADING: usize = 2;

/// Per-cycle motion command.
///
/// The agent first advances `distance` meters along its current heading and then rotates by `rotation`
/// radians. Both quantities are the *commanded* values; process models add their own noise on top.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Control {
    /// Commanded forward motion (m)
    pub distance: f64,
    /// Commanded rotation (rad)
    pub rotation: f64,
}
impl Control {
    pub fn new(distance: f64, rotation: f64) -> Self {
        Control { distance, rotation }
    }
    /// A control that commands no motion at all.
    pub fn stationary() -> Self {
        Control::default()
    }
}
impl Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Control(distance: {:.3} m, rotation: {:.3} rad)",
            self.distance, self.rotation
        )
    }
}

/// Wrap an angle to the canonical range $(-\pi, \pi]$ radians
///
/// # Arguments
/// * `angle` - The angle to be wrapped (rad).
///
/// # Returns
/// * The equivalent angle in $(-\pi, \pi]$.
///
/// # Example
/// ```rust
/// use pfloc::wrap_to_pi;
/// use std::f64::consts::PI;
///
/// assert!((wrap_to_pi(3.0 * PI) - PI).abs() < 1e-12);
/// assert!((wrap_to_pi(-PI) - PI).abs() < 1e-12);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(2.0 * PI);
    if wrapped > PI {
        wrapped - 2.0 * PI
    } else {
        wrapped
    }
}
/// Smallest signed difference `a - b` between two angles, in $(-\pi, \pi]$.
pub fn angle_difference(a: f64, b: f64) -> f64 {
    wrap_to_pi(a - b)
}

/// Axis-aligned rectangular region of the plane.
///
/// Used both as the support of uniform particle initialization and as the extent of a cyclic world
/// in which positions wrap around the edges.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}
impl Bounds {
    /// Create a new, validated region.
    ///
    /// # Errors
    /// Returns [ConfigurationError::InvalidParameter] if any limit is not finite or a minimum is not
    /// strictly smaller than its maximum.
    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Result<Self, ConfigurationError> {
        let bounds = Bounds {
            x_min,
            x_max,
            y_min,
            y_max,
        };
        bounds.validate()?;
        Ok(bounds)
    }
    /// Region `[0, width) x [0, height)`.
    pub fn from_size(width: f64, height: f64) -> Result<Self, ConfigurationError> {
        Bounds::new(0.0, width, 0.0, height)
    }
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let limits = [self.x_min, self.x_max, self.y_min, self.y_max];
        if limits.iter().any(|v| !v.is_finite()) {
            return Err(ConfigurationError::InvalidParameter {
                name: "bounds".to_string(),
                reason: format!("limits must be finite, got {}", self),
            });
        }
        if self.x_min >= self.x_max || self.y_min >= self.y_max {
            return Err(ConfigurationError::InvalidParameter {
                name: "bounds".to_string(),
                reason: format!("minimum must be below maximum, got {}", self),
            });
        }
        Ok(())
    }
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x < self.x_max && y >= self.y_min && y < self.y_max
    }
    /// Draw a position uniformly from the region.
    pub fn sample_position<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64) {
        let x = rng.random_range(self.x_min..self.x_max);
        let y = rng.random_range(self.y_min..self.y_max);
        (x, y)
    }
    /// Wrap a position into the region as if its opposite edges were glued together.
    pub fn wrap(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.x_min + (x - self.x_min).rem_euclid(self.width()),
            self.y_min + (y - self.y_min).rem_euclid(self.height()),
        )
    }
}
impl Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] x [{}, {}]",
            self.x_min, self.x_max, self.y_min, self.y_max
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_wrap_to_pi() {
        assert_approx_eq!(wrap_to_pi(0.0), 0.0, 1e-12);
        assert_approx_eq!(wrap_to_pi(PI), PI, 1e-12);
        assert_approx_eq!(wrap_to_pi(-PI), PI, 1e-12);
        assert_approx_eq!(wrap_to_pi(3.0 * PI / 2.0), -PI / 2.0, 1e-12);
        assert_approx_eq!(wrap_to_pi(-3.0 * PI / 2.0), PI / 2.0, 1e-12);
        assert_approx_eq!(wrap_to_pi(5.0 * PI / 2.0), PI / 2.0, 1e-9);
        assert_approx_eq!(wrap_to_pi(0.25 + 4.0 * PI), 0.25, 1e-9);
    }
    #[test]
    fn test_angle_difference_wraps() {
        assert_approx_eq!(angle_difference(PI - 0.01, -PI + 0.01), -0.02, 1e-12);
        assert_approx_eq!(angle_difference(-PI + 0.01, PI - 0.01), 0.02, 1e-12);
        assert_approx_eq!(angle_difference(1.0, 0.5), 0.5, 1e-12);
    }
    #[test]
    fn test_bounds_validation() {
        assert!(Bounds::new(0.0, 10.0, 0.0, 5.0).is_ok());
        assert!(Bounds::new(10.0, 0.0, 0.0, 5.0).is_err());
        assert!(Bounds::new(0.0, 10.0, 5.0, 5.0).is_err());
        assert!(Bounds::new(0.0, f64::NAN, 0.0, 5.0).is_err());
        assert!(Bounds::from_size(20.0, 20.0).is_ok());
    }
    #[test]
    fn test_bounds_wrap() {
        let bounds = Bounds::from_size(10.0, 20.0).unwrap();
        let (x, y) = bounds.wrap(12.5, -1.0);
        assert_approx_eq!(x, 2.5, 1e-12);
        assert_approx_eq!(y, 19.0, 1e-12);
        let (x, y) = bounds.wrap(3.0, 4.0);
        assert_approx_eq!(x, 3.0, 1e-12);
        assert_approx_eq!(y, 4.0, 1e-12);
    }
    #[test]
    fn test_bounds_sampling_stays_inside() {
        let bounds = Bounds::new(-5.0, 5.0, 2.0, 3.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let (x, y) = bounds.sample_position(&mut rng);
            assert!(bounds.contains(x, y));
        }
    }
    #[test]
    fn test_control_display() {
        let control = Control::new(1.0, 0.5);
        assert!(format!("{}", control).contains("distance"));
        assert_eq!(Control::stationary(), Control::new(0.0, 0.0));
    }
}
