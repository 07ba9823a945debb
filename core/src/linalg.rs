//! Weighted statistics over planar poses.
//!
//! Public API:
//!     pub fn circular_mean(angles, weights) -> f64
//!     pub fn weighted_mean(states, weights) -> State
//!     pub fn weighted_covariance(states, weights, mean) -> Matrix3<f64>
//!     pub fn symmetrize(m) -> Matrix3<f64>
//!
//! Position components are averaged linearly. The heading is averaged on the unit circle and its
//! residuals are wrapped to $(-\pi, \pi]$ before entering the covariance, so a cloud straddling the
//! ±π seam has a small heading variance instead of one near $\pi^2$.

use nalgebra::Matrix3;

use crate::{HEADING, State, X, Y, angle_difference};

/// Weighted circular mean of a set of angles.
///
/// $$
/// \bar{\psi} = \operatorname{atan2}\left( \sum_i w_i \sin \psi_i, \sum_i w_i \cos \psi_i \right)
/// $$
///
/// # Arguments
/// * `angles` - angles (rad)
/// * `weights` - one non-negative weight per angle; need not be normalized
///
/// # Returns
/// The mean direction in $(-\pi, \pi]$. When the weighted unit vectors cancel exactly the
/// direction is undefined and `atan2(0, 0) = 0` is returned.
pub fn circular_mean(angles: impl IntoIterator<Item = f64>, weights: &[f64]) -> f64 {
    let (sin_sum, cos_sum) = angles
        .into_iter()
        .zip(weights)
        .fold((0.0, 0.0), |(s, c), (angle, &w)| {
            (s + w * angle.sin(), c + w * angle.cos())
        });
    let mean = sin_sum.atan2(cos_sum);
    // atan2 returns -π for (-0.0, negative); keep the canonical half-open range
    if mean <= -std::f64::consts::PI {
        std::f64::consts::PI
    } else {
        mean
    }
}
/// Weighted mean of a set of poses, with the heading combined via [circular_mean].
///
/// Weights are assumed to be normalized.
pub fn weighted_mean(states: &[State], weights: &[f64]) -> State {
    let x = states.iter().zip(weights).map(|(s, w)| w * s[X]).sum::<f64>();
    let y = states.iter().zip(weights).map(|(s, w)| w * s[Y]).sum::<f64>();
    let heading = circular_mean(states.iter().map(|s| s[HEADING]), weights);
    State::new(x, y, heading)
}
/// Weighted covariance of a set of poses about `mean`.
///
/// $$
/// P = \sum_i w_i (x_i - \bar{x})(x_i - \bar{x})^T
/// $$
///
/// with the heading residual wrapped. The result is symmetrized.
pub fn weighted_covariance(states: &[State], weights: &[f64], mean: &State) -> Matrix3<f64> {
    let mut covariance = Matrix3::zeros();
    for (state, &w) in states.iter().zip(weights) {
        let mut residual = state - mean;
        residual[HEADING] = angle_difference(state[HEADING], mean[HEADING]);
        covariance += w * residual * residual.transpose();
    }
    symmetrize(&covariance)
}
/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Removes round-off asymmetry accumulated by sums of outer products.
#[inline]
pub fn symmetrize(m: &Matrix3<f64>) -> Matrix3<f64> {
    0.5 * (m + m.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn t_symmetrize() {
        let m = Matrix3::new(1.0, 2.0, 0.0, 0.0, 3.0, 4.0, 2.0, 0.0, 5.0);
        let s = symmetrize(&m);
        assert_eq!(s, s.transpose());
        assert_approx_eq!(s[(0, 1)], 1.0, 1e-15);
        assert_approx_eq!(s[(1, 2)], 2.0, 1e-15);
        assert_approx_eq!(s[(0, 2)], 1.0, 1e-15);
        assert_approx_eq!(s[(2, 2)], 5.0, 1e-15);
    }
    #[test]
    fn t_circular_mean_across_the_seam() {
        let mean = circular_mean([PI - 0.01, -PI + 0.01], &[0.5, 0.5]);
        assert!(mean.abs() > PI - 1e-9, "mean was {}", mean);
    }
    #[test]
    fn t_circular_mean_weighting() {
        let mean = circular_mean([0.0, FRAC_PI_2], &[0.5, 0.5]);
        assert_approx_eq!(mean, FRAC_PI_2 / 2.0, 1e-12);
        let mean = circular_mean([0.0, FRAC_PI_2], &[1.0, 0.0]);
        assert_approx_eq!(mean, 0.0, 1e-12);
    }
    #[test]
    fn t_circular_mean_degenerate() {
        let mean = circular_mean([0.0, PI], &[0.5, 0.5]);
        assert!(mean.is_finite());
        assert!(mean > -PI && mean <= PI);
    }
    #[test]
    fn t_weighted_mean() {
        let states = vec![State::new(0.0, 0.0, 0.1), State::new(4.0, 2.0, -0.1)];
        let mean = weighted_mean(&states, &[0.75, 0.25]);
        assert_approx_eq!(mean[X], 1.0, 1e-12);
        assert_approx_eq!(mean[Y], 0.5, 1e-12);
        assert!(mean[HEADING] > 0.0 && mean[HEADING] < 0.1);
    }
    #[test]
    fn t_weighted_covariance_wraps_heading() {
        let states = vec![State::new(1.0, 0.0, PI - 0.1), State::new(-1.0, 0.0, -PI + 0.1)];
        let weights = [0.5, 0.5];
        let mean = weighted_mean(&states, &weights);
        let cov = weighted_covariance(&states, &weights, &mean);
        assert_approx_eq!(cov[(0, 0)], 1.0, 1e-12);
        assert_approx_eq!(cov[(1, 1)], 0.0, 1e-12);
        assert_approx_eq!(cov[(2, 2)], 0.01, 1e-9);
        assert_eq!(cov, cov.transpose());
    }
}
