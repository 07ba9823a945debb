//! Weighted particle set.
//!
//! A [ParticleSet] is the discrete approximation of the posterior over the agent's pose: an ordered
//! collection of N `(state, weight)` pairs whose weights sum to one. The particle count is fixed when
//! the set is created and is preserved by every operation. Propagation replaces states and leaves
//! weights alone; weighting replaces weights and leaves states alone.
use std::fmt::{self, Display};
use std::slice::Iter;

use log::info;
use nalgebra::Matrix3;
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, DegeneracyError, FilterError};
use crate::linalg::{weighted_covariance, weighted_mean};
use crate::measurements::{Measurement, MeasurementModel};
use crate::motion::{ProcessModel, validate_noise_std};
use crate::{Bounds, Control, HEADING, State, X, Y, wrap_to_pi};

/// One hypothesis of the agent's pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub state: State,
    pub weight: f64,
}
impl Particle {
    pub fn new(state: State, weight: f64) -> Self {
        Particle { state, weight }
    }
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("x", &self.state[X])
            .field("y", &self.state[Y])
            .field("heading", &self.state[HEADING])
            .field("weight", &self.weight)
            .finish()
    }
}

/// How the initial particle cloud is drawn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitializationMode {
    /// No prior: positions uniform over `bounds`, heading uniform over the circle.
    Uniform { bounds: Bounds },
    /// Known prior: each component drawn from $N(\text{state}_k, \text{std}_k^2)$. A zero standard
    /// deviation places every particle exactly on the prior for that component.
    Seeded { state: [f64; 3], std: [f64; 3] },
}
impl Default for InitializationMode {
    fn default() -> Self {
        InitializationMode::Uniform {
            bounds: Bounds {
                x_min: 0.0,
                x_max: 20.0,
                y_min: 0.0,
                y_max: 20.0,
            },
        }
    }
}
impl Display for InitializationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitializationMode::Uniform { bounds } => write!(f, "uniform over {}", bounds),
            InitializationMode::Seeded { state, std } => write!(
                f,
                "seeded at ({}, {}, {}) with std ({}, {}, {})",
                state[0], state[1], state[2], std[0], std[1], std[2]
            ),
        }
    }
}
impl InitializationMode {
    /// Build a mode from its name (`uniform` or `seeded`, case-insensitive).
    ///
    /// `bounds` is used by `uniform`; `prior` and `std` by `seeded`.
    pub fn from_name(
        name: &str,
        bounds: Bounds,
        prior: [f64; 3],
        std: [f64; 3],
    ) -> Result<Self, ConfigurationError> {
        let mode = match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "uniform" => InitializationMode::Uniform { bounds },
            "seeded" | "known" => InitializationMode::Seeded { state: prior, std },
            _ => return Err(ConfigurationError::unknown("initialization", name)),
        };
        mode.validate()?;
        Ok(mode)
    }
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            InitializationMode::Uniform { bounds } => bounds.validate(),
            InitializationMode::Seeded { state, std } => {
                if state.iter().any(|v| !v.is_finite()) {
                    return Err(ConfigurationError::invalid(
                        "initialization.state",
                        "prior state must be finite",
                    ));
                }
                for (name, &s) in ["std.x", "std.y", "std.heading"].iter().zip(std) {
                    validate_noise_std(name, s)?;
                }
                Ok(())
            }
        }
    }
    /// Draw one initial state.
    pub fn sample(&self, rng: &mut StdRng) -> State {
        match self {
            InitializationMode::Uniform { bounds } => {
                let (x, y) = bounds.sample_position(rng);
                let heading = rng.random_range(0.0..2.0 * std::f64::consts::PI);
                State::new(x, y, wrap_to_pi(heading))
            }
            InitializationMode::Seeded { state, std } => {
                let mut draw = [0.0; 3];
                for k in 0..3 {
                    let n: f64 = if std[k] > 0.0 {
                        rng.sample(StandardNormal)
                    } else {
                        0.0
                    };
                    draw[k] = state[k] + std[k] * n;
                }
                State::new(draw[0], draw[1], wrap_to_pi(draw[2]))
            }
        }
    }
}

/// An ordered collection of weighted particles.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticleSet {
    particles: Vec<Particle>,
}
impl ParticleSet {
    /// Draw `num_particles` particles from `mode`, all with weight 1/N.
    ///
    /// # Errors
    /// [ConfigurationError::InvalidParticleCount] if `num_particles` is zero, or the mode's own
    /// validation error.
    pub fn initialize(
        mode: &InitializationMode,
        num_particles: usize,
        rng: &mut StdRng,
    ) -> Result<Self, ConfigurationError> {
        if num_particles == 0 {
            return Err(ConfigurationError::InvalidParticleCount(num_particles));
        }
        mode.validate()?;
        let states = (0..num_particles).map(|_| mode.sample(rng)).collect();
        info!("Initialized {} particles, {}", num_particles, mode);
        Ok(ParticleSet::with_equal_weights(states))
    }
    /// Build a set from explicit particles; weights are normalized to sum to one.
    ///
    /// # Errors
    /// [ConfigurationError::InvalidParticleCount] for an empty list, or
    /// [ConfigurationError::InvalidParameter] for negative or non-finite weights, non-finite states,
    /// or weights that sum to zero.
    pub fn from_particles(particles: Vec<Particle>) -> Result<Self, ConfigurationError> {
        if particles.is_empty() {
            return Err(ConfigurationError::InvalidParticleCount(0));
        }
        if particles
            .iter()
            .any(|p| !p.weight.is_finite() || p.weight < 0.0)
        {
            return Err(ConfigurationError::invalid(
                "weights",
                "particle weights must be finite and non-negative",
            ));
        }
        if particles.iter().any(|p| p.state.iter().any(|v| !v.is_finite())) {
            return Err(ConfigurationError::invalid(
                "states",
                "particle states must be finite",
            ));
        }
        let total: f64 = particles.iter().map(|p| p.weight).sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(ConfigurationError::invalid(
                "weights",
                format!("particle weights must have a positive finite sum, got {}", total),
            ));
        }
        let particles = particles
            .into_iter()
            .map(|p| Particle::new(wrap_heading(p.state), p.weight / total))
            .collect();
        Ok(ParticleSet { particles })
    }
    /// Build a set in which every state carries weight 1/N.
    pub(crate) fn with_equal_weights(states: Vec<State>) -> Self {
        let weight = 1.0 / states.len() as f64;
        ParticleSet {
            particles: states
                .into_iter()
                .map(|state| Particle::new(state, weight))
                .collect(),
        }
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn iter(&self) -> Iter<'_, Particle> {
        self.particles.iter()
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }
    pub fn states(&self) -> Vec<State> {
        self.particles.iter().map(|p| p.state).collect()
    }
    /// Replace every state with `process_model.propagate(state, control)`, in index order.
    pub fn propagate<P: ProcessModel + ?Sized>(
        &mut self,
        control: &Control,
        process_model: &P,
        rng: &mut StdRng,
    ) {
        for particle in self.particles.iter_mut() {
            particle.state = process_model.propagate(&particle.state, control, rng);
        }
    }
    /// Multiply every weight by the measurement likelihood of its particle and renormalize.
    ///
    /// Weights are combined in log space and shifted by their maximum before exponentiation, so a
    /// measurement that is merely very unlikely for every particle still produces valid weights.
    /// On any error the set is left exactly as it was.
    ///
    /// # Errors
    /// * [FilterError::Configuration] if the model rejects the measurement (e.g. dimension mismatch).
    /// * [FilterError::Degeneracy] if every particle has zero likelihood, or any weight is not
    ///   finite. The reported cycle is 0; [crate::filter::ParticleFilter] stamps its own.
    pub fn update_weights<M: MeasurementModel + ?Sized>(
        &mut self,
        measurement: &Measurement,
        measurement_model: &M,
    ) -> Result<(), FilterError> {
        let mut log_weights = Vec::with_capacity(self.particles.len());
        let mut max_log = f64::NEG_INFINITY;
        let mut non_finite = false;
        for particle in &self.particles {
            let log_likelihood = measurement_model.log_likelihood(&particle.state, measurement)?;
            let log_w = particle.weight.ln() + log_likelihood;
            if log_w.is_nan() || log_w == f64::INFINITY {
                non_finite = true;
            }
            if log_w > max_log {
                max_log = log_w;
            }
            log_weights.push(log_w);
        }
        if non_finite || max_log == f64::NEG_INFINITY {
            let total_weight = log_weights.iter().map(|l| l.exp()).sum::<f64>();
            return Err(DegeneracyError {
                cycle: 0,
                total_weight,
                measurement: measurement.clone(),
            }
            .into());
        }
        let shifted: Vec<f64> = log_weights.iter().map(|l| (l - max_log).exp()).collect();
        let sum: f64 = shifted.iter().sum();
        for (particle, w) in self.particles.iter_mut().zip(shifted) {
            particle.weight = w / sum;
        }
        Ok(())
    }
    /// Weighted mean with the heading combined by circular mean.
    pub fn weighted_mean(&self) -> State {
        weighted_mean(&self.states(), &self.weights())
    }
    /// Weighted covariance about [Self::weighted_mean], heading residuals wrapped.
    pub fn covariance(&self) -> Matrix3<f64> {
        let states = self.states();
        let weights = self.weights();
        let mean = weighted_mean(&states, &weights);
        weighted_covariance(&states, &weights, &mean)
    }
    /// Weighted mean and covariance in one pass over the particles.
    pub fn estimate(&self) -> (State, Matrix3<f64>) {
        let states = self.states();
        let weights = self.weights();
        let mean = weighted_mean(&states, &weights);
        let covariance = weighted_covariance(&states, &weights, &mean);
        (mean, covariance)
    }
    /// $N_{eff} = 1 / \sum_i w_i^2$, or 0 for an all-zero weight vector.
    pub fn effective_sample_size(&self) -> f64 {
        let sum_sq: f64 = self.particles.iter().map(|p| p.weight * p.weight).sum();
        if sum_sq > 0.0 { 1.0 / sum_sq } else { 0.0 }
    }
    pub fn max_weight(&self) -> f64 {
        self.particles.iter().map(|p| p.weight).fold(0.0, f64::max)
    }
    pub fn min_weight(&self) -> f64 {
        self.particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min)
    }
}
impl<'a> IntoIterator for &'a ParticleSet {
    type Item = &'a Particle;
    type IntoIter = Iter<'a, Particle>;
    fn into_iter(self) -> Self::IntoIter {
        self.particles.iter()
    }
}

fn wrap_heading(mut state: State) -> State {
    state[HEADING] = wrap_to_pi(state[HEADING]);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurements::{Landmark, LandmarkRangeModel};
    use crate::motion::GaussianMotionModel;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::{DMatrix, DVector};
    use rand::SeedableRng;
    use std::f64::consts::PI;

    struct ZeroLikelihood;
    impl MeasurementModel for ZeroLikelihood {
        fn dimension(&self) -> usize {
            1
        }
        fn noise(&self) -> DMatrix<f64> {
            DMatrix::identity(1, 1)
        }
        fn expected_measurement(&self, _state: &State) -> DVector<f64> {
            DVector::zeros(1)
        }
        fn likelihood(
            &self,
            _state: &State,
            _measurement: &Measurement,
        ) -> Result<f64, ConfigurationError> {
            Ok(0.0)
        }
    }

    fn set_with_weights(weights: &[f64]) -> ParticleSet {
        ParticleSet::from_particles(
            weights
                .iter()
                .enumerate()
                .map(|(i, &w)| Particle::new(State::new(i as f64, 0.0, 0.0), w))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn uniform_initialization() {
        let mut rng = StdRng::seed_from_u64(42);
        let bounds = Bounds::from_size(10.0, 5.0).unwrap();
        let set = ParticleSet::initialize(&InitializationMode::Uniform { bounds }, 500, &mut rng)
            .unwrap();
        assert_eq!(set.len(), 500);
        for p in set.iter() {
            assert!(bounds.contains(p.state[X], p.state[Y]));
            assert!(p.state[HEADING] > -PI && p.state[HEADING] <= PI);
            assert_approx_eq!(p.weight, 1.0 / 500.0, 1e-15);
        }
    }
    #[test]
    fn seeded_initialization_with_zero_spread_is_the_prior() {
        let mut rng = StdRng::seed_from_u64(42);
        let mode = InitializationMode::Seeded {
            state: [1.0, 2.0, 0.5],
            std: [0.0, 0.0, 0.0],
        };
        let set = ParticleSet::initialize(&mode, 10, &mut rng).unwrap();
        assert!(set.iter().all(|p| p.state == State::new(1.0, 2.0, 0.5)));
    }
    #[test]
    fn seeded_initialization_spread() {
        let mut rng = StdRng::seed_from_u64(5);
        let mode = InitializationMode::Seeded {
            state: [1.0, 2.0, 0.5],
            std: [0.3, 0.3, 0.05],
        };
        let set = ParticleSet::initialize(&mode, 5000, &mut rng).unwrap();
        let mean = set.weighted_mean();
        assert_approx_eq!(mean[X], 1.0, 0.02);
        assert_approx_eq!(mean[Y], 2.0, 0.02);
        assert_approx_eq!(mean[HEADING], 0.5, 0.005);
        let cov = set.covariance();
        assert_approx_eq!(cov[(0, 0)].sqrt(), 0.3, 0.02);
    }
    #[test]
    fn zero_particles_is_a_configuration_error() {
        let mut rng = StdRng::seed_from_u64(0);
        let result = ParticleSet::initialize(&InitializationMode::default(), 0, &mut rng);
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidParticleCount(0))
        ));
    }
    #[test]
    fn initialization_mode_names() {
        let bounds = Bounds::from_size(1.0, 1.0).unwrap();
        let mode = InitializationMode::from_name("Uniform", bounds, [0.0; 3], [0.0; 3]).unwrap();
        assert_eq!(mode, InitializationMode::Uniform { bounds });
        let mode = InitializationMode::from_name("seeded", bounds, [1.0; 3], [0.1; 3]).unwrap();
        assert!(matches!(mode, InitializationMode::Seeded { .. }));
        assert!(matches!(
            InitializationMode::from_name("gaussian-blob", bounds, [0.0; 3], [0.0; 3]),
            Err(ConfigurationError::UnknownStrategy { .. })
        ));
        assert!(InitializationMode::from_name("seeded", bounds, [0.0; 3], [-1.0, 0.0, 0.0]).is_err());
    }
    #[test]
    fn update_weights_normalizes() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut set = ParticleSet::initialize(
            &InitializationMode::Uniform {
                bounds: Bounds::from_size(10.0, 10.0).unwrap(),
            },
            200,
            &mut rng,
        )
        .unwrap();
        let model = LandmarkRangeModel::new(vec![Landmark::new(0.0, 0.0)], 0.5).unwrap();
        for z in [8.0, 7.0, 6.0] {
            set.update_weights(&Measurement::new(vec![z]), &model).unwrap();
            let total: f64 = set.weights().iter().sum();
            assert_approx_eq!(total, 1.0, 1e-9);
            assert!(set.iter().all(|p| p.weight >= 0.0 && p.weight.is_finite()));
        }
    }
    #[test]
    fn update_weights_multiplies_prior_weights() {
        let mut set = ParticleSet::from_particles(vec![
            Particle::new(State::new(1.0, 0.0, 0.0), 0.75),
            Particle::new(State::new(2.0, 0.0, 0.0), 0.25),
        ])
        .unwrap();
        let model = LandmarkRangeModel::new(vec![Landmark::new(0.0, 0.0)], 1.0).unwrap();
        // both particles are equally far from the measured range
        set.update_weights(&Measurement::new(vec![1.5]), &model).unwrap();
        assert_approx_eq!(set.particles()[0].weight, 0.75, 1e-12);
        assert_approx_eq!(set.particles()[1].weight, 0.25, 1e-12);
    }
    #[test]
    fn underflowing_likelihoods_are_not_degenerate() {
        let mut set = ParticleSet::from_particles(vec![
            Particle::new(State::new(1.0, 0.0, 0.0), 0.5),
            Particle::new(State::new(2.0, 0.0, 0.0), 0.5),
        ])
        .unwrap();
        let model = LandmarkRangeModel::new(vec![Landmark::new(0.0, 0.0)], 0.01).unwrap();
        // raw likelihoods are far below f64::MIN_POSITIVE for both particles
        set.update_weights(&Measurement::new(vec![100.0]), &model).unwrap();
        assert!(set.particles()[1].weight > 0.99);
        let total: f64 = set.weights().iter().sum();
        assert_approx_eq!(total, 1.0, 1e-12);
    }
    #[test]
    fn degenerate_update_leaves_the_set_untouched() {
        let mut set = set_with_weights(&[0.2, 0.3, 0.5]);
        let before = set.clone();
        let result = set.update_weights(&Measurement::new(vec![1.0]), &ZeroLikelihood);
        match result {
            Err(FilterError::Degeneracy(err)) => {
                assert_eq!(err.total_weight, 0.0);
                assert_eq!(err.measurement, Measurement::new(vec![1.0]));
            }
            other => panic!("expected degeneracy, got {:?}", other),
        }
        assert_eq!(set, before);
    }
    #[test]
    fn dimension_mismatch_leaves_the_set_untouched() {
        let mut set = set_with_weights(&[0.5, 0.5]);
        let before = set.clone();
        let model = LandmarkRangeModel::new(vec![Landmark::new(0.0, 0.0)], 1.0).unwrap();
        let result = set.update_weights(&Measurement::new(vec![1.0, 2.0]), &model);
        assert!(matches!(
            result,
            Err(FilterError::Configuration(
                ConfigurationError::DimensionMismatch { .. }
            ))
        ));
        assert_eq!(set, before);
    }
    #[test]
    fn propagate_keeps_weights() {
        let mut set = set_with_weights(&[0.1, 0.9]);
        let model = GaussianMotionModel::new(0.1, 0.1, 0.1).unwrap();
        let mut rng = StdRng::seed_from_u64(8);
        let before = set.clone();
        set.propagate(&Control::new(1.0, 0.0), &model, &mut rng);
        assert_eq!(set.weights(), before.weights());
        assert_ne!(set.states(), before.states());
    }
    #[test]
    fn effective_sample_size_extremes() {
        let n = 100;
        let uniform = set_with_weights(&vec![1.0; n]);
        assert_approx_eq!(uniform.effective_sample_size(), n as f64, 1e-9);
        let mut one_hot = vec![0.0; n];
        one_hot[17] = 1.0;
        let one_hot = set_with_weights(&one_hot);
        assert_approx_eq!(one_hot.effective_sample_size(), 1.0, 1e-12);
    }
    #[test]
    fn max_and_min_weight() {
        let set = set_with_weights(&[0.5, 0.3, 0.2]);
        assert_approx_eq!(set.max_weight(), 0.5, 1e-12);
        assert_approx_eq!(set.min_weight(), 0.2, 1e-12);
    }
    #[test]
    fn circular_weighted_mean_across_the_seam() {
        let set = ParticleSet::from_particles(vec![
            Particle::new(State::new(0.0, 0.0, PI - 0.01), 0.5),
            Particle::new(State::new(2.0, 2.0, -PI + 0.01), 0.5),
        ])
        .unwrap();
        let mean = set.weighted_mean();
        assert!(mean[HEADING].abs() > PI - 1e-6);
        assert_approx_eq!(mean[X], 1.0, 1e-12);
        assert_approx_eq!(mean[Y], 1.0, 1e-12);
    }
    #[test]
    fn from_particles_validation() {
        assert!(ParticleSet::from_particles(vec![]).is_err());
        assert!(
            ParticleSet::from_particles(vec![Particle::new(State::zeros(), -1.0)]).is_err()
        );
        assert!(ParticleSet::from_particles(vec![Particle::new(State::zeros(), 0.0)]).is_err());
        assert!(
            ParticleSet::from_particles(vec![Particle::new(
                State::new(f64::NAN, 0.0, 0.0),
                1.0
            )])
            .is_err()
        );
        let set = set_with_weights(&[2.0, 6.0]);
        assert_eq!(set.weights(), vec![0.25, 0.75]);
    }
    #[test]
    fn estimate_matches_components() {
        let set = set_with_weights(&[0.25, 0.25, 0.5]);
        let (mean, cov) = set.estimate();
        assert_eq!(mean, set.weighted_mean());
        assert_eq!(cov, set.covariance());
    }
}
