//! Resampling algorithms.
//!
//! Every algorithm turns a weighted [ParticleSet] of N particles into an equally weighted one of
//! N particles, drawing states with replacement so that the expected number of copies of particle
//! $i$ is exactly $N w_i$. They differ only in how the N sample points in $[0, 1)$ are generated:
//!
//! | Algorithm   | Sample points                                    |
//! |-------------|--------------------------------------------------|
//! | Multinomial | N independent draws $u_k \sim U[0, 1)$           |
//! | Stratified  | $u_k = (k + U_k) / N$, one draw per stratum      |
//! | Systematic  | $u_k = (k + U) / N$, a single shared draw        |
//! | Residual    | $\lfloor N w_i \rfloor$ deterministic copies, then systematic draws over the remainders |
//!
//! Each sample point is located in the cumulative weight distribution
//! $Q_i = \sum_{j \le i} w_j$ by binary search. Particle $i$ owns the interval $(Q_{i-1}, Q_i]$, so a
//! point landing exactly on a boundary goes to the lower index, and a particle with zero weight owns
//! an empty interval and can never be drawn.
use std::fmt::{self, Display};
use std::str::FromStr;

use log::warn;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::State;
use crate::error::ConfigurationError;
use crate::particle::ParticleSet;

/// Tolerance on the weight sum before the cumulative distribution is renormalized with a warning.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Cumulative weight distribution used to map sample points to particle indices.
#[derive(Clone, Debug, PartialEq)]
pub struct CumulativeWeights {
    cdf: Vec<f64>,
    first_positive: usize,
    last_positive: usize,
}
impl CumulativeWeights {
    /// Build the normalized cumulative distribution of `weights`.
    ///
    /// If the weights do not sum to one within [WEIGHT_SUM_TOLERANCE] a warning is logged and the
    /// distribution is renormalized. The final entry is always exactly 1.
    ///
    /// # Errors
    /// [ConfigurationError::InvalidParameter] for an empty vector, negative or non-finite weights,
    /// or a zero sum.
    pub fn new(weights: &[f64]) -> Result<Self, ConfigurationError> {
        let sum = validated_sum(weights)?;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            warn!(
                "Cumulative weight sum is {:.9}, expected 1; renormalizing before resampling",
                sum
            );
        }
        Ok(CumulativeWeights::normalized(weights, sum))
    }
    /// Same as [CumulativeWeights::new] for weights that are not expected to sum to one.
    fn normalized(weights: &[f64], sum: f64) -> Self {
        let first_positive = weights.iter().position(|&w| w > 0.0).unwrap_or(0);
        let last_positive = weights.iter().rposition(|&w| w > 0.0).unwrap_or(0);
        let mut running = 0.0;
        let mut cdf: Vec<f64> = weights
            .iter()
            .map(|w| {
                running += w;
                running / sum
            })
            .collect();
        for c in cdf.iter_mut().skip(last_positive) {
            *c = 1.0;
        }
        CumulativeWeights {
            cdf,
            first_positive,
            last_positive,
        }
    }
    pub fn values(&self) -> &[f64] {
        &self.cdf
    }
    /// Index of the particle whose interval $(Q_{i-1}, Q_i]$ contains `u`.
    pub fn locate(&self, u: f64) -> usize {
        self.cdf
            .partition_point(|&c| c < u)
            .clamp(self.first_positive, self.last_positive)
    }
}

fn validated_sum(weights: &[f64]) -> Result<f64, ConfigurationError> {
    if weights.is_empty() {
        return Err(ConfigurationError::invalid(
            "weights",
            "cannot resample an empty weight vector",
        ));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ConfigurationError::invalid(
            "weights",
            "weights must be finite and non-negative",
        ));
    }
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return Err(ConfigurationError::invalid(
            "weights",
            format!("weights must have a positive finite sum, got {}", sum),
        ));
    }
    Ok(sum)
}

/// Strategy for redrawing an equally weighted particle set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingAlgorithm {
    Multinomial,
    #[default]
    Stratified,
    Systematic,
    Residual,
}
impl ResamplingAlgorithm {
    pub const ALL: [ResamplingAlgorithm; 4] = [
        ResamplingAlgorithm::Multinomial,
        ResamplingAlgorithm::Stratified,
        ResamplingAlgorithm::Systematic,
        ResamplingAlgorithm::Residual,
    ];
    pub fn name(&self) -> &'static str {
        match self {
            ResamplingAlgorithm::Multinomial => "multinomial",
            ResamplingAlgorithm::Stratified => "stratified",
            ResamplingAlgorithm::Systematic => "systematic",
            ResamplingAlgorithm::Residual => "residual",
        }
    }
    /// Draw `n` particle indices from `weights`.
    ///
    /// # Errors
    /// [ConfigurationError::InvalidParticleCount] when `n` is zero, or
    /// [ConfigurationError::InvalidParameter] for an unusable weight vector.
    pub fn resample_indices(
        &self,
        weights: &[f64],
        n: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<usize>, ConfigurationError> {
        if n == 0 {
            return Err(ConfigurationError::InvalidParticleCount(n));
        }
        let cumulative = CumulativeWeights::new(weights)?;
        let indices = match self {
            ResamplingAlgorithm::Multinomial => multinomial(&cumulative, n, rng),
            ResamplingAlgorithm::Stratified => stratified(&cumulative, n, rng),
            ResamplingAlgorithm::Systematic => systematic(&cumulative, n, rng),
            ResamplingAlgorithm::Residual => residual(weights, n, rng),
        };
        Ok(indices)
    }
    /// Redraw `particles` into a set of the same size with every weight equal to 1/N.
    pub fn resample(
        &self,
        particles: &ParticleSet,
        rng: &mut StdRng,
    ) -> Result<ParticleSet, ConfigurationError> {
        let source = particles.particles();
        let indices = self.resample_indices(&particles.weights(), source.len(), rng)?;
        let states: Vec<State> = indices.iter().map(|&i| source[i].state).collect();
        Ok(ParticleSet::with_equal_weights(states))
    }
}
impl Display for ResamplingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
impl FromStr for ResamplingAlgorithm {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "multinomial" => Ok(ResamplingAlgorithm::Multinomial),
            "stratified" => Ok(ResamplingAlgorithm::Stratified),
            "systematic" => Ok(ResamplingAlgorithm::Systematic),
            "residual" => Ok(ResamplingAlgorithm::Residual),
            _ => Err(ConfigurationError::unknown("resampling", s)),
        }
    }
}

fn multinomial(cumulative: &CumulativeWeights, n: usize, rng: &mut StdRng) -> Vec<usize> {
    (0..n)
        .map(|_| cumulative.locate(rng.random::<f64>()))
        .collect()
}

fn stratified(cumulative: &CumulativeWeights, n: usize, rng: &mut StdRng) -> Vec<usize> {
    let step = 1.0 / n as f64;
    (0..n)
        .map(|k| cumulative.locate((k as f64 + rng.random::<f64>()) * step))
        .collect()
}

fn systematic(cumulative: &CumulativeWeights, n: usize, rng: &mut StdRng) -> Vec<usize> {
    let step = 1.0 / n as f64;
    let offset = rng.random::<f64>();
    (0..n)
        .map(|k| cumulative.locate((k as f64 + offset) * step))
        .collect()
}

fn residual(weights: &[f64], n: usize, rng: &mut StdRng) -> Vec<usize> {
    let sum: f64 = weights.iter().sum();
    let mut indices = Vec::with_capacity(n);
    let mut remainders = Vec::with_capacity(weights.len());
    for (i, &w) in weights.iter().enumerate() {
        let expected = w / sum * n as f64;
        let copies = expected.floor() as usize;
        indices.extend(std::iter::repeat_n(i, copies));
        remainders.push(expected - copies as f64);
    }
    indices.truncate(n);
    let remaining = n - indices.len();
    if remaining > 0 {
        let remainder_sum: f64 = remainders.iter().sum();
        if remainder_sum > 0.0 {
            let cumulative = CumulativeWeights::normalized(&remainders, remainder_sum);
            indices.extend(systematic(&cumulative, remaining, rng));
        } else {
            // floating-point leftovers only: fall back to the full distribution
            let cumulative = CumulativeWeights::normalized(weights, sum);
            indices.extend(systematic(&cumulative, remaining, rng));
        }
    }
    indices
}
