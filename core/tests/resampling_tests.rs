//! Statistical checks on the resampling algorithms.
//!
//! Every algorithm must be unbiased: over many independent draws the share of offspring of each
//! particle converges to its weight. Low-variance schemes must additionally keep every particle's
//! copy count within one of `N * w`.
use rand::SeedableRng;
use rand::rngs::StdRng;

use pfloc::particle::Particle;
use pfloc::{ParticleSet, ResamplingAlgorithm, State};

const WEIGHTS: [f64; 4] = [0.1, 0.2, 0.3, 0.4];

fn offspring_counts(indices: &[usize], len: usize) -> Vec<usize> {
    let mut counts = vec![0; len];
    for &i in indices {
        counts[i] += 1;
    }
    counts
}

#[test]
fn offspring_frequencies_match_the_weights() {
    let trials = 10_000;
    let n = WEIGHTS.len();
    for algorithm in ResamplingAlgorithm::ALL {
        let mut rng = StdRng::seed_from_u64(2024);
        let mut totals = vec![0usize; n];
        for _ in 0..trials {
            let indices = algorithm.resample_indices(&WEIGHTS, n, &mut rng).unwrap();
            assert_eq!(indices.len(), n);
            for (total, count) in totals.iter_mut().zip(offspring_counts(&indices, n)) {
                *total += count;
            }
        }
        let draws = (trials * n) as f64;
        let tolerance = 4.0 * (n as f64).sqrt() / (trials as f64).sqrt() / n as f64;
        for (i, &total) in totals.iter().enumerate() {
            let frequency = total as f64 / draws;
            assert!(
                (frequency - WEIGHTS[i]).abs() < tolerance,
                "{}: particle {} drawn with frequency {}, weight {}",
                algorithm,
                i,
                frequency,
                WEIGHTS[i]
            );
        }
    }
}

#[test]
fn low_variance_schemes_stay_within_one_copy() {
    let weights = [0.05, 0.15, 0.02, 0.33, 0.25, 0.2];
    let n = 50;
    for algorithm in [
        ResamplingAlgorithm::Systematic,
        ResamplingAlgorithm::Residual,
    ] {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let indices = algorithm.resample_indices(&weights, n, &mut rng).unwrap();
            for (i, count) in offspring_counts(&indices, weights.len()).iter().enumerate() {
                let expected = n as f64 * weights[i];
                assert!(
                    (*count as f64 - expected).abs() < 1.0 + 1e-9,
                    "{}: particle {} copied {} times, expected about {}",
                    algorithm,
                    i,
                    count,
                    expected
                );
            }
        }
    }
}

#[test]
fn zero_weight_particles_never_survive() {
    let set = ParticleSet::from_particles(vec![
        Particle::new(State::new(0.0, 0.0, 0.0), 0.0),
        Particle::new(State::new(1.0, 0.0, 0.0), 0.6),
        Particle::new(State::new(2.0, 0.0, 0.0), 0.0),
        Particle::new(State::new(3.0, 0.0, 0.0), 0.4),
        Particle::new(State::new(4.0, 0.0, 0.0), 0.0),
    ])
    .unwrap();
    for algorithm in ResamplingAlgorithm::ALL {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let resampled = algorithm.resample(&set, &mut rng).unwrap();
            assert_eq!(resampled.len(), set.len());
            for particle in resampled.iter() {
                assert!(
                    particle.state[0] == 1.0 || particle.state[0] == 3.0,
                    "{} kept a zero-weight particle at x = {}",
                    algorithm,
                    particle.state[0]
                );
                assert!((particle.weight - 0.2).abs() < 1e-12);
            }
        }
    }
}
