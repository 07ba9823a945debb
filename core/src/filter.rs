//! The particle filter cycle.
//!
//! [ParticleFilter] owns a [ParticleSet], a process model, a measurement model, a resampling
//! trigger, a resampling algorithm and a seeded random number generator. It is a two-state machine:
//! it starts *uninitialized* and becomes *running* once [ParticleFilter::initialize] has drawn the
//! initial particle cloud. Each call to [ParticleFilter::step] while running executes, in order:
//!
//! 1. propagate every particle through the process model,
//! 2. multiply every weight by the measurement likelihood and normalize,
//! 3. ask the trigger whether to resample, and if so redraw the set,
//! 4. emit the weighted mean and covariance as an [Estimate].
//!
//! A cycle is all-or-nothing: if weighting fails the error is returned, the particle set stays as it
//! was before the cycle and the cycle counter does not advance.
use std::fmt::{self, Debug, Display};

use log::{debug, info, warn};
use nalgebra::Matrix3;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{ConfigFile, FilterConfig};
use crate::error::{ConfigurationError, DegeneracyError, FilterError, FilterResult};
use crate::measurements::{Landmark, Measurement, MeasurementModel};
use crate::motion::ProcessModel;
use crate::particle::{InitializationMode, ParticleSet};
use crate::{Bounds, Control, HEADING, State, X, Y};

/// Filter output for one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Estimate {
    /// Cycle number, starting at 1 for the first step after initialization
    pub cycle: u64,
    /// Weighted mean pose (circular mean heading)
    pub mean: State,
    /// Weighted covariance about `mean`
    pub covariance: Matrix3<f64>,
    /// Effective sample size of the weighted set, before any resampling
    pub effective_sample_size: f64,
    /// Largest normalized weight, before any resampling
    pub max_weight: f64,
    /// Whether the set was resampled this cycle
    pub resampled: bool,
}
impl Estimate {
    pub fn x(&self) -> f64 {
        self.mean[X]
    }
    pub fn y(&self) -> f64 {
        self.mean[Y]
    }
    pub fn heading(&self) -> f64 {
        self.mean[HEADING]
    }
    /// Euclidean distance between the estimated and a reference position.
    pub fn position_error(&self, x: f64, y: f64) -> f64 {
        (self.x() - x).hypot(self.y() - y)
    }
}
impl Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Estimate(cycle: {}, x: {:.3}, y: {:.3}, heading: {:.3}, ess: {:.1}, resampled: {})",
            self.cycle,
            self.x(),
            self.y(),
            self.heading(),
            self.effective_sample_size,
            self.resampled
        )
    }
}

#[derive(Clone, Debug)]
enum FilterState {
    Uninitialized,
    Running(ParticleSet),
}

/// Sequential importance resampling filter over planar poses.
pub struct ParticleFilter<P = Box<dyn ProcessModel>, M = Box<dyn MeasurementModel>> {
    config: FilterConfig,
    process_model: P,
    measurement_model: M,
    state: FilterState,
    rng: StdRng,
    cycle: u64,
    last_estimate: Option<Estimate>,
}

impl ParticleFilter {
    /// Build a filter with the process and measurement models described by `config`.
    ///
    /// # Arguments
    /// * `config` - complete filter configuration
    /// * `landmarks` - known landmark positions used by the measurement model
    /// * `world` - optional cyclic world; propagated positions wrap around its edges
    pub fn from_config(
        config: FilterConfig,
        landmarks: Vec<Landmark>,
        world: Option<Bounds>,
    ) -> Result<Self, ConfigurationError> {
        let process_model = config.process.build(world)?;
        let measurement_model = config.measurement.build(landmarks)?;
        ParticleFilter::new(config, process_model, measurement_model)
    }
}

impl<P: ProcessModel, M: MeasurementModel> ParticleFilter<P, M> {
    /// Build an uninitialized filter around explicit models.
    ///
    /// The `process` and `measurement` sections of `config` are not consulted; every other section
    /// is, and the whole configuration is validated.
    pub fn new(
        config: FilterConfig,
        process_model: P,
        measurement_model: M,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        info!("Constructed particle filter: {}", config);
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(ParticleFilter {
            config,
            process_model,
            measurement_model,
            state: FilterState::Uninitialized,
            rng,
            cycle: 0,
            last_estimate: None,
        })
    }
    /// Draw the initial particle cloud from `mode` and enter the running state.
    ///
    /// Calling this again re-draws the cloud from the filter's current random stream and resets the
    /// cycle counter.
    pub fn initialize(&mut self, mode: &InitializationMode) -> Result<(), ConfigurationError> {
        let particles = ParticleSet::initialize(mode, self.config.num_particles, &mut self.rng)?;
        self.state = FilterState::Running(particles);
        self.cycle = 0;
        self.last_estimate = None;
        Ok(())
    }
    /// [Self::initialize] with the configured initialization mode.
    pub fn initialize_from_config(&mut self) -> Result<(), ConfigurationError> {
        let mode = self.config.initialization.clone();
        self.initialize(&mode)
    }
    /// Run one predict, weight, resample, estimate cycle.
    ///
    /// # Errors
    /// * [FilterError::NotInitialized] before [Self::initialize].
    /// * [FilterError::Configuration] if the measurement does not fit the measurement model.
    /// * [FilterError::Degeneracy] if no particle can explain the measurement.
    ///
    /// On error the particle set and cycle counter are unchanged.
    pub fn step(&mut self, control: &Control, measurement: &Measurement) -> FilterResult<Estimate> {
        let FilterState::Running(current) = &self.state else {
            return Err(FilterError::NotInitialized);
        };
        let cycle = self.cycle + 1;
        let mut particles = current.clone();
        particles.propagate(control, &self.process_model, &mut self.rng);
        if let Err(err) = particles.update_weights(measurement, &self.measurement_model) {
            return Err(match err {
                FilterError::Degeneracy(degeneracy) => {
                    let degeneracy = DegeneracyError {
                        cycle,
                        ..degeneracy
                    };
                    warn!("Aborting cycle: {}", degeneracy);
                    FilterError::Degeneracy(degeneracy)
                }
                other => other,
            });
        }
        let effective_sample_size = particles.effective_sample_size();
        let max_weight = particles.max_weight();
        let resampled = self.config.trigger.should_resample(&particles);
        if resampled {
            particles = self.config.resampling.resample(&particles, &mut self.rng)?;
        }
        let (mean, covariance) = particles.estimate();
        let estimate = Estimate {
            cycle,
            mean,
            covariance,
            effective_sample_size,
            max_weight,
            resampled,
        };
        debug!(
            "Cycle {}: ess {:.2}, max weight {:.4e}, resampled {}",
            cycle, effective_sample_size, max_weight, resampled
        );
        self.state = FilterState::Running(particles);
        self.cycle = cycle;
        self.last_estimate = Some(estimate.clone());
        Ok(estimate)
    }
    /// Drive a finite sequence of cycles, stopping at the first error.
    pub fn run<I>(&mut self, cycles: I) -> FilterResult<Vec<Estimate>>
    where
        I: IntoIterator<Item = (Control, Measurement)>,
    {
        cycles
            .into_iter()
            .map(|(control, measurement)| self.step(&control, &measurement))
            .collect()
    }
    pub fn is_initialized(&self) -> bool {
        matches!(self.state, FilterState::Running(_))
    }
    /// Number of completed cycles since initialization.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
    pub fn particles(&self) -> Option<&ParticleSet> {
        match &self.state {
            FilterState::Running(particles) => Some(particles),
            FilterState::Uninitialized => None,
        }
    }
    pub fn last_estimate(&self) -> Option<&Estimate> {
        self.last_estimate.as_ref()
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    pub fn num_particles(&self) -> usize {
        self.config.num_particles
    }
}

impl<P, M> Debug for ParticleFilter<P, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ParticleFilter");
        s.field("num_particles", &self.config.num_particles)
            .field("cycle", &self.cycle)
            .field("trigger", &format_args!("{}", self.config.trigger))
            .field("resampling", &format_args!("{}", self.config.resampling));
        match &self.state {
            FilterState::Uninitialized => s.field("state", &"uninitialized"),
            FilterState::Running(particles) => {
                let mean = particles.weighted_mean();
                s.field("effective_particles", &particles.effective_sample_size())
                    .field(
                        "weight_range",
                        &format_args!(
                            "[{:.4e}, {:.4e}]",
                            particles.min_weight(),
                            particles.max_weight()
                        ),
                    )
                    .field(
                        "mean",
                        &format_args!(
                            "({:.3} m, {:.3} m, {:.3} rad)",
                            mean[X], mean[Y], mean[HEADING]
                        ),
                    )
            }
        };
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MeasurementModelConfig, ProcessModelConfig};
    use crate::measurements::LandmarkRangeModel;
    use crate::motion::GaussianMotionModel;
    use crate::resampling::ResamplingAlgorithm;
    use crate::trigger::ResamplingTrigger;
    use assert_approx_eq::assert_approx_eq;

    fn small_config() -> FilterConfig {
        FilterConfig {
            num_particles: 200,
            seed: 7,
            process: ProcessModelConfig::Gaussian {
                x_std: 0.2,
                y_std: 0.2,
                heading_std: 0.05,
            },
            measurement: MeasurementModelConfig::Range { range_std: 0.5 },
            trigger: ResamplingTrigger::Always,
            resampling: ResamplingAlgorithm::Systematic,
            initialization: InitializationMode::Uniform {
                bounds: Bounds::from_size(10.0, 10.0).unwrap(),
            },
        }
    }
    fn small_filter() -> ParticleFilter {
        ParticleFilter::from_config(small_config(), vec![Landmark::new(0.0, 0.0)], None).unwrap()
    }

    #[test]
    fn step_before_initialize_fails() {
        let mut filter = small_filter();
        assert!(!filter.is_initialized());
        let result = filter.step(&Control::stationary(), &Measurement::new(vec![5.0]));
        assert!(matches!(result, Err(FilterError::NotInitialized)));
        assert_eq!(filter.cycle(), 0);
    }
    #[test]
    fn step_produces_estimates() {
        let mut filter = small_filter();
        filter.initialize_from_config().unwrap();
        assert!(filter.is_initialized());
        let estimate = filter
            .step(&Control::stationary(), &Measurement::new(vec![5.0]))
            .unwrap();
        assert_eq!(estimate.cycle, 1);
        assert!(estimate.resampled);
        assert!(estimate.effective_sample_size > 0.0);
        assert!(estimate.effective_sample_size <= 200.0 + 1e-9);
        assert_eq!(filter.cycle(), 1);
        assert_eq!(filter.last_estimate(), Some(&estimate));
        let particles = filter.particles().unwrap();
        assert_eq!(particles.len(), 200);
        let total: f64 = particles.weights().iter().sum();
        assert_approx_eq!(total, 1.0, 1e-9);
    }
    #[test]
    fn dimension_mismatch_is_surfaced_and_nothing_changes() {
        let mut filter = small_filter();
        filter.initialize_from_config().unwrap();
        let before = filter.particles().unwrap().clone();
        let result = filter.step(&Control::stationary(), &Measurement::new(vec![1.0, 2.0]));
        assert!(matches!(
            result,
            Err(FilterError::Configuration(
                ConfigurationError::DimensionMismatch { .. }
            ))
        ));
        assert_eq!(filter.particles().unwrap(), &before);
        assert_eq!(filter.cycle(), 0);
    }
    #[test]
    fn same_seed_same_run() {
        let cycles: Vec<(Control, Measurement)> = (0..5)
            .map(|k| (Control::new(0.5, 0.1), Measurement::new(vec![6.0 - k as f64 * 0.5])))
            .collect();
        let mut a = small_filter();
        let mut b = small_filter();
        a.initialize_from_config().unwrap();
        b.initialize_from_config().unwrap();
        let run_a = a.run(cycles.clone()).unwrap();
        let run_b = b.run(cycles).unwrap();
        assert_eq!(run_a, run_b);
        assert_eq!(a.particles(), b.particles());
    }
    #[test]
    fn reinitialize_resets_cycle() {
        let mut filter = small_filter();
        filter.initialize_from_config().unwrap();
        filter
            .step(&Control::stationary(), &Measurement::new(vec![5.0]))
            .unwrap();
        filter
            .initialize(&InitializationMode::Seeded {
                state: [3.0, 4.0, 0.0],
                std: [0.0, 0.0, 0.0],
            })
            .unwrap();
        assert_eq!(filter.cycle(), 0);
        assert!(filter.last_estimate().is_none());
        let mean = filter.particles().unwrap().weighted_mean();
        assert_approx_eq!(mean[X], 3.0, 1e-12);
        assert_approx_eq!(mean[Y], 4.0, 1e-12);
    }
    #[test]
    fn max_weight_trigger_can_skip_resampling() {
        let config = FilterConfig {
            trigger: ResamplingTrigger::MaxWeight { threshold: 1.0 },
            ..small_config()
        };
        let mut filter =
            ParticleFilter::from_config(config, vec![Landmark::new(0.0, 0.0)], None).unwrap();
        filter.initialize_from_config().unwrap();
        let estimate = filter
            .step(&Control::stationary(), &Measurement::new(vec![5.0]))
            .unwrap();
        assert!(!estimate.resampled);
    }
    #[test]
    fn explicit_models() {
        let process = GaussianMotionModel::new(0.0, 0.0, 0.0).unwrap();
        let measurement = LandmarkRangeModel::new(vec![Landmark::new(0.0, 0.0)], 1.0).unwrap();
        let mut filter = ParticleFilter::new(small_config(), process, measurement).unwrap();
        filter
            .initialize(&InitializationMode::Seeded {
                state: [3.0, 4.0, 0.0],
                std: [0.0, 0.0, 0.0],
            })
            .unwrap();
        let estimate = filter
            .step(&Control::new(1.0, 0.0), &Measurement::new(vec![4.0_f64.hypot(4.0)]))
            .unwrap();
        assert_approx_eq!(estimate.x(), 4.0, 1e-9);
        assert_approx_eq!(estimate.y(), 4.0, 1e-9);
        assert_approx_eq!(estimate.position_error(4.0, 4.0), 0.0, 1e-9);
    }
    #[test]
    fn debug_summary() {
        let mut filter = small_filter();
        assert!(format!("{:?}", filter).contains("uninitialized"));
        filter.initialize_from_config().unwrap();
        let summary = format!("{:?}", filter);
        assert!(summary.contains("effective_particles"));
        assert!(summary.contains("num_particles: 200"));
    }
}
