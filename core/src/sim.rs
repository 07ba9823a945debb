//! Landmark world simulation.
//!
//! This module provides:
//! - [World]: a rectangular, cyclic world with known landmarks
//! - [Robot]: a ground-truth agent that moves with its own (true) process noise and observes the
//!   landmarks with its own (true) measurement noise
//! - [ScenarioConfig] and [run_scenario]: a closed loop that drives a [ParticleFilter] with the
//!   robot's controls and measurements and records truth against estimate every cycle
//! - [ScenarioRecord]: one CSV row of that record
//!
//! The robot owns its random number generator, independent of the filter's, so changing filter
//! settings never changes the simulated ground truth for a given seed.
use std::f64::consts::PI;
use std::path::Path;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigFile, FilterConfig};
use crate::error::{ConfigurationError, FilterError};
use crate::filter::{Estimate, ParticleFilter};
use crate::measurements::{Landmark, Measurement};
use crate::motion::{OdometryMotionModel, ProcessModel, validate_noise_std};
use crate::{Bounds, Control, HEADING, State, X, Y, angle_difference, wrap_to_pi};

/// Rectangular world `[0, width) x [0, height)` whose opposite edges are glued together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct World {
    pub width: f64,
    pub height: f64,
    pub landmarks: Vec<Landmark>,
}
impl Default for World {
    fn default() -> Self {
        World {
            width: 20.0,
            height: 20.0,
            landmarks: vec![
                Landmark::new(1.0, 1.0),
                Landmark::new(1.0, 19.0),
                Landmark::new(19.0, 1.0),
                Landmark::new(19.0, 19.0),
            ],
        }
    }
}
impl World {
    pub fn new(width: f64, height: f64, landmarks: Vec<Landmark>) -> Result<Self, ConfigurationError> {
        let world = World {
            width,
            height,
            landmarks,
        };
        world.validate()?;
        Ok(world)
    }
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.bounds()?;
        if self.landmarks.is_empty() {
            return Err(ConfigurationError::invalid(
                "world.landmarks",
                "at least one landmark is required",
            ));
        }
        Ok(())
    }
    pub fn bounds(&self) -> Result<Bounds, ConfigurationError> {
        Bounds::from_size(self.width, self.height)
    }
}

/// True noise levels of the simulated robot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotNoise {
    /// Standard deviation of the distance actually driven (m)
    pub forward_std: f64,
    /// Standard deviation of the rotation actually applied (rad)
    pub turn_std: f64,
    /// Standard deviation of the measured range (m)
    pub range_std: f64,
    /// Standard deviation of the measured bearing (rad)
    pub bearing_std: f64,
}
impl Default for RobotNoise {
    fn default() -> Self {
        RobotNoise {
            forward_std: 0.005,
            turn_std: 0.002,
            range_std: 0.2,
            bearing_std: 0.05,
        }
    }
}
impl RobotNoise {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_noise_std("robot_noise.forward_std", self.forward_std)?;
        validate_noise_std("robot_noise.turn_std", self.turn_std)?;
        validate_noise_std("robot_noise.range_std", self.range_std)?;
        validate_noise_std("robot_noise.bearing_std", self.bearing_std)
    }
}

/// Ground-truth agent.
#[derive(Clone, Debug)]
pub struct Robot {
    pose: State,
    motion: OdometryMotionModel,
    range_std: f64,
    bearing_std: f64,
    rng: StdRng,
}
impl Robot {
    pub fn new(pose: State, noise: RobotNoise, seed: u64) -> Result<Self, ConfigurationError> {
        noise.validate()?;
        let mut pose = pose;
        pose[HEADING] = wrap_to_pi(pose[HEADING]);
        Ok(Robot {
            pose,
            motion: OdometryMotionModel::new(noise.forward_std, noise.turn_std)?,
            range_std: noise.range_std,
            bearing_std: noise.bearing_std,
            rng: StdRng::seed_from_u64(seed),
        })
    }
    pub fn pose(&self) -> &State {
        &self.pose
    }
    /// Drive `control.distance` along the current heading (wrapping around the world), then rotate.
    pub fn move_by(&mut self, control: &Control, world: &World) -> Result<(), ConfigurationError> {
        let motion = self.motion.clone().with_world(world.bounds()?);
        self.pose = motion.propagate(&self.pose, control, &mut self.rng);
        Ok(())
    }
    /// Noisy range and heading-relative bearing to every landmark, `[r0, b0, r1, b1, ...]`.
    pub fn measure(&mut self, world: &World) -> Measurement {
        let mut values = Vec::with_capacity(2 * world.landmarks.len());
        for landmark in &world.landmarks {
            let (range, direction) = landmark.range_and_direction(self.pose[X], self.pose[Y]);
            let range_noise: f64 = self.rng.sample(StandardNormal);
            let bearing_noise: f64 = self.rng.sample(StandardNormal);
            values.push(range + self.range_std * range_noise);
            values.push(wrap_to_pi(
                direction - self.pose[HEADING] + self.bearing_std * bearing_noise,
            ));
        }
        Measurement::new(values)
    }
}

/// Limits of the random controls commanded each step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlLimits {
    /// Forward distance is drawn uniformly from `[-max_distance, max_distance)` (m)
    pub max_distance: f64,
    /// Rotation is drawn uniformly from `[-max_rotation, max_rotation)` (rad)
    pub max_rotation: f64,
}
impl Default for ControlLimits {
    fn default() -> Self {
        ControlLimits {
            max_distance: 3.0,
            max_rotation: PI / 3.0,
        }
    }
}
impl ControlLimits {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, value) in [
            ("controls.max_distance", self.max_distance),
            ("controls.max_rotation", self.max_rotation),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::invalid(
                    name,
                    format!("must be finite and non-negative, got {}", value),
                ));
            }
        }
        Ok(())
    }
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Control {
        Control::new(
            symmetric_uniform(rng, self.max_distance),
            symmetric_uniform(rng, self.max_rotation),
        )
    }
}

fn symmetric_uniform<R: Rng + ?Sized>(rng: &mut R, limit: f64) -> f64 {
    if limit > 0.0 {
        rng.random_range(-limit..limit)
    } else {
        0.0
    }
}

/// Closed-loop simulation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Number of simulated cycles
    pub steps: usize,
    /// Seed of the robot and control streams
    pub seed: u64,
    /// Robot start pose `[x, y, heading]`
    pub start: [f64; 3],
    pub robot_noise: RobotNoise,
    pub controls: ControlLimits,
    pub world: World,
    pub filter: FilterConfig,
}
impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            steps: 30,
            seed: 7,
            start: [10.0, 10.0, 0.0],
            robot_noise: RobotNoise::default(),
            controls: ControlLimits::default(),
            world: World::default(),
            filter: FilterConfig::default(),
        }
    }
}
impl ConfigFile for ScenarioConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.steps == 0 {
            return Err(ConfigurationError::invalid("steps", "at least one step is required"));
        }
        if self.start.iter().any(|v| !v.is_finite()) {
            return Err(ConfigurationError::invalid("start", "start pose must be finite"));
        }
        self.world.validate()?;
        self.robot_noise.validate()?;
        self.controls.validate()?;
        self.filter.validate()
    }
}

/// Truth against estimate for one cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub step: u64,
    pub control_distance: f64,
    pub control_rotation: f64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_heading: f64,
    pub estimate_x: f64,
    pub estimate_y: f64,
    pub estimate_heading: f64,
    pub position_error: f64,
    pub heading_error: f64,
    pub effective_sample_size: f64,
    pub max_weight: f64,
    pub resampled: bool,
}
impl ScenarioRecord {
    pub fn new(control: &Control, truth: &State, estimate: &Estimate) -> Self {
        ScenarioRecord {
            step: estimate.cycle,
            control_distance: control.distance,
            control_rotation: control.rotation,
            true_x: truth[X],
            true_y: truth[Y],
            true_heading: truth[HEADING],
            estimate_x: estimate.x(),
            estimate_y: estimate.y(),
            estimate_heading: estimate.heading(),
            position_error: estimate.position_error(truth[X], truth[Y]),
            heading_error: angle_difference(estimate.heading(), truth[HEADING]),
            effective_sample_size: estimate.effective_sample_size,
            max_weight: estimate.max_weight,
            resampled: estimate.resampled,
        }
    }
    /// Write records to a CSV file, one row per cycle, with a header.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> csv::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Read records back from a CSV file written by [ScenarioRecord::to_csv].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> csv::Result<Vec<Self>> {
        let mut reader = csv::Reader::from_path(path)?;
        reader.deserialize().collect()
    }
}

/// Keep the components of a `[r0, b0, r1, b1, ...]` measurement that a filter expects.
fn project_measurement(measurement: Measurement, components_per_landmark: usize) -> Measurement {
    if components_per_landmark == 2 {
        return measurement;
    }
    Measurement::new(measurement.values.iter().step_by(2).copied().collect())
}

/// Run a closed-loop scenario: the robot moves under random controls, measures the landmarks, and
/// the filter tracks it from the configured initialization.
///
/// # Errors
/// Configuration errors from any component, or a degeneracy error from the filter.
pub fn run_scenario(config: &ScenarioConfig) -> Result<Vec<ScenarioRecord>, FilterError> {
    config.validate()?;
    let world = &config.world;
    let mut filter = ParticleFilter::from_config(
        config.filter.clone(),
        world.landmarks.clone(),
        Some(world.bounds()?),
    )?;
    filter.initialize_from_config()?;
    let start = State::new(config.start[0], config.start[1], config.start[2]);
    let mut robot = Robot::new(start, config.robot_noise, config.seed)?;
    let mut control_rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let components = config.filter.measurement.components_per_landmark();
    info!(
        "Running scenario: {} steps, {} landmarks, {}",
        config.steps,
        world.landmarks.len(),
        config.filter
    );
    let mut records = Vec::with_capacity(config.steps);
    for _ in 0..config.steps {
        let control = config.controls.sample(&mut control_rng);
        robot.move_by(&control, world)?;
        let measurement = project_measurement(robot.measure(world), components);
        let estimate = filter.step(&control, &measurement)?;
        records.push(ScenarioRecord::new(&control, robot.pose(), &estimate));
    }
    Ok(records)
}
