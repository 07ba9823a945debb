//! Process models for planar motion.
//!
//! A process model moves a single pose forward by one control cycle and adds its own stochastic
//! noise. It is applied independently to every particle, each call drawing fresh noise from the
//! filter's random stream, and always returns a new [State] instead of mutating the input.
//!
//! Both models share the same deterministic kinematics: advance along the current heading, then
//! rotate.
//!
//! $$
//! x' = x + d \cos\psi, \quad y' = y + d \sin\psi, \quad \psi' = \psi + \delta
//! $$
//!
//! When a world [Bounds] is attached the positions wrap around the region edges (a cyclic world).

use std::fmt::{self, Display};

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;

use crate::error::ConfigurationError;
use crate::{Bounds, Control, HEADING, State, X, Y, wrap_to_pi};

/// Propagates a state sample forward in time
pub trait ProcessModel {
    /// Move `state` by `control`, drawing any noise from `rng`. The heading of the returned state is
    /// in $(-\pi, \pi]$.
    fn propagate(&self, state: &State, control: &Control, rng: &mut StdRng) -> State;
}

impl<T: ProcessModel + ?Sized> ProcessModel for Box<T> {
    fn propagate(&self, state: &State, control: &Control, rng: &mut StdRng) -> State {
        (**self).propagate(state, control, rng)
    }
}

/// Noise-free motion: advance `distance` along the heading, then rotate.
pub fn kinematic_motion(state: &State, control: &Control) -> State {
    let heading = state[HEADING];
    State::new(
        state[X] + control.distance * heading.cos(),
        state[Y] + control.distance * heading.sin(),
        wrap_to_pi(heading + control.rotation),
    )
}

fn normal_sample(rng: &mut StdRng, std: f64) -> f64 {
    if std == 0.0 {
        return 0.0;
    }
    let n: f64 = rng.sample(StandardNormal);
    n * std
}

fn wrap_into_world(mut state: State, world: Option<&Bounds>) -> State {
    if let Some(bounds) = world {
        let (x, y) = bounds.wrap(state[X], state[Y]);
        state[X] = x;
        state[Y] = y;
    }
    state
}

pub(crate) fn validate_noise_std(name: &str, std: f64) -> Result<(), ConfigurationError> {
    if !std.is_finite() || std < 0.0 {
        return Err(ConfigurationError::invalid(
            name,
            format!("noise standard deviation must be finite and non-negative, got {}", std),
        ));
    }
    Ok(())
}

/// Odometry-style motion with noisy forward distance and noisy rotation.
///
/// The forward distance actually travelled is drawn from $N(d, \sigma_f^2)$ along the current
/// heading; the rotation applied afterwards is drawn from $N(\delta, \sigma_t^2)$.
#[derive(Clone, Debug, PartialEq)]
pub struct OdometryMotionModel {
    /// Standard deviation of the travelled distance (m)
    pub forward_std: f64,
    /// Standard deviation of the applied rotation (rad)
    pub turn_std: f64,
    /// Optional cyclic world
    pub world: Option<Bounds>,
}
impl OdometryMotionModel {
    pub fn new(forward_std: f64, turn_std: f64) -> Result<Self, ConfigurationError> {
        validate_noise_std("forward_std", forward_std)?;
        validate_noise_std("turn_std", turn_std)?;
        Ok(OdometryMotionModel {
            forward_std,
            turn_std,
            world: None,
        })
    }
    pub fn with_world(mut self, world: Bounds) -> Self {
        self.world = Some(world);
        self
    }
}
impl Display for OdometryMotionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OdometryMotionModel(forward_std: {}, turn_std: {})",
            self.forward_std, self.turn_std
        )
    }
}
impl ProcessModel for OdometryMotionModel {
    fn propagate(&self, state: &State, control: &Control, rng: &mut StdRng) -> State {
        let distance = control.distance + normal_sample(rng, self.forward_std);
        let heading = state[HEADING];
        let moved = State::new(
            state[X] + distance * heading.cos(),
            state[Y] + distance * heading.sin(),
            heading,
        );
        let mut moved = wrap_into_world(moved, self.world.as_ref());
        moved[HEADING] = wrap_to_pi(heading + control.rotation + normal_sample(rng, self.turn_std));
        moved
    }
}

/// Deterministic kinematics followed by independent additive Gaussian noise on each component.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianMotionModel {
    pub x_std: f64,
    pub y_std: f64,
    pub heading_std: f64,
    pub world: Option<Bounds>,
}
impl GaussianMotionModel {
    pub fn new(x_std: f64, y_std: f64, heading_std: f64) -> Result<Self, ConfigurationError> {
        validate_noise_std("x_std", x_std)?;
        validate_noise_std("y_std", y_std)?;
        validate_noise_std("heading_std", heading_std)?;
        Ok(GaussianMotionModel {
            x_std,
            y_std,
            heading_std,
            world: None,
        })
    }
    pub fn with_world(mut self, world: Bounds) -> Self {
        self.world = Some(world);
        self
    }
}
impl Display for GaussianMotionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GaussianMotionModel(x_std: {}, y_std: {}, heading_std: {})",
            self.x_std, self.y_std, self.heading_std
        )
    }
}
impl ProcessModel for GaussianMotionModel {
    fn propagate(&self, state: &State, control: &Control, rng: &mut StdRng) -> State {
        let mean = kinematic_motion(state, control);
        let noisy = State::new(
            mean[X] + normal_sample(rng, self.x_std),
            mean[Y] + normal_sample(rng, self.y_std),
            wrap_to_pi(mean[HEADING] + normal_sample(rng, self.heading_std)),
        );
        wrap_into_world(noisy, self.world.as_ref())
    }
}
