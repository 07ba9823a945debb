//! Filter configuration surface.
//!
//! Everything a [crate::filter::ParticleFilter] needs is fixed at construction time and described by
//! a [FilterConfig]: the particle count, the random seed, the process and measurement noise models,
//! the resampling trigger and algorithm, and how the initial particle cloud is drawn. Configurations
//! are plain serde types and can be read from or written to JSON, YAML or TOML through [ConfigFile].
//!
//! ```toml
//! num_particles = 3000
//! seed = 42
//! resampling = "stratified"
//!
//! [process]
//! kind = "odometry"
//! forward_std = 0.1
//! turn_std = 0.2
//!
//! [measurement]
//! kind = "range_bearing"
//! range_std = 0.2
//! bearing_std = 0.1
//!
//! [trigger]
//! kind = "max_weight"
//! threshold = 0.005
//!
//! [initialization]
//! kind = "uniform"
//! bounds = { x_min = 0.0, x_max = 20.0, y_min = 0.0, y_max = 20.0 }
//! ```
use std::fmt::{self, Display};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Bounds;
use crate::error::ConfigurationError;
use crate::measurements::{
    Landmark, LandmarkRangeBearingModel, LandmarkRangeModel, MeasurementModel,
};
use crate::motion::{GaussianMotionModel, OdometryMotionModel, ProcessModel};
use crate::particle::InitializationMode;
use crate::resampling::ResamplingAlgorithm;
use crate::trigger::ResamplingTrigger;

/// Default particle count
fn default_num_particles() -> usize {
    3000
}
/// Default seed value for reproducible runs
fn default_seed() -> u64 {
    42
}

/// Serializable configuration that can be validated and stored on disk.
///
/// All readers validate the parsed value before returning it.
pub trait ConfigFile: Serialize + DeserializeOwned {
    fn validate(&self) -> Result<(), ConfigurationError>;

    /// Write the configuration to a JSON file (pretty-printed).
    fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigurationError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }
    /// Read the configuration from a JSON file.
    fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let file = File::open(path)?;
        let config: Self =
            serde_json::from_reader(file).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
    /// Write the configuration as YAML.
    fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigurationError> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }
    /// Read the configuration from YAML.
    fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let file = File::open(path)?;
        let config: Self =
            serde_yaml::from_reader(file).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
    /// Write the configuration as TOML.
    fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigurationError> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }
    /// Read the configuration from TOML.
    fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        let config: Self = toml::from_str(&s).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigurationError> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(ConfigurationError::UnsupportedFormat(p.to_path_buf())),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(ConfigurationError::UnsupportedFormat(p.to_path_buf())),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// Process noise model selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessModelConfig {
    /// Noisy travelled distance along the heading, then a noisy rotation.
    Odometry { forward_std: f64, turn_std: f64 },
    /// Deterministic motion plus independent Gaussian noise per state component.
    Gaussian {
        x_std: f64,
        y_std: f64,
        heading_std: f64,
    },
}
impl Default for ProcessModelConfig {
    fn default() -> Self {
        ProcessModelConfig::Odometry {
            forward_std: 0.1,
            turn_std: 0.2,
        }
    }
}
impl ProcessModelConfig {
    /// Construct the model, optionally inside a cyclic world.
    pub fn build(&self, world: Option<Bounds>) -> Result<Box<dyn ProcessModel>, ConfigurationError> {
        let model: Box<dyn ProcessModel> = match *self {
            ProcessModelConfig::Odometry {
                forward_std,
                turn_std,
            } => {
                let model = OdometryMotionModel::new(forward_std, turn_std)?;
                match world {
                    Some(bounds) => Box::new(model.with_world(bounds)),
                    None => Box::new(model),
                }
            }
            ProcessModelConfig::Gaussian {
                x_std,
                y_std,
                heading_std,
            } => {
                let model = GaussianMotionModel::new(x_std, y_std, heading_std)?;
                match world {
                    Some(bounds) => Box::new(model.with_world(bounds)),
                    None => Box::new(model),
                }
            }
        };
        Ok(model)
    }
}

/// Measurement noise model selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementModelConfig {
    RangeBearing { range_std: f64, bearing_std: f64 },
    Range { range_std: f64 },
}
impl Default for MeasurementModelConfig {
    fn default() -> Self {
        MeasurementModelConfig::RangeBearing {
            range_std: 0.2,
            bearing_std: 0.1,
        }
    }
}
impl MeasurementModelConfig {
    pub fn build(
        &self,
        landmarks: Vec<Landmark>,
    ) -> Result<Box<dyn MeasurementModel>, ConfigurationError> {
        let model: Box<dyn MeasurementModel> = match *self {
            MeasurementModelConfig::RangeBearing {
                range_std,
                bearing_std,
            } => Box::new(LandmarkRangeBearingModel::new(
                landmarks,
                range_std,
                bearing_std,
            )?),
            MeasurementModelConfig::Range { range_std } => {
                Box::new(LandmarkRangeModel::new(landmarks, range_std)?)
            }
        };
        Ok(model)
    }
    /// Number of measurement components produced per landmark.
    pub fn components_per_landmark(&self) -> usize {
        match self {
            MeasurementModelConfig::RangeBearing { .. } => 2,
            MeasurementModelConfig::Range { .. } => 1,
        }
    }
    fn validate(&self) -> Result<(), ConfigurationError> {
        let stds: Vec<(&str, f64)> = match self {
            MeasurementModelConfig::RangeBearing {
                range_std,
                bearing_std,
            } => vec![
                ("measurement.range_std", *range_std),
                ("measurement.bearing_std", *bearing_std),
            ],
            MeasurementModelConfig::Range { range_std } => {
                vec![("measurement.range_std", *range_std)]
            }
        };
        for (name, std) in stds {
            if !std.is_finite() || std <= 0.0 {
                return Err(ConfigurationError::invalid(
                    name,
                    format!("must be positive and finite, got {}", std),
                ));
            }
        }
        Ok(())
    }
}

/// Complete particle filter configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of particles, fixed for the filter's lifetime
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Seed of the filter's random number generator
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub process: ProcessModelConfig,
    #[serde(default)]
    pub measurement: MeasurementModelConfig,
    #[serde(default)]
    pub trigger: ResamplingTrigger,
    #[serde(default)]
    pub resampling: ResamplingAlgorithm,
    #[serde(default)]
    pub initialization: InitializationMode,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: default_num_particles(),
            seed: default_seed(),
            process: ProcessModelConfig::default(),
            measurement: MeasurementModelConfig::default(),
            trigger: ResamplingTrigger::default(),
            resampling: ResamplingAlgorithm::default(),
            initialization: InitializationMode::default(),
        }
    }
}
impl Display for FilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FilterConfig(N: {}, seed: {}, trigger: {}, resampling: {}, initialization: {})",
            self.num_particles, self.seed, self.trigger, self.resampling, self.initialization
        )
    }
}
impl ConfigFile for FilterConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.num_particles == 0 {
            return Err(ConfigurationError::InvalidParticleCount(self.num_particles));
        }
        // building the process model runs its parameter checks
        self.process.build(None)?;
        self.measurement.validate()?;
        self.trigger.validate()?;
        self.initialization.validate()
    }
}
