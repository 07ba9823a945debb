//! Resampling triggers decide, once per cycle, whether the freshly weighted particle set should be
//! resampled at all. Every trigger is a pure function of the set's weight statistics.
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::particle::ParticleSet;

pub const DEFAULT_MAX_WEIGHT_THRESHOLD: f64 = 0.005;
pub const DEFAULT_ESS_FRACTION: f64 = 0.5;

/// When to resample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResamplingTrigger {
    /// Resample every cycle.
    Always,
    /// Resample when a single particle carries more than `threshold` of the total weight.
    MaxWeight { threshold: f64 },
    /// Resample when the effective sample size falls below `threshold_fraction * N`.
    EffectiveSampleSize { threshold_fraction: f64 },
}
impl Default for ResamplingTrigger {
    fn default() -> Self {
        ResamplingTrigger::MaxWeight {
            threshold: DEFAULT_MAX_WEIGHT_THRESHOLD,
        }
    }
}
impl Display for ResamplingTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResamplingTrigger::Always => write!(f, "always"),
            ResamplingTrigger::MaxWeight { threshold } => write!(f, "max_weight(> {})", threshold),
            ResamplingTrigger::EffectiveSampleSize { threshold_fraction } => {
                write!(f, "effective_sample_size(< {} N)", threshold_fraction)
            }
        }
    }
}
impl ResamplingTrigger {
    /// Build a trigger from its name. `threshold` is the max-weight threshold or the
    /// effective-sample-size fraction; `None` selects the default for that trigger.
    ///
    /// Accepted names (case-insensitive, `-` or `_`): `always`, `max_weight`, `effective_sample_size`
    /// (alias `ess`).
    pub fn from_name(name: &str, threshold: Option<f64>) -> Result<Self, ConfigurationError> {
        let trigger = match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "always" => ResamplingTrigger::Always,
            "max_weight" => ResamplingTrigger::MaxWeight {
                threshold: threshold.unwrap_or(DEFAULT_MAX_WEIGHT_THRESHOLD),
            },
            "effective_sample_size" | "ess" => ResamplingTrigger::EffectiveSampleSize {
                threshold_fraction: threshold.unwrap_or(DEFAULT_ESS_FRACTION),
            },
            _ => return Err(ConfigurationError::unknown("trigger", name)),
        };
        trigger.validate()?;
        Ok(trigger)
    }
    pub fn name(&self) -> &'static str {
        match self {
            ResamplingTrigger::Always => "always",
            ResamplingTrigger::MaxWeight { .. } => "max_weight",
            ResamplingTrigger::EffectiveSampleSize { .. } => "effective_sample_size",
        }
    }
    /// Thresholds must lie in (0, 1].
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let (name, value) = match self {
            ResamplingTrigger::Always => return Ok(()),
            ResamplingTrigger::MaxWeight { threshold } => ("trigger.threshold", *threshold),
            ResamplingTrigger::EffectiveSampleSize { threshold_fraction } => {
                ("trigger.threshold_fraction", *threshold_fraction)
            }
        };
        if !(value > 0.0 && value <= 1.0) {
            return Err(ConfigurationError::invalid(
                name,
                format!("must be in (0, 1], got {}", value),
            ));
        }
        Ok(())
    }
    pub fn should_resample(&self, particles: &ParticleSet) -> bool {
        match self {
            ResamplingTrigger::Always => true,
            ResamplingTrigger::MaxWeight { threshold } => particles.max_weight() > *threshold,
            ResamplingTrigger::EffectiveSampleSize { threshold_fraction } => {
                particles.effective_sample_size() < threshold_fraction * particles.len() as f64
            }
        }
    }
}
