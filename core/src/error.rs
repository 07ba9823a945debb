//! Error types for the particle filter.
//!
//! Two failure classes are fatal and surface to the caller of the filter: [ConfigurationError]
//! for anything that is wrong with how the filter was assembled, and [DegeneracyError] for a
//! weighting step in which every particle was judged impossible. [FilterError] unifies the two
//! for the filter cycle. Cumulative-weight drift before resampling is not an error; it is logged
//! as a warning and corrected in place.

use std::path::PathBuf;

use thiserror::Error;

use crate::measurements::Measurement;

/// Invalid construction or use of a filter component.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("invalid particle count {0}: at least one particle is required")]
    InvalidParticleCount(usize),

    #[error("measurement dimension mismatch: model expects {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("unknown {kind} strategy '{name}'")]
    UnknownStrategy { kind: String, name: String },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("unsupported configuration file extension: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigurationError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
    pub(crate) fn unknown(kind: &str, name: &str) -> Self {
        ConfigurationError::UnknownStrategy {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

/// Every particle weight collapsed to zero (or became non-finite) after a weighting step.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "particle weights degenerated at cycle {cycle} (total weight {total_weight}) for measurement {measurement}"
)]
pub struct DegeneracyError {
    /// Cycle in which the weighting step failed (1-based, the cycle that was aborted)
    pub cycle: u64,
    /// Sum of the unnormalized weights that triggered the failure
    pub total_weight: f64,
    /// The measurement that no particle could explain
    pub measurement: Measurement,
}

/// Errors surfaced by [crate::filter::ParticleFilter].
#[derive(Error, Debug)]
pub enum FilterError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Degeneracy(#[from] DegeneracyError),

    #[error("particle filter has not been initialized")]
    NotInitialized,
}

pub type FilterResult<T> = std::result::Result<T, FilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_messages() {
        let err = ConfigurationError::InvalidParticleCount(0);
        assert!(err.to_string().contains("particle count 0"));
        let err = ConfigurationError::DimensionMismatch {
            expected: 8,
            found: 6,
        };
        assert_eq!(
            err.to_string(),
            "measurement dimension mismatch: model expects 8, got 6"
        );
        let err = ConfigurationError::unknown("resampling", "bogus");
        assert_eq!(err.to_string(), "unknown resampling strategy 'bogus'");
    }
    #[test]
    fn test_filter_error_conversion() {
        let err: FilterError = ConfigurationError::invalid("threshold", "must be positive").into();
        assert!(matches!(
            err,
            FilterError::Configuration(ConfigurationError::InvalidParameter { .. })
        ));
        let err: FilterError = DegeneracyError {
            cycle: 3,
            total_weight: 0.0,
            measurement: Measurement::new(vec![1.0, 2.0]),
        }
        .into();
        assert!(err.to_string().contains("cycle 3"));
    }
}
