//! Error types for the simulation building blocks.

use linkcal_env::PhyError;
use thiserror::Error;

/// Errors raised while configuring or running a simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// Invalid parameter value or combination, detected before any trial runs
    #[error("Invalid configuration: {name} = {value} ({reason})")]
    InvalidConfig {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// Attempt to change a non-tunable parameter of a locked simulator
    #[error("Cannot change non-tunable parameter '{0}' while the simulator is locked")]
    LockedParameter(&'static str),

    /// Operation requires a configured simulator
    #[error("Simulator is not configured")]
    Unconfigured,

    /// A quantity that must be finite was not
    #[error("Non-finite value: {0}")]
    NonFinite(String),

    /// Fatal collaborator error (generation or configuration)
    #[error("PHY error: {0}")]
    Phy(#[from] PhyError),
}

impl SimError {
    /// Creates an invalid-configuration error.
    pub fn invalid(
        name: &'static str,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors detected at configuration-validation time.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SimError::InvalidConfig { .. } | SimError::LockedParameter(_) | SimError::Unconfigured
        )
    }
}
