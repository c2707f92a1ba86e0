//! Error types for the PHY collaborator contracts.

use thiserror::Error;

/// Errors raised by the external PHY collaborators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhyError {
    /// The collaborator cannot handle the requested parameter value
    #[error("Invalid PHY configuration: {name} = {value}")]
    InvalidConfig { name: &'static str, value: String },

    /// Transmit waveform could not be built
    #[error("Waveform generation failed: {0}")]
    Generation(String),

    /// Detector rejected the received samples
    #[error("Detection failed: {0}")]
    Detection(String),

    /// Decoder rejected the soft bits
    #[error("Decoding failed: {0}")]
    Decoding(String),

    /// Soft-buffer lookup or reservation failed
    #[error("Soft buffer error: {0}")]
    SoftBuffer(String),
}

impl PhyError {
    /// Creates an invalid-configuration error.
    pub fn invalid(name: &'static str, value: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            name,
            value: value.to_string(),
        }
    }

    /// Creates a detection error.
    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection(msg.into())
    }

    /// Creates a decoding error.
    pub fn decoding(msg: impl Into<String>) -> Self {
        Self::Decoding(msg.into())
    }
}
