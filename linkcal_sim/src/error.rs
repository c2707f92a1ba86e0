//! Errors raised by the calibration sweep and its table stores.

use linkcal_core::SimError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    /// Persisted table does not match the expected columns
    #[error("Schema mismatch in persisted table: {0}")]
    SchemaMismatch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal consistency check failed; the sweep cannot continue
    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error(transparent)]
    Sim(#[from] SimError),
}
