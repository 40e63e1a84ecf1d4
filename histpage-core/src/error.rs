//! Error types for histpage-core.

use crate::SpectrumNumber;
use thiserror::Error;

/// Result type alias for histpage-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed arguments, such as an empty or mismatched populate table.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A remap target spectrum that has no detectors in the map.
    #[error("spectrum {0} is not present in the map")]
    MissingSpectrum(SpectrumNumber),
}
