//! Error taxonomy shared by every engine in the crate.

use thiserror::Error;

/// Errors raised by the statistics engines.
///
/// All range and provenance checks run before any reduction is scheduled,
/// so a malformed request fails without touching the data.
#[derive(Debug, Error)]
pub enum Error {
    /// Inverted or out-of-extent year range, or an out-of-domain parameter.
    #[error("range error: {0}")]
    Range(String),

    /// A precomputed baseline is missing its reference-period provenance.
    #[error("validation error: {0}")]
    Validation(String),

    /// A required spatial coordinate (`lon` or `lat`) is absent.
    #[error("coordinate `{0}` is missing; coordinates must be named exactly `lon` and `lat`")]
    MissingCoordinate(String),

    /// The requested variable is not the one the field carries.
    #[error("variable `{expected}` not found (field holds `{found}`)")]
    MissingVariable { expected: String, found: String },

    /// Ragged or incompatible dimensions.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Invalid configuration value or unreadable configuration document.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
