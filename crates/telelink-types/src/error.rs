//! Error types for value parsing in telelink-types.

use thiserror::Error;

/// Errors that can occur when converting or parsing thermostat values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A sensor produced a value that cannot be converted (NaN, infinite, out of range).
    #[error("Invalid temperature: {0}")]
    InvalidTemperature(String),

    /// A payload was not valid UTF-8.
    #[error("Payload is not valid UTF-8")]
    NotUtf8,

    /// A payload did not contain the expected value.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Unknown thermostat mode name.
    #[error("Unknown mode: {0}")]
    UnknownMode(String),
}

/// Result type alias using telelink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
