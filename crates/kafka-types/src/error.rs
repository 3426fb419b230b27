//! Error types for the kafka-types crate.

use thiserror::Error;

/// Errors raised while parsing a wire envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Envelope too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid magic byte: expected 0x00, got {0:#04x}")]
    InvalidMagicByte(u8),
}

/// Result type alias for envelope operations.
pub type Result<T> = std::result::Result<T, WireError>;
