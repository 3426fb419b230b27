use kafka_types::WireError;
use thiserror::Error;

/// Typed failures surfaced by a schema registry client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] WireError),

    #[error("Registry transport error: {0}")]
    Transport(String),

    #[error("Unexpected registry response ({status}): {message}")]
    Unexpected { status: u16, message: String },
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
