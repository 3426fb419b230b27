use schema_bridge_registry::RegistryError;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::status::PipelineState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema subject '{subject}' not found and auto-registration is disabled")]
    SchemaNotFound { subject: String },

    #[error("Invalid schema JSON: {0}")]
    InvalidSchemaJson(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Schema decode error: {0}")]
    SchemaDecode(String),

    #[error("Schema encode error: {0}")]
    SchemaEncode(String),

    #[error("Failed to parse message payload as JSON: {0}")]
    PayloadParse(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to publish message: {0}")]
    Send(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Pipeline not ready (state: {0})")]
    NotReady(PipelineState),
}

impl Error {
    /// Taxonomy tag reported in error artifacts.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::ConfigError,
            Self::SchemaNotFound { .. } => ErrorKind::SchemaNotFound,
            Self::InvalidSchemaJson(_) => ErrorKind::InvalidSchemaJson,
            Self::MalformedEnvelope(_) => ErrorKind::MalformedEnvelope,
            Self::SchemaDecode(_) => ErrorKind::SchemaDecodeError,
            Self::SchemaEncode(_) => ErrorKind::SchemaEncodeError,
            Self::PayloadParse(_) => ErrorKind::PayloadParseError,
            Self::Kafka(_) | Self::Transport(_) => ErrorKind::TransportError,
            Self::Send(_) => ErrorKind::SendError,
            Self::Registry(_) => ErrorKind::RegistryError,
            Self::NotReady(_) => ErrorKind::NotReady,
        }
    }

    /// Map a failure from the registry's decode call.
    pub(crate) fn from_decode(err: RegistryError) -> Self {
        match err {
            RegistryError::MalformedEnvelope(e) => Self::MalformedEnvelope(e.to_string()),
            other => Self::SchemaDecode(other.to_string()),
        }
    }

    /// Map a failure from the registry's encode call.
    pub(crate) fn from_encode(err: RegistryError) -> Self {
        match err {
            RegistryError::Encode(msg) => Self::SchemaEncode(msg),
            other => Self::SchemaEncode(other.to_string()),
        }
    }
}

/// Error taxonomy tags, serialized as their SCREAMING_SNAKE_CASE names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigError,
    SchemaNotFound,
    InvalidSchemaJson,
    MalformedEnvelope,
    SchemaDecodeError,
    SchemaEncodeError,
    PayloadParseError,
    TransportError,
    SendError,
    RegistryError,
    NotReady,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigError => "CONFIG_ERROR",
            Self::SchemaNotFound => "SCHEMA_NOT_FOUND",
            Self::InvalidSchemaJson => "INVALID_SCHEMA_JSON",
            Self::MalformedEnvelope => "MALFORMED_ENVELOPE",
            Self::SchemaDecodeError => "SCHEMA_DECODE_ERROR",
            Self::SchemaEncodeError => "SCHEMA_ENCODE_ERROR",
            Self::PayloadParseError => "PAYLOAD_PARSE_ERROR",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::SendError => "SEND_ERROR",
            Self::RegistryError => "REGISTRY_ERROR",
            Self::NotReady => "NOT_READY",
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
