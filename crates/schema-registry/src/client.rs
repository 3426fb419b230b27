//! The registry contract consumed by the pipelines.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Schema format as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    #[default]
    Avro,
    Json,
    Protobuf,
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avro => write!(f, "AVRO"),
            Self::Json => write!(f, "JSON"),
            Self::Protobuf => write!(f, "PROTOBUF"),
        }
    }
}

impl FromStr for SchemaType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVRO" => Ok(Self::Avro),
            "JSON" => Ok(Self::Json),
            "PROTOBUF" => Ok(Self::Protobuf),
            other => Err(format!("Unknown schema type: {other}")),
        }
    }
}

/// Opaque handle to a registered schema.
///
/// The pipelines never look inside the definition; they keep the handle
/// for observability (bindings, evolution records).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaHandle {
    pub id: u32,
    pub schema_type: SchemaType,
    pub definition: String,
}

/// Operations the pipelines need from a schema registry.
///
/// Implementations are shared across pipelines behind an `Arc` and must be
/// safe to call concurrently.
#[async_trait]
pub trait SchemaRegistryClient: Send + Sync {
    /// Id of the latest schema registered under `subject`.
    ///
    /// Fails with [`RegistryError::NotFound`](crate::RegistryError::NotFound)
    /// when the subject does not exist.
    async fn latest_schema_id(&self, subject: &str) -> Result<u32>;

    /// Fetch a schema by id.
    async fn schema_by_id(&self, id: u32) -> Result<SchemaHandle>;

    /// Register `document` under `subject` and return its id.
    async fn register(&self, document: &str, subject: &str) -> Result<u32>;

    /// Encode `record` with schema `id`; the output is already wrapped in the
    /// wire envelope.
    async fn encode(&self, id: u32, record: &JsonValue) -> Result<Vec<u8>>;

    /// Decode a wire envelope back into a JSON record.
    async fn decode(&self, wire: &[u8]) -> Result<JsonValue>;
}

#[async_trait]
impl<T: SchemaRegistryClient + ?Sized> SchemaRegistryClient for Arc<T> {
    async fn latest_schema_id(&self, subject: &str) -> Result<u32> {
        (**self).latest_schema_id(subject).await
    }

    async fn schema_by_id(&self, id: u32) -> Result<SchemaHandle> {
        (**self).schema_by_id(id).await
    }

    async fn register(&self, document: &str, subject: &str) -> Result<u32> {
        (**self).register(document, subject).await
    }

    async fn encode(&self, id: u32, record: &JsonValue) -> Result<Vec<u8>> {
        (**self).encode(id, record).await
    }

    async fn decode(&self, wire: &[u8]) -> Result<JsonValue> {
        (**self).decode(wire).await
    }
}
