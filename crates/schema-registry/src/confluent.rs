//! Confluent-compatible registry client.
//!
//! Talks to any registry implementing the Confluent REST API (Confluent
//! Schema Registry, Apicurio in compatibility mode, Redpanda). Parsed Avro
//! schemas are cached per id; registry ids are immutable so the cache never
//! needs invalidation.

use apache_avro::Schema;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::avro;
use crate::client::{SchemaHandle, SchemaRegistryClient, SchemaType};
use crate::config::RegistryOpts;
use crate::error::{RegistryError, Result};

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Debug, Serialize)]
struct RegisterSchemaRequest<'a> {
    schema: &'a str,
    #[serde(rename = "schemaType")]
    schema_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterSchemaResponse {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct GetSchemaResponse {
    schema: String,
    #[serde(rename = "schemaType", default)]
    schema_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubjectVersionResponse {
    id: u32,
    #[serde(default)]
    version: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error_code: u32,
    #[serde(default)]
    message: String,
}

/// Confluent REST API client.
pub struct ConfluentRegistry {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
    /// Cache: schema id -> compiled Avro schema
    compiled: RwLock<HashMap<u32, Arc<Schema>>>,
}

impl ConfluentRegistry {
    /// Create a client from connection options.
    pub fn new(opts: &RegistryOpts) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(opts.registry_timeout_secs))
            .build()
            .map_err(|e| RegistryError::Transport(format!("Failed to build HTTP client: {e}")))?;

        if opts.credentials().is_some() {
            debug!("Schema registry basic auth configured");
        }

        Ok(Self {
            client,
            base_url: opts.registry_url.trim_end_matches('/').to_string(),
            credentials: opts
                .credentials()
                .map(|(u, p)| (u.to_string(), p.to_string())),
            compiled: RwLock::new(HashMap::new()),
        })
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .with_auth(self.client.get(url))
            .header("Accept", CONTENT_TYPE)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(status, &body));
        }

        Ok(response.json().await?)
    }

    /// Compiled schema for `id`, fetching and parsing it on first use.
    async fn compiled_schema(&self, id: u32) -> Result<Arc<Schema>> {
        if let Some(schema) = self.compiled.read().await.get(&id) {
            return Ok(Arc::clone(schema));
        }

        let handle = self.schema_by_id(id).await?;
        if handle.schema_type != SchemaType::Avro {
            return Err(RegistryError::InvalidSchema(format!(
                "Schema {id} is {}, only AVRO is supported",
                handle.schema_type
            )));
        }
        let schema = Arc::new(avro::parse_schema(&handle.definition)?);

        self.compiled.write().await.insert(id, Arc::clone(&schema));
        debug!("Compiled and cached schema {id}");
        Ok(schema)
    }
}

#[async_trait]
impl SchemaRegistryClient for ConfluentRegistry {
    async fn latest_schema_id(&self, subject: &str) -> Result<u32> {
        let url = subject_version_url(&self.base_url, subject, "latest");
        let result: SubjectVersionResponse = self.get_json(&url).await?;
        debug!(
            "Latest schema for subject {subject}: id={} version={}",
            result.id, result.version
        );
        Ok(result.id)
    }

    async fn schema_by_id(&self, id: u32) -> Result<SchemaHandle> {
        let url = format!("{}/schemas/ids/{id}", self.base_url);
        let result: GetSchemaResponse = self.get_json(&url).await?;

        let schema_type = result
            .schema_type
            .as_deref()
            .map(str::parse::<SchemaType>)
            .transpose()
            .map_err(RegistryError::InvalidSchema)?
            .unwrap_or_default();

        Ok(SchemaHandle {
            id,
            schema_type,
            definition: result.schema,
        })
    }

    async fn register(&self, document: &str, subject: &str) -> Result<u32> {
        let url = format!("{}/subjects/{subject}/versions", self.base_url);
        let request = RegisterSchemaRequest {
            schema: document,
            schema_type: "AVRO",
        };

        let response = self
            .with_auth(self.client.post(&url))
            .header("Content-Type", CONTENT_TYPE)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(status, &body));
        }

        let result: RegisterSchemaResponse = response.json().await?;
        info!("Registered schema under subject {subject} with id {}", result.id);
        Ok(result.id)
    }

    async fn encode(&self, id: u32, record: &JsonValue) -> Result<Vec<u8>> {
        let schema = self.compiled_schema(id).await?;
        let payload = avro::encode_datum(&schema, record)?;
        Ok(kafka_types::wrap(id, &payload))
    }

    async fn decode(&self, wire: &[u8]) -> Result<JsonValue> {
        let envelope = kafka_types::unwrap(wire)?;
        let schema = self.compiled_schema(envelope.schema_id).await?;
        avro::decode_datum(&schema, envelope.payload)
    }
}

fn subject_version_url(base_url: &str, subject: &str, version: &str) -> String {
    format!("{base_url}/subjects/{subject}/versions/{version}")
}

/// Map a non-success registry response onto a typed error.
///
/// Confluent error codes: 40401 subject not found, 40402 version not found,
/// 40403 schema not found, 42201 invalid schema.
fn parse_error(status: StatusCode, body: &str) -> RegistryError {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(err) if !err.message.is_empty() => (err.error_code, err.message),
        Some(err) => (err.error_code, body.to_string()),
        None => (0, body.to_string()),
    };

    match (status, code) {
        (StatusCode::NOT_FOUND, _) | (_, 40401..=40403) => RegistryError::NotFound(message),
        (StatusCode::UNPROCESSABLE_ENTITY, _) | (_, 42201) => RegistryError::InvalidSchema(message),
        _ => RegistryError::Unexpected {
            status: status.as_u16(),
            message,
        },
    }
}
