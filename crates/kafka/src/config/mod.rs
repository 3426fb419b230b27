//! Pipeline configuration.
//!
//! Each struct doubles as a clap argument group so the binary can flatten
//! them straight into its subcommands.

pub mod duration;

use clap::Args;
use kafka_types::StartPosition;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

pub use duration::parse_duration;

/// Prefix applied to every consumer group id.
pub const GROUP_ID_PREFIX: &str = "schema_bridge_";

/// Connection settings shared by consumers and producers.
#[derive(Debug, Clone, Args)]
pub struct BrokerOpts {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[clap(
        long,
        value_delimiter = ',',
        env = "KAFKA_BROKERS",
        default_value = "localhost:9092"
    )]
    pub brokers: Vec<String>,
    /// Client id reported to the brokers
    #[clap(long, default_value = "schema-bridge")]
    pub client_id: String,
    /// Session timeout in milliseconds
    #[clap(long, default_value = "30000")]
    pub session_timeout_ms: String,
    /// Extra librdkafka properties as key=value (repeatable)
    #[clap(long = "broker-property", value_name = "KEY=VALUE")]
    pub properties: Vec<String>,
}

impl Default for BrokerOpts {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: "schema-bridge".to_string(),
            session_timeout_ms: "30000".to_string(),
            properties: Vec::new(),
        }
    }
}

impl BrokerOpts {
    /// Brokers joined for `bootstrap.servers`.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// Extra properties split into pairs.
    pub fn extra_properties(&self) -> Result<Vec<(String, String)>> {
        self.properties
            .iter()
            .map(|prop| {
                let (key, value) = prop.split_once('=').ok_or_else(|| {
                    Error::Config(format!("Invalid broker property '{prop}': expected KEY=VALUE"))
                })?;
                Ok((key.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(Error::Config("At least one broker is required".to_string()));
        }
        self.session_timeout_ms.parse::<u32>().map_err(|_| {
            Error::Config(format!(
                "Invalid session timeout: {}",
                self.session_timeout_ms
            ))
        })?;
        self.extra_properties()?;
        Ok(())
    }
}

/// Configuration for the consumer pipeline.
#[derive(Debug, Clone, Args)]
pub struct ConsumerConfig {
    /// Topic to consume from
    #[clap(long)]
    pub topic: String,
    /// Consumer group id (prefixed with "schema_bridge_"; random when omitted)
    #[clap(long)]
    pub group_id: Option<String>,
    /// Where a new group starts reading ("earliest" or "latest")
    #[clap(long, default_value = "earliest")]
    pub start_position: StartPosition,
    /// Minimum bytes per fetch
    #[clap(long, default_value_t = 1)]
    pub fetch_min_bytes: u32,
    /// Maximum bytes per fetch
    #[clap(long, default_value_t = 1_048_576)]
    pub fetch_max_bytes: u32,
    /// Registry subject to bind to (defaults to "<topic>-value")
    #[clap(long)]
    pub schema_subject: Option<String>,
    /// Register the default schema when the subject does not exist
    #[clap(long)]
    pub auto_register: bool,
    /// Schema document used for auto-registration
    #[clap(long)]
    pub default_schema: Option<String>,
    /// Drop records that fail to decode instead of emitting error artifacts
    #[clap(long)]
    pub skip_invalid: bool,
    /// Route error artifacts to the secondary output
    #[clap(long)]
    pub dual_output: bool,
    /// Attach broker metadata to emitted records
    #[clap(long)]
    pub output_raw_message: bool,
    /// Records per batch; 1 or less emits records individually
    #[clap(long, default_value_t = 1)]
    pub batch_size: usize,
    /// Flush a partial batch this long after its first record
    #[clap(long, value_parser = parse_duration_arg, default_value = "30s")]
    pub batch_timeout: Duration,
    /// Track per-record processing time and throughput
    #[clap(long)]
    pub enable_metrics: bool,
    /// Record every distinct schema id observed on the topic
    #[clap(long)]
    pub track_schema_evolution: bool,
    /// Maximum number of schema ids kept by the evolution tracker
    #[clap(long, default_value_t = 1024)]
    pub evolution_capacity: usize,
    /// Mark the pipeline idle after this long without records
    #[clap(long, value_parser = parse_duration_arg, default_value = "5s")]
    pub idle_threshold: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            group_id: None,
            start_position: StartPosition::Earliest,
            fetch_min_bytes: 1,
            fetch_max_bytes: 1_048_576,
            schema_subject: None,
            auto_register: false,
            default_schema: None,
            skip_invalid: false,
            dual_output: false,
            output_raw_message: false,
            batch_size: 1,
            batch_timeout: Duration::from_secs(30),
            enable_metrics: false,
            track_schema_evolution: false,
            evolution_capacity: 1024,
            idle_threshold: Duration::from_secs(5),
        }
    }
}

impl ConsumerConfig {
    /// Subject the pipeline binds to.
    pub fn subject(&self) -> String {
        subject_for(self.schema_subject.as_deref(), &self.topic)
    }

    /// Group id with the fixed prefix applied; a fresh one when none is configured.
    pub fn resolved_group_id(&self) -> String {
        match self.group_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => format!("{GROUP_ID_PREFIX}{id}"),
            _ => format!("{GROUP_ID_PREFIX}{}", Uuid::new_v4()),
        }
    }

    pub fn batching_enabled(&self) -> bool {
        self.batch_size > 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::Config("Topic is required".to_string()));
        }
        if self.fetch_min_bytes == 0 {
            return Err(Error::Config("fetch_min_bytes must be at least 1".to_string()));
        }
        if self.fetch_max_bytes < self.fetch_min_bytes {
            return Err(Error::Config(format!(
                "fetch_max_bytes ({}) must not be smaller than fetch_min_bytes ({})",
                self.fetch_max_bytes, self.fetch_min_bytes
            )));
        }
        if self.batching_enabled() && self.batch_timeout.is_zero() {
            return Err(Error::Config(
                "batch_timeout must be positive when batching is enabled".to_string(),
            ));
        }
        if self.track_schema_evolution && self.evolution_capacity == 0 {
            return Err(Error::Config(
                "evolution_capacity must be at least 1".to_string(),
            ));
        }
        if self.idle_threshold.is_zero() {
            return Err(Error::Config("idle_threshold must be positive".to_string()));
        }
        validate_auto_register(self.auto_register, self.default_schema.as_deref())
    }
}

/// Configuration for the producer pipeline.
#[derive(Debug, Clone, Args)]
pub struct ProducerConfig {
    /// Topic to publish to
    #[clap(long)]
    pub topic: String,
    /// Registry subject to bind to (defaults to "<topic>-value")
    #[clap(long)]
    pub schema_subject: Option<String>,
    /// Register the default schema when the subject does not exist
    #[clap(long)]
    pub auto_register: bool,
    /// Schema document used for auto-registration
    #[clap(long)]
    pub default_schema: Option<String>,
    /// Encode and report without publishing
    #[clap(long)]
    pub validate_only: bool,
    /// Route error artifacts to the secondary output
    #[clap(long)]
    pub dual_output: bool,
    /// Acknowledgements required from the brokers (-1 for all)
    #[clap(long, default_value_t = -1, allow_negative_numbers = true)]
    pub require_acks: i32,
    /// Request timeout for publish acknowledgements
    #[clap(long, value_parser = parse_duration_arg, default_value = "5s")]
    pub ack_timeout: Duration,
    /// Mark the pipeline idle after this long without input
    #[clap(long, value_parser = parse_duration_arg, default_value = "5s")]
    pub idle_threshold: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            schema_subject: None,
            auto_register: false,
            default_schema: None,
            validate_only: false,
            dual_output: false,
            require_acks: -1,
            ack_timeout: Duration::from_secs(5),
            idle_threshold: Duration::from_secs(5),
        }
    }
}

impl ProducerConfig {
    /// Subject the pipeline binds to.
    pub fn subject(&self) -> String {
        subject_for(self.schema_subject.as_deref(), &self.topic)
    }

    /// Idempotent delivery is only available when every replica acknowledges.
    pub fn idempotent(&self) -> bool {
        self.require_acks == -1
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::Config("Topic is required".to_string()));
        }
        if !matches!(self.require_acks, -1 | 0 | 1) {
            return Err(Error::Config(format!(
                "require_acks must be -1, 0 or 1, got {}",
                self.require_acks
            )));
        }
        if self.ack_timeout.is_zero() {
            return Err(Error::Config("ack_timeout must be positive".to_string()));
        }
        if self.idle_threshold.is_zero() {
            return Err(Error::Config("idle_threshold must be positive".to_string()));
        }
        validate_auto_register(self.auto_register, self.default_schema.as_deref())
    }
}

fn subject_for(configured: Option<&str>, topic: &str) -> String {
    match configured.map(str::trim) {
        Some(subject) if !subject.is_empty() => subject.to_string(),
        _ => format!("{topic}-value"),
    }
}

fn validate_auto_register(auto_register: bool, default_schema: Option<&str>) -> Result<()> {
    if auto_register && default_schema.map_or(true, |s| s.trim().is_empty()) {
        return Err(Error::Config(
            "auto_register requires a default schema document".to_string(),
        ));
    }
    Ok(())
}

fn parse_duration_arg(s: &str) -> std::result::Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}
