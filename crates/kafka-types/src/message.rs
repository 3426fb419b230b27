//! Broker record types.
//!
//! [`RawRecord`] is what the broker client hands to the consumer pipeline
//! before any schema work happens; [`OutboundMessage`] is what the producer
//! pipeline hands back to it for publishing.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Message headers, kept sorted so emitted metadata is stable.
pub type Headers = BTreeMap<String, String>;

/// A record as received from the broker, still wire-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Wire-encoded value; empty when the broker delivered no payload
    pub value: Vec<u8>,
    /// Timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
    /// Headers with values decoded as lossy UTF-8
    pub headers: Headers,
}

impl RawRecord {
    /// Key rendered as text, the way it is reported in emitted metadata.
    pub fn key_string(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }

    /// Base64 rendering of the raw value for error artifacts.
    pub fn value_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.value)
    }

    /// Metadata view of this record.
    pub fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
            key: self.key_string(),
            timestamp: self.timestamp,
            headers: self.headers.clone(),
        }
    }
}

/// Serializable broker metadata attached to emitted artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub headers: Headers,
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub key: Option<String>,
    /// Wire-encoded value (already wrapped in the envelope)
    pub value: Vec<u8>,
    pub headers: Headers,
    /// Timestamp in milliseconds since epoch; the broker assigns one when unset
    pub timestamp: Option<i64>,
}

/// Where a published message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub partition: i32,
    pub offset: i64,
}

/// Where a new consumer group starts reading when it has no committed offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    #[default]
    Earliest,
    Latest,
}

impl StartPosition {
    /// Value for librdkafka's `auto.offset.reset`.
    pub fn as_offset_reset(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_offset_reset())
    }
}

impl FromStr for StartPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "beginning" => Ok(Self::Earliest),
            "latest" | "end" => Ok(Self::Latest),
            other => Err(format!(
                "Invalid start position '{other}': expected 'earliest' or 'latest'"
            )),
        }
    }
}
