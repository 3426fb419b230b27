//! Emitted artifacts and the dual-output router.

use kafka_types::{DeliveryReport, RawRecord, RecordMetadata};
use serde::{Serialize, Serializer};
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, ErrorKind};

/// Output a pipeline writes an artifact to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPort {
    Primary,
    Secondary,
}

/// Broker metadata attached to a decoded record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetadata {
    #[serde(flatten)]
    pub record: RecordMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
}

/// A successfully decoded record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRecord {
    pub payload: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kafka_message: Option<RawMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    pub size: usize,
    /// Flush time in milliseconds since epoch
    pub timestamp: i64,
    pub batch_id: String,
}

/// A flushed batch of decoded records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchArtifact {
    pub payload: Vec<SuccessRecord>,
    pub batch_info: BatchInfo,
}

/// Result of a published message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub success: bool,
    pub schema_id: u32,
    pub kafka_result: Vec<DeliveryReport>,
    pub original_data: JsonValue,
    pub topic: String,
}

/// Result of a validate-only run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub validated: bool,
    pub schema_id: u32,
    pub original_data: JsonValue,
    pub encoded_size: usize,
}

/// What an error artifact carries besides the error itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorContext {
    /// A consumed record that failed; the raw value is kept as base64.
    Record {
        metadata: RecordMetadata,
        raw_value: String,
    },
    /// Data that failed to encode.
    Data(JsonValue),
    /// Producer input that failed before or after encoding.
    Input(JsonValue),
}

/// A per-record failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorArtifact {
    pub kind: ErrorKind,
    pub message: String,
    pub processing_time_ms: Option<f64>,
    pub context: ErrorContext,
}

impl ErrorArtifact {
    pub fn for_record(error: &Error, record: &RawRecord, processing_time_ms: Option<f64>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            processing_time_ms,
            context: ErrorContext::Record {
                metadata: record.metadata(),
                raw_value: record.value_base64(),
            },
        }
    }

    pub fn for_data(error: &Error, data: JsonValue) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            processing_time_ms: None,
            context: ErrorContext::Data(data),
        }
    }

    pub fn for_input(error: &Error, original: JsonValue) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            processing_time_ms: None,
            context: ErrorContext::Input(original),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match &self.context {
            ErrorContext::Record {
                metadata,
                raw_value,
            } => {
                let mut kafka_message = json!(metadata);
                kafka_message["rawValue"] = json!(raw_value);
                let mut error = json!({
                    "message": self.message,
                    "type": self.kind,
                    "kafkaMessage": kafka_message,
                });
                if let Some(ms) = self.processing_time_ms {
                    error["processingTimeMs"] = json!(ms);
                }
                json!({ "payload": null, "error": error })
            }
            ErrorContext::Data(data) => json!({
                "payload": {
                    "error": self.message,
                    "type": self.kind,
                    "data": data,
                }
            }),
            ErrorContext::Input(original) => json!({
                "payload": {
                    "error": self.message,
                    "type": self.kind,
                    "originalMessage": original,
                }
            }),
        }
    }
}

impl Serialize for ErrorArtifact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Anything a pipeline emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Artifact {
    Record(SuccessRecord),
    Batch(BatchArtifact),
    Published { payload: PublishReport },
    Validated { payload: ValidationReport },
    Error(ErrorArtifact),
}

impl Artifact {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// An artifact tagged with the output it goes to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Emission {
    pub port: OutputPort,
    pub artifact: Artifact,
}

pub type EmissionSender = mpsc::UnboundedSender<Emission>;
pub type EmissionReceiver = mpsc::UnboundedReceiver<Emission>;

/// Create the ordered emission channel a pipeline writes to.
pub fn channel() -> (EmissionSender, EmissionReceiver) {
    mpsc::unbounded_channel()
}

/// Sends artifacts to the primary or secondary output.
///
/// With dual output disabled every artifact, errors included, goes to the
/// primary output.
#[derive(Debug, Clone)]
pub struct OutputRouter {
    tx: EmissionSender,
    dual_output: bool,
}

impl OutputRouter {
    pub fn new(tx: EmissionSender, dual_output: bool) -> Self {
        Self { tx, dual_output }
    }

    pub fn emit(&self, artifact: Artifact) -> OutputPort {
        let port = if artifact.is_error() && self.dual_output {
            OutputPort::Secondary
        } else {
            OutputPort::Primary
        };
        if self.tx.send(Emission { port, artifact }).is_err() {
            debug!("Output receiver dropped; discarding {port:?} artifact");
        }
        port
    }

    pub fn emit_error(&self, artifact: ErrorArtifact) -> OutputPort {
        self.emit(Artifact::Error(artifact))
    }
}
