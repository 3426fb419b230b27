//! JSON-lines input for the producer.
//!
//! Each non-empty line is one message. In plain mode the whole line is the
//! payload. In envelope mode a line is an object carrying the payload next
//! to optional per-message overrides:
//!
//! ```json
//! {"payload": {"id": 1}, "key": "k1", "headers": {"source": "cli"}, "timestamp": 1700000000000}
//! ```

use anyhow::Context;
use schema_bridge_kafka::{Error, ProducerInput};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct EnvelopeLine {
    #[serde(default)]
    payload: JsonValue,
    #[serde(default)]
    key: Option<JsonValue>,
    #[serde(default)]
    headers: BTreeMap<String, JsonValue>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Turn one input line into a producer input. Blank lines yield `None`.
///
/// Lines that are not valid JSON are passed through as text so the producer
/// reports them as payload parse errors.
pub fn parse_line(line: &str, envelope: bool) -> Option<ProducerInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !envelope {
        return Some(ProducerInput::text(line));
    }

    let parsed: EnvelopeLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Input line is not an envelope ({e}); passing it through as text");
            return Some(ProducerInput::text(line));
        }
    };

    let mut input = match parsed.payload {
        JsonValue::String(text) => ProducerInput::text(text),
        other => ProducerInput::json(other),
    };
    if let Some(key) = parsed.key.and_then(value_to_string) {
        input = input.with_key(key);
    }
    for (name, value) in parsed.headers {
        if let Some(value) = value_to_string(value) {
            input = input.with_header(name, value);
        }
    }
    if let Some(timestamp) = parsed.timestamp {
        input = input.with_timestamp(timestamp);
    }
    Some(input)
}

fn value_to_string(value: JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Read lines from `reader` and forward them to the producer until EOF or
/// until the producer stops listening. Returns how many inputs were sent.
pub async fn read_inputs<R>(
    reader: R,
    envelope: bool,
    tx: mpsc::Sender<ProducerInput>,
) -> anyhow::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sent = 0;
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let Some(input) = parse_line(&line, envelope) else {
            continue;
        };
        if tx.send(input).await.is_err() {
            debug!("Producer stopped accepting input after {sent} messages");
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

/// Collect the outcome of a [`read_inputs`] task once the producer is done.
///
/// A reader still waiting for input (an idle stdin after Ctrl+C) is aborted
/// and yields `None` instead of holding up shutdown.
pub async fn finish_reader(
    reader: JoinHandle<anyhow::Result<u64>>,
) -> anyhow::Result<Option<u64>> {
    if !reader.is_finished() {
        reader.abort();
    }
    match reader.await {
        Ok(read) => read.map(Some),
        Err(e) if e.is_cancelled() => {
            debug!("Input reader stopped before end of input");
            Ok(None)
        }
        Err(e) => Err(e).context("Input reader task failed"),
    }
}

/// Load a schema document from disk, checking that it is JSON.
pub fn load_schema_document(path: &std::path::Path) -> anyhow::Result<String> {
    let document = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema document {}", path.display()))?;
    serde_json::from_str::<JsonValue>(&document)
        .map_err(|e| Error::InvalidSchemaJson(e.to_string()))
        .with_context(|| format!("Schema document {} is not valid JSON", path.display()))?;
    Ok(document)
}
