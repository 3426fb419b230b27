//! In-memory broker and registry doubles.
//!
//! Both count the calls made against them so tests can assert on caching
//! and connection lifecycles. The registry encodes with real Avro so
//! encode and decode failures behave like the Confluent client's.

use async_trait::async_trait;
use kafka_types::{
    unwrap as unwrap_envelope, wrap, DeliveryReport, Headers, OutboundMessage, RawRecord,
    StartPosition,
};
use schema_bridge_registry::avro::{self, Schema};
use schema_bridge_registry::{RegistryError, SchemaHandle, SchemaRegistryClient, SchemaType};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::broker::BrokerClient;
use crate::error::{Error, Result};

#[derive(Default)]
struct RegistryState {
    last_id: u32,
    subjects: HashMap<String, Vec<u32>>,
    schemas: HashMap<u32, (String, Arc<Schema>)>,
}

/// Registry double backed by a map of subjects to schema ids.
#[derive(Default)]
pub struct MockRegistry {
    state: StdMutex<RegistryState>,
    unavailable: AtomicBool,
    latest_calls: AtomicUsize,
    by_id_calls: AtomicUsize,
    register_calls: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `document` under `subject` without counting a call.
    pub fn add_subject(&self, subject: &str, document: &str) -> Result<u32> {
        self.insert(subject, document).map_err(Error::Registry)
    }

    /// Make every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    pub fn schema_by_id_calls(&self) -> usize {
        self.by_id_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    fn insert(&self, subject: &str, document: &str) -> std::result::Result<u32, RegistryError> {
        let schema = avro::parse_schema(document)?;
        let mut state = self.lock();
        state.last_id += 1;
        let id = state.last_id;
        state
            .schemas
            .insert(id, (document.to_string(), Arc::new(schema)));
        state.subjects.entry(subject.to_string()).or_default().push(id);
        Ok(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        // A poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> std::result::Result<(), RegistryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::Transport("registry unavailable".to_string()));
        }
        Ok(())
    }

    fn schema(&self, id: u32) -> std::result::Result<Arc<Schema>, RegistryError> {
        self.lock()
            .schemas
            .get(&id)
            .map(|(_, schema)| Arc::clone(schema))
            .ok_or_else(|| RegistryError::NotFound(format!("schema id {id}")))
    }
}

#[async_trait]
impl SchemaRegistryClient for MockRegistry {
    async fn latest_schema_id(&self, subject: &str) -> std::result::Result<u32, RegistryError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.lock()
            .subjects
            .get(subject)
            .and_then(|ids| ids.last().copied())
            .ok_or_else(|| RegistryError::NotFound(format!("subject {subject}")))
    }

    async fn schema_by_id(&self, id: u32) -> std::result::Result<SchemaHandle, RegistryError> {
        self.by_id_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let state = self.lock();
        let (definition, _) = state
            .schemas
            .get(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("schema id {id}")))?;
        Ok(SchemaHandle {
            id,
            schema_type: SchemaType::Avro,
            definition: definition.clone(),
        })
    }

    async fn register(&self, document: &str, subject: &str) -> std::result::Result<u32, RegistryError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.insert(subject, document)
    }

    async fn encode(&self, id: u32, record: &JsonValue) -> std::result::Result<Vec<u8>, RegistryError> {
        self.check_available()?;
        let schema = self.schema(id)?;
        let datum = avro::encode_datum(&schema, record)?;
        Ok(wrap(id, &datum))
    }

    async fn decode(&self, wire: &[u8]) -> std::result::Result<JsonValue, RegistryError> {
        self.check_available()?;
        let envelope = unwrap_envelope(wire)?;
        let schema = self.schema(envelope.schema_id)?;
        avro::decode_datum(&schema, envelope.payload)
    }
}

/// Broker double: records pushed by the test come out of `recv` in order,
/// and published messages are kept for inspection.
pub struct MockBroker {
    inbound_tx: mpsc::UnboundedSender<Result<RawRecord>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Result<RawRecord>>>,
    sent: StdMutex<Vec<(String, OutboundMessage)>>,
    subscriptions: StdMutex<Vec<(String, StartPosition)>>,
    topic: String,
    next_offset: AtomicI64,
    fail_connect: AtomicBool,
    fail_send: AtomicBool,
    connect_delay: StdMutex<Duration>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockBroker {
    pub fn new(topic: &str) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            sent: StdMutex::new(Vec::new()),
            subscriptions: StdMutex::new(Vec::new()),
            topic: topic.to_string(),
            next_offset: AtomicI64::new(0),
            fail_connect: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            connect_delay: StdMutex::new(Duration::ZERO),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Queue a record value; topic, partition and offset are filled in.
    pub fn push_value(&self, value: Vec<u8>) -> i64 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.push_record(RawRecord {
            topic: self.topic.clone(),
            partition: 0,
            offset,
            key: Some(format!("key-{offset}").into_bytes()),
            value,
            timestamp: Some(1_700_000_000_000 + offset),
            headers: Headers::new(),
        });
        offset
    }

    pub fn push_record(&self, record: RawRecord) {
        // The receiver lives as long as self
        let _ = self.inbound_tx.send(Ok(record));
    }

    /// Make the next `recv` fail.
    pub fn push_error(&self, error: Error) {
        let _ = self.inbound_tx.send(Err(error));
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, StartPosition)> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Transport("broker unreachable".to_string()));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, start: StartPosition) -> Result<()> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((topic.to_string(), start));
        Ok(())
    }

    async fn recv(&self) -> Result<RawRecord> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    async fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<Vec<DeliveryReport>> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::Send("broker rejected message".to_string()));
        }
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        let mut reports = Vec::with_capacity(messages.len());
        for message in messages {
            reports.push(DeliveryReport {
                partition: 0,
                offset: sent.len() as i64,
            });
            sent.push((topic.to_string(), message));
        }
        Ok(reports)
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
