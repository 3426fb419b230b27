//! Broker client seam.
//!
//! Pipelines only see [`BrokerClient`]; [`RdkafkaBroker`] is the production
//! implementation on top of librdkafka, and `testing::MockBroker` stands in
//! for it in tests.

use async_trait::async_trait;
use kafka_types::{DeliveryReport, Headers, OutboundMessage, RawRecord, StartPosition};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer as RdkafkaConsumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers as _, Message as RdkafkaMessage, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{BrokerOpts, ConsumerConfig, ProducerConfig};
use crate::error::{Error, Result};

/// Operations the pipelines need from a Kafka client.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establish the connection; fails when the cluster is unreachable.
    async fn connect(&self) -> Result<()>;

    /// Join the consumer group and subscribe to `topic`.
    async fn subscribe(&self, topic: &str, start: StartPosition) -> Result<()>;

    /// Wait for the next record.
    async fn recv(&self) -> Result<RawRecord>;

    /// Publish messages in order and report where each one landed.
    async fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<Vec<DeliveryReport>>;

    /// Release the connection. Safe to call more than once.
    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
impl<T: BrokerClient + ?Sized> BrokerClient for Arc<T> {
    async fn connect(&self) -> Result<()> {
        (**self).connect().await
    }

    async fn subscribe(&self, topic: &str, start: StartPosition) -> Result<()> {
        (**self).subscribe(topic, start).await
    }

    async fn recv(&self) -> Result<RawRecord> {
        (**self).recv().await
    }

    async fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<Vec<DeliveryReport>> {
        (**self).send(topic, messages).await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }
}

/// Consumer-side settings that librdkafka needs at client creation.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub group_id: String,
    pub fetch_min_bytes: u32,
    pub fetch_max_bytes: u32,
}

impl ConsumerSettings {
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            group_id: config.resolved_group_id(),
            fetch_min_bytes: config.fetch_min_bytes,
            fetch_max_bytes: config.fetch_max_bytes,
        }
    }
}

/// Producer-side delivery settings.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub acks: i32,
    pub idempotent: bool,
    pub ack_timeout: Duration,
}

impl ProducerSettings {
    pub fn from_config(config: &ProducerConfig) -> Self {
        Self {
            acks: config.require_acks,
            idempotent: config.idempotent(),
            ack_timeout: config.ack_timeout,
        }
    }
}

#[derive(Debug, Clone)]
enum Role {
    Consumer(ConsumerSettings),
    Producer(ProducerSettings),
}

/// librdkafka-backed broker client.
pub struct RdkafkaBroker {
    opts: BrokerOpts,
    role: Role,
    consumer: Mutex<Option<Arc<StreamConsumer>>>,
    producer: Mutex<Option<FutureProducer>>,
}

impl RdkafkaBroker {
    pub fn consumer(opts: BrokerOpts, settings: ConsumerSettings) -> Self {
        Self::new(opts, Role::Consumer(settings))
    }

    pub fn producer(opts: BrokerOpts, settings: ProducerSettings) -> Self {
        Self::new(opts, Role::Producer(settings))
    }

    fn new(opts: BrokerOpts, role: Role) -> Self {
        Self {
            opts,
            role,
            consumer: Mutex::new(None),
            producer: Mutex::new(None),
        }
    }

    fn base_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.opts.bootstrap_servers())
            .set("client.id", &self.opts.client_id);
        for (key, value) in self.opts.extra_properties()? {
            config.set(key, value);
        }
        Ok(config)
    }

    fn metadata_timeout(&self) -> Duration {
        let millis = self.opts.session_timeout_ms.parse::<u64>().unwrap_or(30_000);
        Duration::from_millis(millis)
    }

    async fn producer_handle(&self) -> Result<FutureProducer> {
        self.producer
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Transport("Producer is not connected".to_string()))
    }
}

#[async_trait]
impl BrokerClient for RdkafkaBroker {
    async fn connect(&self) -> Result<()> {
        let timeout = self.metadata_timeout();
        match &self.role {
            Role::Consumer(_) => {
                // Probe the cluster; the group consumer is created on subscribe
                let probe: BaseConsumer = self.base_config()?.create()?;
                tokio::task::spawn_blocking(move || probe.fetch_metadata(None, timeout).map(|_| ()))
                    .await
                    .map_err(|e| Error::Transport(format!("Metadata probe task failed: {e}")))??;
            }
            Role::Producer(settings) => {
                let mut config = self.base_config()?;
                config
                    .set("acks", settings.acks.to_string())
                    .set("enable.idempotence", settings.idempotent.to_string())
                    .set(
                        "request.timeout.ms",
                        settings.ack_timeout.as_millis().to_string(),
                    )
                    .set("message.timeout.ms", "30000");
                let producer: FutureProducer = config.create()?;

                let probe = producer.clone();
                tokio::task::spawn_blocking(move || {
                    probe.client().fetch_metadata(None, timeout).map(|_| ())
                })
                .await
                .map_err(|e| Error::Transport(format!("Metadata probe task failed: {e}")))??;

                *self.producer.lock().await = Some(producer);
            }
        }
        info!("Connected to Kafka brokers {}", self.opts.bootstrap_servers());
        Ok(())
    }

    async fn subscribe(&self, topic: &str, start: StartPosition) -> Result<()> {
        let Role::Consumer(settings) = &self.role else {
            return Err(Error::Config(
                "subscribe called on a producer client".to_string(),
            ));
        };

        let consumer: StreamConsumer = self
            .base_config()?
            .set("group.id", &settings.group_id)
            .set("auto.offset.reset", start.as_offset_reset())
            .set("session.timeout.ms", &self.opts.session_timeout_ms)
            .set("fetch.min.bytes", settings.fetch_min_bytes.to_string())
            .set("fetch.max.bytes", settings.fetch_max_bytes.to_string())
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| Error::Transport(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| Error::Transport(format!("Failed to subscribe to topic: {e}")))?;

        info!(
            "Subscribed to topic {topic} (group {}, start {start})",
            settings.group_id
        );
        *self.consumer.lock().await = Some(Arc::new(consumer));
        Ok(())
    }

    async fn recv(&self) -> Result<RawRecord> {
        let consumer = self
            .consumer
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Transport("Consumer is not subscribed".to_string()))?;

        let msg = consumer
            .recv()
            .await
            .map_err(|e| Error::Transport(format!("Error receiving message: {e}")))?;
        Ok(to_raw_record(&msg))
    }

    async fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<Vec<DeliveryReport>> {
        let producer = self.producer_handle().await?;
        let timeout = match &self.role {
            Role::Producer(settings) => settings.ack_timeout,
            Role::Consumer(_) => Duration::from_secs(5),
        };

        let mut reports = Vec::with_capacity(messages.len());
        for message in &messages {
            let headers = to_owned_headers(&message.headers);
            let mut record = FutureRecord::<str, Vec<u8>>::to(topic)
                .payload(&message.value)
                .headers(headers);
            if let Some(key) = &message.key {
                record = record.key(key.as_str());
            }
            if let Some(timestamp) = message.timestamp {
                record = record.timestamp(timestamp);
            }

            let (partition, offset) = producer
                .send(record, timeout)
                .await
                .map_err(|(err, _)| Error::Send(err.to_string()))?;
            debug!("Delivered message to {topic} [{partition}] @ {offset}");
            reports.push(DeliveryReport { partition, offset });
        }
        Ok(reports)
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(consumer) = self.consumer.lock().await.take() {
            consumer.unsubscribe();
            debug!("Consumer unsubscribed");
        }
        if let Some(producer) = self.producer.lock().await.take() {
            let flushed = tokio::task::spawn_blocking(move || producer.flush(Duration::from_secs(5)))
                .await
                .map_err(|e| Error::Transport(format!("Flush task failed: {e}")))?;
            if let Err(e) = flushed {
                warn!("Producer flush on disconnect failed: {e}");
            }
        }
        Ok(())
    }
}

fn to_raw_record(msg: &BorrowedMessage<'_>) -> RawRecord {
    let mut headers = Headers::new();
    if let Some(borrowed) = msg.headers() {
        for header in borrowed.iter() {
            let value = header
                .value
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default();
            headers.insert(header.key.to_string(), value);
        }
    }

    RawRecord {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| k.to_vec()),
        value: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
        timestamp: msg.timestamp().to_millis(),
        headers,
    }
}

fn to_owned_headers(headers: &Headers) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            })
        })
}
