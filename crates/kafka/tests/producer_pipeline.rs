//! Producer pipeline tests against the in-memory broker and registry.

use schema_bridge_kafka::output::EmissionReceiver;
use schema_bridge_kafka::testing::{MockBroker, MockRegistry};
use schema_bridge_kafka::{
    output, Artifact, Error, ErrorKind, OutputPort, PipelineState, ProducerConfig, ProducerInput,
    ProducerPipeline,
};
use schema_bridge_registry::SchemaRegistryClient;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "users";
const SUBJECT: &str = "users-value";

const USER: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"name","type":"string"}]}"#;

struct Harness {
    broker: Arc<MockBroker>,
    registry: Arc<MockRegistry>,
    pipeline: ProducerPipeline<MockBroker, MockRegistry>,
    emissions: EmissionReceiver,
}

fn config() -> ProducerConfig {
    ProducerConfig {
        topic: TOPIC.to_string(),
        ..Default::default()
    }
}

fn harness(config: ProducerConfig, register: bool) -> Harness {
    tracing_subscriber::fmt()
        .with_env_filter("schema_bridge_kafka=debug")
        .try_init()
        .ok();

    let broker = Arc::new(MockBroker::new(TOPIC));
    let registry = Arc::new(MockRegistry::new());
    if register {
        registry.add_subject(SUBJECT, USER).unwrap();
    }
    let (tx, emissions) = output::channel();
    let pipeline = ProducerPipeline::new(config, Arc::clone(&broker), Arc::clone(&registry), tx);
    Harness {
        broker,
        registry,
        pipeline,
        emissions,
    }
}

fn drain(rx: &mut EmissionReceiver) -> Vec<(OutputPort, JsonValue)> {
    let mut out = Vec::new();
    while let Ok(emission) = rx.try_recv() {
        out.push((
            emission.port,
            serde_json::to_value(&emission.artifact).unwrap(),
        ));
    }
    out
}

#[tokio::test]
async fn test_publish_reports_delivery() -> Result<(), Box<dyn std::error::Error>> {
    let mut h = harness(config(), true);
    h.pipeline.start().await?;
    assert_eq!(h.pipeline.status().state(), PipelineState::Ready);

    let data = json!({"id": 7, "name": "Ada"});
    let artifact = h.pipeline.handle(ProducerInput::json(data.clone())).await?;
    let Artifact::Published { payload } = artifact else {
        panic!("expected a publish report");
    };
    assert!(payload.success);
    assert_eq!(payload.topic, TOPIC);
    assert_eq!(payload.original_data, data);
    assert_eq!(payload.kafka_result.len(), 1);

    let sent = h.broker.sent();
    assert_eq!(sent.len(), 1);
    let (topic, message) = &sent[0];
    assert_eq!(topic, TOPIC);
    // Key defaults to the payload's id
    assert_eq!(message.key.as_deref(), Some("7"));
    assert!(message.timestamp.is_some());
    assert_eq!(
        kafka_types::extract_schema_id(&message.value),
        Some(payload.schema_id)
    );
    assert_eq!(h.registry.decode(&message.value).await?, data);

    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].0, OutputPort::Primary);
    assert_eq!(emitted[0].1["payload"]["success"], true);
    assert_eq!(emitted[0].1["payload"]["kafkaResult"][0]["partition"], 0);
    assert_eq!(h.pipeline.status().snapshot().message_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_text_payload_and_overrides() {
    let mut h = harness(config(), true);
    h.pipeline.start().await.unwrap();

    let input = ProducerInput::text(r#"{"id": 1, "name": "Grace"}"#)
        .with_key("custom-key")
        .with_header("source", "test")
        .with_timestamp(1_700_000_000_000);
    let artifact = assert_ok!(h.pipeline.handle(input).await);
    assert!(!artifact.is_error());

    let (_, message) = &h.broker.sent()[0];
    assert_eq!(message.key.as_deref(), Some("custom-key"));
    assert_eq!(message.headers.get("source").map(String::as_str), Some("test"));
    assert_eq!(message.timestamp, Some(1_700_000_000_000));
}

#[tokio::test]
async fn test_unparseable_text_is_reported() {
    let mut h = harness(
        ProducerConfig {
            dual_output: true,
            ..config()
        },
        true,
    );
    h.pipeline.start().await.unwrap();

    let err = h
        .pipeline
        .handle(ProducerInput::text("{not json"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PayloadParseError);

    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted[0].0, OutputPort::Secondary);
    assert_eq!(emitted[0].1["payload"]["type"], "PAYLOAD_PARSE_ERROR");
    assert_eq!(emitted[0].1["payload"]["originalMessage"], "{not json");
    assert!(h.broker.sent().is_empty());
}

#[tokio::test]
async fn test_encode_failure_carries_data() {
    let mut h = harness(config(), true);
    h.pipeline.start().await.unwrap();

    let data = json!({"id": "not-a-long", "name": "x"});
    let err = h
        .pipeline
        .handle(ProducerInput::json(data.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaEncode(_)));

    let emitted = drain(&mut h.emissions);
    // Without dual output errors share the primary output
    assert_eq!(emitted[0].0, OutputPort::Primary);
    assert_eq!(emitted[0].1["payload"]["type"], "SCHEMA_ENCODE_ERROR");
    assert_eq!(emitted[0].1["payload"]["data"], data);

    let status = h.pipeline.status().snapshot();
    assert_eq!(status.error_count, 1);
    assert_eq!(status.state, PipelineState::Ready);
}

#[tokio::test]
async fn test_validate_only_skips_publish() {
    let mut h = harness(
        ProducerConfig {
            validate_only: true,
            ..config()
        },
        true,
    );
    h.pipeline.start().await.unwrap();

    let artifact = h
        .pipeline
        .handle(ProducerInput::json(json!({"id": 3, "name": "Lin"})))
        .await
        .unwrap();
    let Artifact::Validated { payload } = artifact else {
        panic!("expected a validation report");
    };
    assert!(payload.validated);
    // Envelope header plus the Avro body
    assert!(payload.encoded_size > 5);
    assert!(h.broker.sent().is_empty());
}

#[tokio::test]
async fn test_send_failure_keeps_pipeline_ready() {
    let mut h = harness(
        ProducerConfig {
            dual_output: true,
            ..config()
        },
        true,
    );
    h.pipeline.start().await.unwrap();
    h.broker.set_fail_send(true);

    let err = h
        .pipeline
        .handle(ProducerInput::json(json!({"id": 1, "name": "a"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SendError);
    assert_eq!(h.pipeline.status().state(), PipelineState::Ready);

    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted[0].0, OutputPort::Secondary);
    assert_eq!(emitted[0].1["payload"]["type"], "SEND_ERROR");

    h.broker.set_fail_send(false);
    h.pipeline
        .handle(ProducerInput::json(json!({"id": 2, "name": "b"})))
        .await
        .unwrap();
    assert_eq!(h.broker.sent().len(), 1);
}

#[tokio::test]
async fn test_input_before_ready_is_discarded() {
    let mut h = harness(config(), true);
    let err = h
        .pipeline
        .handle(ProducerInput::json(json!({"id": 1, "name": "a"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotReady(PipelineState::Initializing)));
    assert!(drain(&mut h.emissions).is_empty());
    assert!(h.broker.sent().is_empty());
}

#[tokio::test]
async fn test_start_tolerates_missing_schema() {
    let mut h = harness(config(), false);
    h.pipeline.start().await.unwrap();
    assert_eq!(h.pipeline.status().state(), PipelineState::Ready);
    assert!(h.pipeline.binding().is_none());

    let err = h
        .pipeline
        .handle(ProducerInput::json(json!({"id": 1, "name": "a"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaNotFound { .. }));
    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted[0].1["payload"]["type"], "SCHEMA_NOT_FOUND");

    // Once the subject exists the next message resolves it
    h.registry.add_subject(SUBJECT, USER).unwrap();
    h.pipeline
        .handle(ProducerInput::json(json!({"id": 2, "name": "b"})))
        .await
        .unwrap();
    assert!(h.pipeline.binding().is_some());
}

#[tokio::test]
async fn test_auto_register_and_cache() {
    let mut h = harness(
        ProducerConfig {
            auto_register: true,
            default_schema: Some(USER.to_string()),
            ..config()
        },
        false,
    );
    h.pipeline.start().await.unwrap();
    for id in 0..3 {
        h.pipeline
            .handle(ProducerInput::json(json!({"id": id, "name": "n"})))
            .await
            .unwrap();
    }
    assert_eq!(h.registry.register_calls(), 1);
    assert_eq!(h.registry.latest_calls(), 1);
    assert_eq!(h.broker.sent().len(), 3);
}

#[tokio::test]
async fn test_unreachable_broker_fails_start() {
    let mut h = harness(config(), true);
    h.broker.set_fail_connect(true);
    let err = h.pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportError);
    assert_eq!(h.pipeline.status().state(), PipelineState::Failed);

    let err = h
        .pipeline
        .handle(ProducerInput::json(json!({"id": 1, "name": "a"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotReady(PipelineState::Failed)));
}

#[tokio::test]
async fn test_run_publishes_until_input_ends() {
    let h = harness(config(), true);
    let broker = Arc::clone(&h.broker);
    let status = h.pipeline.status().clone();
    let mut pipeline = h.pipeline;

    let (tx, rx) = mpsc::channel(8);
    tx.send(ProducerInput::json(json!({"id": 1, "name": "a"})))
        .await
        .unwrap();
    tx.send(ProducerInput::text("broken")).await.unwrap();
    tx.send(ProducerInput::json(json!({"id": 2, "name": "b"})))
        .await
        .unwrap();
    drop(tx);

    pipeline.run(rx, CancellationToken::new()).await.unwrap();
    assert_eq!(broker.sent().len(), 2);
    assert_eq!(status.state(), PipelineState::Closed);
    assert_eq!(broker.disconnect_calls(), 1);
}
