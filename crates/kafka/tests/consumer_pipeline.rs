//! Consumer pipeline tests against the in-memory broker and registry.
//!
//! Records are Avro-encoded through the mock registry, pushed into the mock
//! broker and read back from the pipeline's emission channel.

use kafka_types::{wrap, StartPosition};
use schema_bridge_kafka::output::EmissionReceiver;
use schema_bridge_kafka::testing::{MockBroker, MockRegistry};
use schema_bridge_kafka::{
    output, Artifact, BrokerClient, ConsumerConfig, ConsumerPipeline, Disposition, Error, ErrorKind,
    OutputPort, PipelineState,
};
use schema_bridge_registry::SchemaRegistryClient;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "users";
const SUBJECT: &str = "users-value";

const USER_V1: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"name","type":"string"}]}"#;
const USER_V2: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"},{"name":"name","type":"string"},{"name":"email","type":["null","string"],"default":null}]}"#;

type Pipeline = ConsumerPipeline<MockBroker, MockRegistry>;

struct Harness {
    broker: Arc<MockBroker>,
    registry: Arc<MockRegistry>,
    pipeline: Pipeline,
    emissions: EmissionReceiver,
    schema_id: u32,
}

fn config() -> ConsumerConfig {
    ConsumerConfig {
        topic: TOPIC.to_string(),
        ..Default::default()
    }
}

fn harness(config: ConsumerConfig) -> Harness {
    tracing_subscriber::fmt()
        .with_env_filter("schema_bridge_kafka=debug")
        .try_init()
        .ok();

    let broker = Arc::new(MockBroker::new(TOPIC));
    let registry = Arc::new(MockRegistry::new());
    let schema_id = registry.add_subject(SUBJECT, USER_V1).unwrap();
    let (tx, emissions) = output::channel();
    let pipeline = ConsumerPipeline::new(config, Arc::clone(&broker), Arc::clone(&registry), tx);
    Harness {
        broker,
        registry,
        pipeline,
        emissions,
        schema_id,
    }
}

async fn encoded_user(registry: &MockRegistry, schema_id: u32, id: i64) -> Vec<u8> {
    registry
        .encode(schema_id, &json!({"id": id, "name": format!("user-{id}")}))
        .await
        .unwrap()
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

async fn next_record(h: &mut Harness) -> Disposition {
    let record = h.broker.recv().await.unwrap();
    h.pipeline.handle_record(record).await
}

#[tokio::test]
async fn test_start_binds_schema_and_subscribes() -> Result<(), Box<dyn std::error::Error>> {
    let mut h = harness(ConsumerConfig {
        start_position: StartPosition::Latest,
        ..config()
    });
    h.pipeline.start().await?;

    assert_eq!(h.pipeline.status().state(), PipelineState::Ready);
    assert_eq!(h.pipeline.binding().unwrap().schema_id, h.schema_id);
    assert_eq!(
        h.broker.subscriptions(),
        vec![(TOPIC.to_string(), StartPosition::Latest)]
    );
    assert_eq!(h.broker.connect_calls(), 1);

    h.pipeline.close().await;
    assert_eq!(h.pipeline.status().state(), PipelineState::Closed);
    assert_eq!(h.broker.disconnect_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_subject_fails_before_connecting() {
    let mut h = harness(ConsumerConfig {
        schema_subject: Some("unknown-value".to_string()),
        ..config()
    });
    let err = h.pipeline.start().await.unwrap_err();
    assert!(matches!(err, Error::SchemaNotFound { .. }));
    assert_eq!(h.pipeline.status().state(), PipelineState::Failed);
    assert_eq!(h.broker.connect_calls(), 0);

    // Closing a failed pipeline releases resources but keeps the state
    h.pipeline.close().await;
    assert_eq!(h.pipeline.status().state(), PipelineState::Failed);
    assert_eq!(h.broker.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_auto_register_on_start() {
    let mut h = harness(ConsumerConfig {
        schema_subject: Some("orders-value".to_string()),
        auto_register: true,
        default_schema: Some(USER_V2.to_string()),
        ..config()
    });
    h.pipeline.start().await.unwrap();
    let binding = h.pipeline.binding().unwrap();
    assert!(binding.registered);
    assert_eq!(
        h.registry.latest_schema_id("orders-value").await.unwrap(),
        binding.schema_id
    );
}

#[tokio::test]
async fn test_invalid_config_is_fatal() {
    let mut h = harness(ConsumerConfig {
        topic: String::new(),
        ..config()
    });
    let err = h.pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(h.pipeline.status().state(), PipelineState::Failed);
    assert_eq!(h.registry.latest_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_broker_fails_start() {
    let mut h = harness(config());
    h.broker.set_fail_connect(true);
    let err = h.pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportError);

    let status = h.pipeline.status().snapshot();
    assert_eq!(status.state, PipelineState::Failed);
    assert_eq!(status.text(), "Failed: Transport error: broker unreachable");
}

#[tokio::test(start_paused = true)]
async fn test_connection_runs_in_background() {
    let h = harness(config());
    h.broker.set_connect_delay(Duration::from_secs(2));
    let status = h.pipeline.status().clone();
    let mut pipeline = h.pipeline;

    let starting = tokio::spawn(async move {
        let result = pipeline.start().await;
        (pipeline, result)
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(status.state(), PipelineState::ConnectingBroker);

    let (mut pipeline, result) = starting.await.unwrap();
    result.unwrap();
    assert_eq!(status.state(), PipelineState::Ready);
    pipeline.close().await;
}

#[tokio::test]
async fn test_decoded_record_carries_metadata() {
    let mut h = harness(ConsumerConfig {
        output_raw_message: true,
        enable_metrics: true,
        ..config()
    });
    h.pipeline.start().await.unwrap();

    let value = encoded_user(&h.registry, h.schema_id, 1).await;
    let offset = h.broker.push_value(value);
    assert_eq!(next_record(&mut h).await, Disposition::Emitted);

    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted.len(), 1);
    let (port, artifact) = &emitted[0];
    assert_eq!(*port, OutputPort::Primary);
    assert_eq!(artifact["payload"], json!({"id": 1, "name": "user-1"}));
    assert_eq!(artifact["kafkaMessage"]["topic"], TOPIC);
    assert_eq!(artifact["kafkaMessage"]["offset"], offset);
    assert_eq!(artifact["kafkaMessage"]["key"], format!("key-{offset}"));
    assert!(artifact["kafkaMessage"]["processingTimeMs"].is_number());

    let status = h.pipeline.status().snapshot();
    assert_eq!(status.message_count, 1);
    assert_eq!(status.performance.unwrap().message_count, 1);
}

#[tokio::test]
async fn test_plain_record_has_no_metadata() {
    let mut h = harness(config());
    h.pipeline.start().await.unwrap();
    let value = encoded_user(&h.registry, h.schema_id, 2).await;
    h.broker.push_value(value);
    next_record(&mut h).await;

    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted[0].1, json!({"payload": {"id": 2, "name": "user-2"}}));
}

#[tokio::test]
async fn test_error_isolation_with_dual_output() {
    let mut h = harness(ConsumerConfig {
        dual_output: true,
        ..config()
    });
    h.pipeline.start().await.unwrap();

    for id in 0..5 {
        let value = if id == 2 {
            // Valid envelope, truncated Avro body
            wrap(h.schema_id, &[0xff])
        } else {
            encoded_user(&h.registry, h.schema_id, id).await
        };
        h.broker.push_value(value);
    }

    let mut dispositions = Vec::new();
    for _ in 0..5 {
        dispositions.push(next_record(&mut h).await);
    }
    assert_eq!(dispositions[2], Disposition::Failed(OutputPort::Secondary));

    let emitted = drain(&mut h.emissions);
    let primary: Vec<_> = emitted
        .iter()
        .filter(|(port, _)| *port == OutputPort::Primary)
        .collect();
    let secondary: Vec<_> = emitted
        .iter()
        .filter(|(port, _)| *port == OutputPort::Secondary)
        .collect();
    assert_eq!(primary.len(), 4);
    assert_eq!(secondary.len(), 1);

    let error = &secondary[0].1;
    assert!(error["payload"].is_null());
    assert_eq!(error["error"]["type"], "SCHEMA_DECODE_ERROR");
    assert_eq!(error["error"]["kafkaMessage"]["offset"], 2);
    assert!(error["error"]["kafkaMessage"]["rawValue"].is_string());

    let status = h.pipeline.status().snapshot();
    assert_eq!(status.message_count, 4);
    assert_eq!(status.error_count, 1);
    assert_eq!(status.state, PipelineState::Ready);
}

#[tokio::test]
async fn test_errors_share_primary_without_dual_output() {
    let mut h = harness(config());
    h.pipeline.start().await.unwrap();

    h.broker.push_value(vec![0x01, 0, 0, 0, 1, 2]);
    assert_eq!(
        next_record(&mut h).await,
        Disposition::Failed(OutputPort::Primary)
    );

    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted[0].0, OutputPort::Primary);
    assert_eq!(emitted[0].1["error"]["type"], "MALFORMED_ENVELOPE");
}

#[tokio::test]
async fn test_skip_invalid_drops_error_artifacts() {
    let mut h = harness(ConsumerConfig {
        skip_invalid: true,
        dual_output: true,
        ..config()
    });
    h.pipeline.start().await.unwrap();

    h.broker.push_value(vec![0, 0]);
    assert_eq!(next_record(&mut h).await, Disposition::Skipped);
    assert!(drain(&mut h.emissions).is_empty());
    assert_eq!(h.pipeline.status().snapshot().error_count, 1);
}

#[tokio::test]
async fn test_batches_flush_at_capacity() {
    let mut h = harness(ConsumerConfig {
        batch_size: 10,
        batch_timeout: Duration::from_secs(30),
        ..config()
    });
    h.pipeline.start().await.unwrap();

    for id in 0..25 {
        let value = encoded_user(&h.registry, h.schema_id, id).await;
        h.broker.push_value(value);
    }
    for _ in 0..25 {
        next_record(&mut h).await;
    }

    let emitted = drain(&mut h.emissions);
    let sizes: Vec<u64> = emitted
        .iter()
        .map(|(_, a)| a["batchInfo"]["size"].as_u64().unwrap())
        .collect();
    assert_eq!(sizes, vec![10, 10]);
    assert_eq!(emitted[0].1["payload"][0]["payload"]["id"], 0);
    assert_ne!(
        emitted[0].1["batchInfo"]["batchId"],
        emitted[1].1["batchInfo"]["batchId"]
    );
    assert_eq!(h.pipeline.status().snapshot().text(), "Reading (25) - Batch: 5/10");

    // Close drains the partial batch
    h.pipeline.close().await;
    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].1["batchInfo"]["size"], 5);
}

#[tokio::test(start_paused = true)]
async fn test_partial_batch_flushes_after_timeout() {
    let mut h = harness(ConsumerConfig {
        batch_size: 10,
        batch_timeout: Duration::from_millis(200),
        ..config()
    });
    h.pipeline.start().await.unwrap();

    for id in 0..3 {
        let value = encoded_user(&h.registry, h.schema_id, id).await;
        h.broker.push_value(value);
        assert!(matches!(
            next_record(&mut h).await,
            Disposition::Batched { .. }
        ));
    }
    assert!(drain(&mut h.emissions).is_empty());

    tokio::time::sleep(Duration::from_millis(250)).await;
    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].1["batchInfo"]["size"], 3);
    assert_eq!(emitted[0].1["payload"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_schema_evolution_is_tracked() {
    let mut h = harness(ConsumerConfig {
        track_schema_evolution: true,
        ..config()
    });
    let v1 = h.schema_id;
    let v2 = h.registry.add_subject(SUBJECT, USER_V2).unwrap();
    h.pipeline.start().await.unwrap();

    for schema_id in [v1, v1, v2, v1] {
        let value = h
            .registry
            .encode(schema_id, &json!({"id": 1, "name": "a", "email": null}))
            .await
            .unwrap();
        h.broker.push_value(value);
        next_record(&mut h).await;
    }

    let tracker = h.pipeline.evolution().unwrap();
    let order: Vec<u32> = tracker.records().iter().map(|r| r.schema_id).collect();
    assert_eq!(order, vec![v1, v2]);
    assert_eq!(tracker.get(v1).unwrap().occurrence_count, 3);
    assert_eq!(tracker.get(v2).unwrap().occurrence_count, 1);
    assert_eq!(h.pipeline.status().snapshot().schema_count, 2);
    // One schema fetch per distinct id
    assert_eq!(h.registry.schema_by_id_calls(), 2);
}

#[tokio::test]
async fn test_bad_magic_byte_is_not_tracked() {
    let mut h = harness(ConsumerConfig {
        track_schema_evolution: true,
        ..config()
    });
    h.pipeline.start().await.unwrap();

    h.broker.push_value(vec![0x01, 0x00, 0x00, 0x03, 0xe7, 0x02]);
    assert_eq!(
        next_record(&mut h).await,
        Disposition::Failed(OutputPort::Primary)
    );
    let emitted = drain(&mut h.emissions);
    assert_eq!(emitted[0].1["error"]["type"], "MALFORMED_ENVELOPE");
    assert!(h.pipeline.evolution().unwrap().is_empty());
    assert_eq!(h.registry.schema_by_id_calls(), 0);
    assert_eq!(h.pipeline.status().snapshot().schema_count, 0);

    let value = encoded_user(&h.registry, h.schema_id, 7).await;
    h.broker.push_value(value);
    assert_eq!(next_record(&mut h).await, Disposition::Emitted);
    let tracker = h.pipeline.evolution().unwrap();
    let tracked: Vec<u32> = tracker.records().iter().map(|r| r.schema_id).collect();
    assert_eq!(tracked, vec![h.schema_id]);
}

#[tokio::test]
async fn test_resolver_cache_survives_records() {
    let mut h = harness(config());
    h.pipeline.start().await.unwrap();
    for id in 0..3 {
        let value = encoded_user(&h.registry, h.schema_id, id).await;
        h.broker.push_value(value);
        next_record(&mut h).await;
    }
    assert_eq!(h.registry.latest_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_after_quiet_period() {
    let mut h = harness(config());
    let mut changes = h.pipeline.status().subscribe();
    h.pipeline.start().await.unwrap();

    let value = encoded_user(&h.registry, h.schema_id, 1).await;
    h.broker.push_value(value);
    next_record(&mut h).await;
    changes.borrow_and_update();

    tokio::time::sleep(Duration::from_millis(6500)).await;
    assert_eq!(h.pipeline.status().state(), PipelineState::Idle);
    assert!(changes.has_changed().unwrap());
    changes.borrow_and_update();
    assert_eq!(h.pipeline.status().snapshot().text(), "Idle (1 msgs)");

    // Staying quiet does not re-enter Idle
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!changes.has_changed().unwrap());

    // Activity wakes the pipeline up again
    let value = encoded_user(&h.registry, h.schema_id, 2).await;
    h.broker.push_value(value);
    next_record(&mut h).await;
    assert_eq!(h.pipeline.status().state(), PipelineState::Ready);
    h.pipeline.close().await;
}

#[tokio::test]
async fn test_run_until_shutdown() {
    let h = harness(config());
    let schema_id = h.schema_id;
    let broker = Arc::clone(&h.broker);
    let registry = Arc::clone(&h.registry);
    let status = h.pipeline.status().clone();
    let mut emissions = h.emissions;
    let mut pipeline = h.pipeline;

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let running = tokio::spawn(async move { pipeline.run(token).await });

    for id in 0..3 {
        broker.push_value(encoded_user(&registry, schema_id, id).await);
    }
    for id in 0..3 {
        let emission = emissions.recv().await.unwrap();
        match emission.artifact {
            Artifact::Record(record) => assert_eq!(record.payload["id"], id),
            other => panic!("unexpected artifact: {other:?}"),
        }
    }

    shutdown.cancel();
    running.await.unwrap().unwrap();
    assert_eq!(status.state(), PipelineState::Closed);
    assert_eq!(broker.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_broker_failure_stops_run() {
    let h = harness(config());
    let broker = Arc::clone(&h.broker);
    let status = h.pipeline.status().clone();
    let mut pipeline = h.pipeline;

    broker.push_error(Error::Transport("connection reset".to_string()));
    let err = pipeline.run(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportError);
    assert_eq!(status.state(), PipelineState::Failed);
    assert_eq!(broker.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_close_resets_state() {
    let mut h = harness(ConsumerConfig {
        track_schema_evolution: true,
        enable_metrics: true,
        ..config()
    });
    h.pipeline.start().await.unwrap();
    let value = encoded_user(&h.registry, h.schema_id, 1).await;
    h.broker.push_value(value);
    next_record(&mut h).await;

    h.pipeline.close().await;
    h.pipeline.close().await;

    let status = h.pipeline.status().snapshot();
    assert_eq!(status.state, PipelineState::Closed);
    assert_eq!(status.message_count, 0);
    assert!(h.pipeline.binding().is_none());
    assert!(h.pipeline.evolution().unwrap().is_empty());
    assert_eq!(h.broker.disconnect_calls(), 1);
}
