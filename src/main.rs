//! Command-line interface for schema-bridge
//!
//! # Usage Examples
//!
//! ## Consume
//! ```bash
//! # Decode every record on a topic to JSON lines
//! schema-bridge consume --topic orders --registry-url http://localhost:8081
//!
//! # Batches of 100 with broker metadata, errors to their own file
//! schema-bridge consume --topic orders --batch-size 100 --batch-timeout 5s \
//!   --output-raw-message --dual-output --errors-to errors.jsonl
//! ```
//!
//! ## Produce
//! ```bash
//! # Publish JSON lines from stdin
//! cat orders.jsonl | schema-bridge produce --topic orders
//!
//! # Validate a file against the subject's schema without publishing
//! schema-bridge produce --topic orders --input orders.jsonl --validate-only
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use schema_bridge::runtime::{shutdown_on_ctrl_c, spawn_status_logger};
use schema_bridge::sink::JsonLinesSink;
use schema_bridge::source::{finish_reader, load_schema_document, read_inputs};
use schema_bridge_kafka::{
    output, BrokerOpts, ConsumerConfig, ConsumerPipeline, ConsumerSettings, ProducerConfig,
    ProducerPipeline, ProducerSettings, RdkafkaBroker,
};
use schema_bridge_registry::{ConfluentRegistry, RegistryOpts};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "schema-bridge")]
#[command(about = "Move schema-registry encoded records between Kafka and JSON lines")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode records from a topic and write them as JSON lines
    Consume {
        #[command(flatten)]
        broker: BrokerOpts,

        #[command(flatten)]
        registry: RegistryOpts,

        #[command(flatten)]
        consumer: ConsumerConfig,

        /// Read the auto-registration schema document from a file
        #[arg(long, value_name = "PATH", conflicts_with = "default_schema")]
        default_schema_file: Option<PathBuf>,

        /// Write secondary-output artifacts here instead of stderr
        #[arg(long, value_name = "PATH")]
        errors_to: Option<PathBuf>,
    },
    /// Encode JSON lines with the subject's schema and publish them
    Produce {
        #[command(flatten)]
        broker: BrokerOpts,

        #[command(flatten)]
        registry: RegistryOpts,

        #[command(flatten)]
        producer: ProducerConfig,

        /// Read the auto-registration schema document from a file
        #[arg(long, value_name = "PATH", conflicts_with = "default_schema")]
        default_schema_file: Option<PathBuf>,

        /// Read messages from this file instead of stdin
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Treat each line as {"payload", "key", "headers", "timestamp"}
        #[arg(long)]
        envelope: bool,

        /// Write secondary-output artifacts here instead of stderr
        #[arg(long, value_name = "PATH")]
        errors_to: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    let outcome = runtime.block_on(run());
    // A blocking stdin read cannot be cancelled; exit without waiting on it
    runtime.shutdown_background();
    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Consume {
            broker,
            registry,
            mut consumer,
            default_schema_file,
            errors_to,
        } => {
            if let Some(path) = default_schema_file {
                consumer.default_schema = Some(load_schema_document(&path)?);
            }
            run_consume(broker, registry, consumer, errors_to).await
        }
        Commands::Produce {
            broker,
            registry,
            mut producer,
            default_schema_file,
            input,
            envelope,
            errors_to,
        } => {
            if let Some(path) = default_schema_file {
                producer.default_schema = Some(load_schema_document(&path)?);
            }
            run_produce(broker, registry, producer, input, envelope, errors_to).await
        }
    }
}

async fn run_consume(
    broker_opts: BrokerOpts,
    registry_opts: RegistryOpts,
    config: ConsumerConfig,
    errors_to: Option<PathBuf>,
) -> anyhow::Result<()> {
    broker_opts.validate()?;
    let registry = Arc::new(
        ConfluentRegistry::new(&registry_opts).context("Failed to create schema registry client")?,
    );
    let settings = ConsumerSettings::from_config(&config);
    info!(
        "Consuming topic {} as group {} from {}",
        config.topic,
        settings.group_id,
        broker_opts.bootstrap_servers()
    );
    let broker = Arc::new(RdkafkaBroker::consumer(broker_opts, settings));

    let (tx, rx) = output::channel();
    let sink = JsonLinesSink::new(tokio::io::stdout(), secondary_writer(errors_to).await?);
    let writer = tokio::spawn(sink.drain(rx));

    let mut pipeline = ConsumerPipeline::new(config, broker, registry, tx);
    let status_logger = spawn_status_logger(pipeline.status());
    let result = pipeline.run(shutdown_on_ctrl_c()).await;
    // Dropping the pipeline closes the emission channel
    drop(pipeline);
    status_logger.abort();

    let stats = writer.await.context("Output writer task failed")??;
    info!(
        "Wrote {} primary and {} secondary artifacts",
        stats.primary, stats.secondary
    );
    result.context("Consumer pipeline failed")
}

async fn run_produce(
    broker_opts: BrokerOpts,
    registry_opts: RegistryOpts,
    config: ProducerConfig,
    input: Option<PathBuf>,
    envelope: bool,
    errors_to: Option<PathBuf>,
) -> anyhow::Result<()> {
    broker_opts.validate()?;
    let registry = Arc::new(
        ConfluentRegistry::new(&registry_opts).context("Failed to create schema registry client")?,
    );
    info!(
        "Producing to topic {} on {}",
        config.topic,
        broker_opts.bootstrap_servers()
    );
    let broker = Arc::new(RdkafkaBroker::producer(
        broker_opts,
        ProducerSettings::from_config(&config),
    ));

    let reader: Box<dyn AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(
            tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let (input_tx, input_rx) = mpsc::channel(1024);
    let reader_task = tokio::spawn(read_inputs(BufReader::new(reader), envelope, input_tx));

    let (tx, rx) = output::channel();
    let sink = JsonLinesSink::new(tokio::io::stdout(), secondary_writer(errors_to).await?);
    let writer = tokio::spawn(sink.drain(rx));

    let mut pipeline = ProducerPipeline::new(config, broker, registry, tx);
    let status_logger = spawn_status_logger(pipeline.status());
    let result = pipeline.run(input_rx, shutdown_on_ctrl_c()).await;
    drop(pipeline);
    status_logger.abort();

    if let Some(read) = finish_reader(reader_task).await? {
        info!("Read {read} messages");
    }
    let stats = writer.await.context("Output writer task failed")??;
    info!(
        "Wrote {} primary and {} secondary artifacts",
        stats.primary, stats.secondary
    );
    result.context("Producer pipeline failed")
}

async fn secondary_writer(
    path: Option<PathBuf>,
) -> anyhow::Result<Box<dyn AsyncWrite + Unpin + Send>> {
    Ok(match path {
        Some(path) => Box::new(
            tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stderr()),
    })
}
