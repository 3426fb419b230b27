//! schema-bridge library
//!
//! Glue between the pipelines in `schema-bridge-kafka` and the command line:
//! JSON-lines input for the producer, JSON-lines output for emitted
//! artifacts, and process-level concerns such as shutdown and status
//! logging.
//!
//! # CLI Usage
//!
//! ```bash
//! # Decode a topic to stdout, errors to a separate file
//! schema-bridge consume --topic orders --dual-output --errors-to errors.jsonl
//!
//! # Publish JSON lines from a file, registering the schema if needed
//! schema-bridge produce --topic orders --input orders.jsonl \
//!   --auto-register --default-schema-file order.avsc
//! ```

pub mod runtime;
pub mod sink;
pub mod source;

// Re-export the workspace crates for convenience
pub use kafka_types as types;
pub use schema_bridge_kafka as kafka;
pub use schema_bridge_registry as registry;
