//! Schema registry client for schema-bridge.
//!
//! The pipelines in `schema-bridge-kafka` only talk to a registry through the
//! [`SchemaRegistryClient`] trait. This crate defines that contract and ships
//! one implementation, [`ConfluentRegistry`], which speaks the Confluent REST
//! API over HTTP and encodes records as Avro.
//!
//! # Features
//!
//! - Latest-id lookup, lookup by id, and registration of schema documents
//! - Avro encode/decode of JSON records, wrapped in the wire envelope
//! - Parsed schemas cached per id for the lifetime of the client
//! - Optional basic auth

pub mod avro;
pub mod client;
pub mod config;
pub mod confluent;
pub mod error;

pub use client::{SchemaHandle, SchemaRegistryClient, SchemaType};
pub use config::RegistryOpts;
pub use confluent::ConfluentRegistry;
pub use error::{RegistryError, Result};
