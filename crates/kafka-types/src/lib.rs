//! Shared types for schema-bridge.
//!
//! This crate holds the leaf pieces that every other crate in the workspace
//! depends on:
//!
//! - [`wire`] - the schema-tagged wire envelope (`[0x00][schema id][payload]`)
//! - [`message`] - raw records received from the broker and outbound
//!   messages handed to it
//! - [`error`] - error types for envelope parsing
//!
//! # Examples
//!
//! ```
//! use kafka_types::wire::{extract_schema_id, unwrap, wrap};
//!
//! let bytes = wrap(42, b"avro-bytes");
//! assert_eq!(extract_schema_id(&bytes), Some(42));
//!
//! let envelope = unwrap(&bytes).unwrap();
//! assert_eq!(envelope.schema_id, 42);
//! assert_eq!(envelope.payload, b"avro-bytes");
//! ```

pub mod error;
pub mod message;
pub mod wire;

// Re-export main types for convenient access
pub use error::{Result, WireError};
pub use message::{
    DeliveryReport, Headers, OutboundMessage, RawRecord, RecordMetadata, StartPosition,
};
pub use wire::{extract_schema_id, unwrap, wrap, Envelope, HEADER_LEN, MAGIC_BYTE};
