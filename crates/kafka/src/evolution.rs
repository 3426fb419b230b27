//! Tracks every distinct schema id seen on a topic.

use chrono::{DateTime, Utc};
use schema_bridge_registry::{SchemaHandle, SchemaRegistryClient};
use std::collections::HashMap;
use tracing::{debug, warn};

/// First sighting and occurrence count for one schema id.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolutionRecord {
    pub schema_id: u32,
    pub first_seen_at: DateTime<Utc>,
    pub occurrence_count: u64,
    /// Fetched on first sighting; `None` until a fetch succeeds
    pub schema: Option<SchemaHandle>,
    first_seen_seq: u64,
    last_seen_seq: u64,
}

/// Outcome of a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The id had not been seen (or had been evicted).
    New,
    /// The id was already tracked; carries the updated count.
    Seen(u64),
}

/// Bounded map of observed schema ids.
///
/// When full, the id observed least recently is evicted. An evicted id that
/// shows up again is treated as new.
pub struct EvolutionTracker {
    records: HashMap<u32, EvolutionRecord>,
    capacity: usize,
    seq: u64,
}

impl EvolutionTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            capacity: capacity.max(1),
            seq: 0,
        }
    }

    /// Record one occurrence of `schema_id`.
    ///
    /// Registry failures while fetching the schema are logged and never
    /// affect the caller; the fetch is retried on the next occurrence.
    pub async fn observe<R>(&mut self, schema_id: u32, registry: &R) -> Observation
    where
        R: SchemaRegistryClient + ?Sized,
    {
        self.seq += 1;
        let seq = self.seq;

        if let Some(record) = self.records.get_mut(&schema_id) {
            record.occurrence_count += 1;
            record.last_seen_seq = seq;
            let count = record.occurrence_count;
            if record.schema.is_none() {
                record.schema = fetch(schema_id, registry).await;
            }
            return Observation::Seen(count);
        }

        if self.records.len() >= self.capacity {
            self.evict_least_recent();
        }

        warn!("Schema evolution detected: new schema id {schema_id} observed");
        let schema = fetch(schema_id, registry).await;
        self.records.insert(
            schema_id,
            EvolutionRecord {
                schema_id,
                first_seen_at: Utc::now(),
                occurrence_count: 1,
                schema,
                first_seen_seq: seq,
                last_seen_seq: seq,
            },
        );
        Observation::New
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .records
            .values()
            .min_by_key(|r| r.last_seen_seq)
            .map(|r| r.schema_id);
        if let Some(id) = oldest {
            debug!("Evicting schema id {id} from evolution tracker");
            self.records.remove(&id);
        }
    }

    pub fn get(&self, schema_id: u32) -> Option<&EvolutionRecord> {
        self.records.get(&schema_id)
    }

    /// Tracked records in first-seen order.
    pub fn records(&self) -> Vec<&EvolutionRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by_key(|r| r.first_seen_seq);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

async fn fetch<R>(schema_id: u32, registry: &R) -> Option<SchemaHandle>
where
    R: SchemaRegistryClient + ?Sized,
{
    match registry.schema_by_id(schema_id).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Failed to fetch schema {schema_id} for evolution tracking: {e}");
            None
        }
    }
}
