//! Consolidation: turns pending event logs into a chunk.
//!
//! Reads every event log file, builds a new chunk, appends it to the
//! index, and deletes the processed event files — all-or-nothing per
//! invocation.

use std::fmt;

use tracing::{debug, info};

use crate::chunk::{Chunk, ChunkError, ChunkId};
use crate::codec::CodecError;
use crate::estimator::CompressionEstimator;
use crate::event::{Event, KVPair, KeyFrame};
use crate::index::{ChunkIndex, IndexError};
use crate::store::{BlobStore, StoreError};
use crate::telemetry::Metrics;

const EVENTS_PREFIX: &str = "events/";

/// Reads and merges every event log under `events/`, and returns `None`
/// if there is nothing to consolidate.
pub fn load_pending_events(store: &dyn BlobStore) -> Result<Vec<(String, Vec<Event>)>, ConsolidationError> {
    let keys = store
        .keys_with_prefix(EVENTS_PREFIX)
        .map_err(ConsolidationError::Store)?;

    let mut files = Vec::with_capacity(keys.len());
    for key in keys {
        let bytes = store.read(&key).map_err(ConsolidationError::Store)?;
        let events = decode_event_stream(&bytes)?;
        files.push((key, events));
    }
    Ok(files)
}

fn decode_event_stream(bytes: &[u8]) -> Result<Vec<Event>, ConsolidationError> {
    let mut events = Vec::new();
    let mut offset = 0;
    while offset + 4 <= bytes.len() {
        let len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;
        if offset + len > bytes.len() {
            // A truncated trailing record from a cancelled write; recovery
            // tolerates this by stopping at the last complete record.
            break;
        }
        let event: Event =
            postcard::from_bytes(&bytes[offset..offset + len]).map_err(ConsolidationError::Decoding)?;
        events.push(event);
        offset += len;
    }
    Ok(events)
}

/// Runs one consolidation attempt. Returns `Ok(true)` if a chunk was
/// produced and promoted, `Ok(false)` if there was nothing to do or the
/// merged events were estimated too small (`SinkTooSmall`, event files
/// left in place), and propagates any other failure.
pub fn process_old_sinks(
    store: &dyn BlobStore,
    index: &ChunkIndex,
    estimator: &CompressionEstimator,
    metrics: &dyn Metrics,
    target_chunk_size: u64,
) -> Result<bool, ConsolidationError> {
    let files = load_pending_events(store)?;
    let mut all_events: Vec<Event> = files.iter().flat_map(|(_, events)| events.clone()).collect();
    if all_events.is_empty() {
        return Ok(false);
    }

    all_events.sort_by(|a, b| (a.timestamp, a.key.clone()).cmp(&(b.timestamp, b.key.clone())));

    let initial_ts = all_events[0].timestamp;
    let (keyframe_group, diff_events): (Vec<Event>, Vec<Event>) =
        all_events.into_iter().partition(|e| e.timestamp == initial_ts);

    let mut keyframe_state = std::collections::BTreeMap::new();
    for event in &keyframe_group {
        if event.delete {
            keyframe_state.remove(&event.key);
        } else {
            keyframe_state.insert(event.key.clone(), event.data.clone());
        }
    }
    let keyframe = KeyFrame(
        keyframe_state
            .into_iter()
            .map(|(key, data)| KVPair { key, data })
            .collect(),
    );

    let id = ChunkId::from_timestamp(initial_ts);
    let chunk = Chunk::finish(id, initial_ts, keyframe, diff_events).map_err(ConsolidationError::Chunk)?;

    let encoded = crate::codec::encode_versioned(&crate::identifier::current_chunk_version(), &chunk.data)
        .map_err(ConsolidationError::Codec)?;
    let estimated_size = encoded.len() as u64;

    if (estimated_size as f64) < 0.9 * target_chunk_size as f64 {
        debug!(estimated_size, target_chunk_size, "consolidation produced an undersized chunk");
        estimator.on_flush(estimated_size, false);
        return Err(ConsolidationError::SinkTooSmall);
    }

    chunk.save(store).map_err(ConsolidationError::Chunk)?;
    index.update_index(chunk.header.clone())?;

    for (key, _) in &files {
        if let Err(err) = store.delete(key) {
            tracing::warn!(key = %key, error = %err, "failed to delete consolidated event file");
        }
    }

    estimator.on_flush(estimated_size, true);
    metrics.record_count("consolidation.succeeded", 1);
    info!(chunk_id = %chunk.header.id, files = files.len(), "consolidated event logs into a chunk");

    Ok(true)
}

#[derive(Debug)]
pub enum ConsolidationError {
    Store(StoreError),
    Decoding(postcard::Error),
    Codec(CodecError),
    Chunk(ChunkError),
    Index(IndexError),
    SinkTooSmall,
}

impl fmt::Display for ConsolidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Decoding(err) => write!(f, "failed to decode event record: {err}"),
            Self::Codec(err) => write!(f, "{err}"),
            Self::Chunk(err) => write!(f, "{err}"),
            Self::Index(err) => write!(f, "{err}"),
            Self::SinkTooSmall => write!(f, "consolidation produced a chunk below the target size"),
        }
    }
}

impl std::error::Error for ConsolidationError {}

impl From<IndexError> for ConsolidationError {
    fn from(err: IndexError) -> Self {
        ConsolidationError::Index(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::cache::ChunkCache;
    use crate::store::memory::MemoryStore;
    use crate::telemetry::nop;
    use crate::timestamp::AbsTimestamp;
    use std::io::Write as _;
    use std::sync::Arc;

    fn ts(n: i128) -> AbsTimestamp {
        AbsTimestamp::ZERO.checked_sub_nanos(-n).unwrap()
    }

    fn write_event_file(store: &dyn BlobStore, key: &str, events: &[Event]) {
        let mut stream = store.begin_stream(key).unwrap();
        for event in events {
            let encoded = postcard::to_allocvec(event).unwrap();
            stream.write_all(&(encoded.len() as u32).to_be_bytes()).unwrap();
            stream.write_all(&encoded).unwrap();
        }
        stream.close().unwrap();
    }

    #[test]
    fn no_pending_events_is_a_noop() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let index = ChunkIndex::open(Arc::clone(&store), Arc::new(ChunkCache::with_default_ttl()), nop(), None).unwrap();
        let estimator = CompressionEstimator::new(1000);
        let result = process_old_sinks(store.as_ref(), &index, &estimator, &crate::telemetry::NopMetrics, 1000).unwrap();
        assert!(!result);
    }

    #[test]
    fn sink_too_small_leaves_events_in_place() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let index = ChunkIndex::open(Arc::clone(&store), Arc::new(ChunkCache::with_default_ttl()), nop(), None).unwrap();
        let estimator = CompressionEstimator::new(1_000_000_000);

        write_event_file(
            store.as_ref(),
            "events/a.events",
            &[Event::set(ts(0), "k", b"v".to_vec())],
        );

        let result = process_old_sinks(store.as_ref(), &index, &estimator, &crate::telemetry::NopMetrics, 1_000_000_000);
        assert!(matches!(result, Err(ConsolidationError::SinkTooSmall)));
        assert_eq!(store.keys_with_prefix("events/").unwrap().len(), 1);
    }

    #[test]
    fn successful_consolidation_clears_event_files() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let index = ChunkIndex::open(Arc::clone(&store), Arc::new(ChunkCache::with_default_ttl()), nop(), None).unwrap();
        let estimator = CompressionEstimator::new(1);

        write_event_file(
            store.as_ref(),
            "events/a.events",
            &[
                Event::set(ts(0), "foo", b"bar".to_vec()),
                Event::set(ts(10), "bar", b"foo".to_vec()),
            ],
        );

        let result = process_old_sinks(store.as_ref(), &index, &estimator, &crate::telemetry::NopMetrics, 1).unwrap();
        assert!(result);
        assert_eq!(store.keys_with_prefix("events/").unwrap().len(), 0);
        assert!(!index.is_empty());
    }
}
