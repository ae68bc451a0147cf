//! The map façade.
//!
//! Coordinates writes into the sink and reads across the in-memory
//! mirror, the unchunked-tail temporal value store, and the chunk index.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::chunk::cache::ChunkCache;
use crate::codec::CodecError;
use crate::consolidate::{self, ConsolidationError};
use crate::estimator::CompressionEstimator;
use crate::event::Event;
use crate::index::{ChunkIndex, IndexError};
use crate::sink::{EventSink, SinkError};
use crate::store::{BlobStore, StoreError};
use crate::telemetry::{self, Metrics};
use crate::temporal_store::TemporalValueStore;
use crate::timestamp::AbsTimestamp;

/// Tunables for a [`Map`] instance: the soft size threshold at which a
/// sink flushes, and how old a chunk may get before retention evicts it.
pub struct MapConfig {
    pub target_chunk_size: u64,
    pub max_chunk_age_nanos: Option<i128>,
    pub cache: Option<Arc<ChunkCache>>,
    pub metrics: Option<Arc<dyn Metrics>>,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            target_chunk_size: 1 << 20,
            max_chunk_age_nanos: None,
            cache: None,
            metrics: None,
        }
    }
}

struct MapState {
    current: BTreeMap<String, Vec<u8>>,
    current_time: AbsTimestamp,
    temporal_store: TemporalValueStore,
}

/// A temporal key-value map over a single logical storage root.
///
/// Presents a single-writer/many-reader contract: `Set`/`Del`/`Get`/
/// `GetAll` all take the same internal lock.
pub struct Map {
    store: Arc<dyn BlobStore>,
    sink: EventSink,
    index: ChunkIndex,
    metrics: Arc<dyn Metrics>,
    target_chunk_size: u64,
    state: Mutex<MapState>,
}

impl Map {
    /// Opens (or creates) a map over `store`. Drains any event logs left
    /// over from a prior run that were flushed but never consolidated,
    /// then seeds the in-memory mirror and temporal value store from the
    /// index plus whatever events remain unconsolidated.
    pub fn open(store: Arc<dyn BlobStore>, config: MapConfig) -> Result<Self, MapError> {
        let metrics = config.metrics.unwrap_or_else(telemetry::nop);
        let cache = config
            .cache
            .unwrap_or_else(|| Arc::new(ChunkCache::with_default_ttl()));

        let index = ChunkIndex::open(
            Arc::clone(&store),
            cache,
            Arc::clone(&metrics),
            config.max_chunk_age_nanos,
        )?;
        let sink = EventSink::new(Arc::clone(&store), config.target_chunk_size);

        loop {
            match consolidate::process_old_sinks(
                store.as_ref(),
                &index,
                sink.estimator(),
                metrics.as_ref(),
                config.target_chunk_size,
            ) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(ConsolidationError::SinkTooSmall) => break,
                Err(err) => return Err(MapError::Consolidation(err)),
            }
        }

        let mut current_time = index.max_time();
        let mut current = index.get_state_at(AbsTimestamp::now())?;
        let mut temporal_store = TemporalValueStore::new();

        for (_, events) in consolidate::load_pending_events(store.as_ref())? {
            for event in events {
                current_time = current_time.max(event.timestamp);
                if event.delete {
                    current.remove(&event.key);
                    temporal_store.add_value(&event.key, event.timestamp, None);
                } else {
                    current.insert(event.key.clone(), event.data.clone());
                    temporal_store.add_value(&event.key, event.timestamp, Some(event.data));
                }
            }
        }

        info!(keys = current.len(), "map opened");

        Ok(Map {
            store,
            sink,
            index,
            metrics,
            target_chunk_size: config.target_chunk_size,
            state: Mutex::new(MapState {
                current,
                current_time,
                temporal_store,
            }),
        })
    }

    pub fn set(&self, ts: AbsTimestamp, key: &str, data: Vec<u8>) -> Result<(), MapError> {
        let mut state = self.state.lock().expect("map lock poisoned");
        self.check_monotonic(&state, ts)?;

        let event = Event::set(ts, key, data.clone());
        let flushed = self.sink.append(&event)?;

        state.current.insert(key.to_string(), data.clone());
        state.temporal_store.add_value(key, ts, Some(data));
        state.current_time = ts;

        if flushed {
            self.consolidate_locked(&mut state)?;
        }
        Ok(())
    }

    pub fn del(&self, ts: AbsTimestamp, key: &str) -> Result<(), MapError> {
        let mut state = self.state.lock().expect("map lock poisoned");
        self.check_monotonic(&state, ts)?;

        let event = Event::del(ts, key);
        let flushed = self.sink.append(&event)?;

        state.current.remove(key);
        state.temporal_store.add_value(key, ts, None);
        state.current_time = ts;

        if flushed {
            self.consolidate_locked(&mut state)?;
        }
        Ok(())
    }

    fn check_monotonic(&self, state: &MapState, ts: AbsTimestamp) -> Result<(), MapError> {
        let has_prior_write = !state.current.is_empty() || !state.current_time.is_zero();
        if has_prior_write && ts < state.current_time {
            return Err(MapError::MonotonicityViolation);
        }
        Ok(())
    }

    /// After a sink flush, runs consolidation and discards the temporal
    /// value store — its history has moved into a chunk.
    fn consolidate_locked(&self, state: &mut MapState) -> Result<(), MapError> {
        match consolidate::process_old_sinks(
            self.store.as_ref(),
            &self.index,
            self.sink.estimator(),
            self.metrics.as_ref(),
            self.target_chunk_size,
        ) {
            Ok(true) => {
                state.temporal_store = TemporalValueStore::new();
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(ConsolidationError::SinkTooSmall) => Ok(()),
            Err(err) => Err(MapError::Consolidation(err)),
        }
    }

    pub fn get(&self, ts: AbsTimestamp, key: &str) -> Result<Option<Vec<u8>>, MapError> {
        let state = self.state.lock().expect("map lock poisoned");

        if ts.is_zero() || ts >= state.current_time {
            return Ok(state.current.get(key).cloned());
        }
        if state.temporal_store.contains_timestamp(ts) {
            return Ok(state.temporal_store.query_value(key, ts));
        }
        Ok(self.index.get_value_at(key, ts)?)
    }

    pub fn get_all(&self, ts: AbsTimestamp) -> Result<BTreeMap<String, Vec<u8>>, MapError> {
        let state = self.state.lock().expect("map lock poisoned");

        if ts.is_zero() || ts >= state.current_time {
            return Ok(state.current.clone());
        }
        if state.temporal_store.contains_timestamp(ts) {
            return Ok(state.temporal_store.query_all(ts).into_iter().collect());
        }
        Ok(self.index.get_state_at(ts)?)
    }

    pub fn get_min_time(&self) -> AbsTimestamp {
        self.index.min_time()
    }

    pub fn get_max_time(&self) -> AbsTimestamp {
        self.state.lock().expect("map lock poisoned").current_time
    }

    pub fn get_min_max_time(&self) -> (AbsTimestamp, AbsTimestamp) {
        (self.get_min_time(), self.get_max_time())
    }
}

#[derive(Debug)]
pub enum MapError {
    MonotonicityViolation,
    Store(StoreError),
    Codec(CodecError),
    Sink(SinkError),
    Index(IndexError),
    Consolidation(ConsolidationError),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MonotonicityViolation => {
                write!(f, "write timestamp precedes the map's current high-water mark")
            }
            Self::Store(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "{err}"),
            Self::Sink(err) => write!(f, "{err}"),
            Self::Index(err) => write!(f, "{err}"),
            Self::Consolidation(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for MapError {}

impl From<StoreError> for MapError {
    fn from(err: StoreError) -> Self {
        MapError::Store(err)
    }
}

impl From<IndexError> for MapError {
    fn from(err: IndexError) -> Self {
        MapError::Index(err)
    }
}

impl From<SinkError> for MapError {
    fn from(err: SinkError) -> Self {
        MapError::Sink(err)
    }
}

impl From<ConsolidationError> for MapError {
    fn from(err: ConsolidationError) -> Self {
        MapError::Consolidation(err)
    }
}
