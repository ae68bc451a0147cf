//! The chunk index.
//!
//! A sorted, doubly-linked catalog of chunk headers supporting O(log N)
//! point-in-time lookup, written so that startup can reconstruct the full
//! index by following `prev`/`next` pointers from `start.idx` without
//! listing every object.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::chunk::cache::ChunkCache;
use crate::chunk::{self, Chunk, ChunkError, ChunkHeader, ChunkId};
use crate::store::{BlobStore, StoreError};
use crate::telemetry::Metrics;
use crate::timestamp::{AbsTimestamp, ParseTimestampError};

const START_IDX_KEY: &str = "start.idx";

pub struct ChunkIndex {
    store: Arc<dyn BlobStore>,
    cache: Arc<ChunkCache>,
    metrics: Arc<dyn Metrics>,
    max_chunk_age_nanos: Option<i128>,
    inner: Mutex<IndexState>,
}

struct IndexState {
    headers: Vec<ChunkHeader>,
    min_time: AbsTimestamp,
    max_time: AbsTimestamp,
}

impl ChunkIndex {
    /// Reconstructs the index by reading `start.idx` and walking the
    /// `next` pointer chain. An absent `start.idx` means an empty store,
    /// not an error.
    pub fn open(
        store: Arc<dyn BlobStore>,
        cache: Arc<ChunkCache>,
        metrics: Arc<dyn Metrics>,
        max_chunk_age_nanos: Option<i128>,
    ) -> Result<Self, IndexError> {
        let headers = match store.read(START_IDX_KEY) {
            Ok(bytes) => {
                let text = String::from_utf8(bytes).map_err(|_| IndexError::CorruptStartIdx)?;
                let min_time = AbsTimestamp::parse_chunk_id(text.trim())
                    .map_err(IndexError::MalformedTimestamp)?;

                let mut headers = Vec::new();
                let mut next = Some(ChunkId::from_timestamp(min_time));
                while let Some(id) = next {
                    let header = chunk::load_header(store.as_ref(), id)?;
                    next = header.next_id;
                    headers.push(header);
                }
                headers
            }
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(err) => return Err(IndexError::Store(err)),
        };

        let (min_time, max_time) = min_max(&headers);
        debug!(count = headers.len(), "chunk index loaded");

        Ok(ChunkIndex {
            store,
            cache,
            metrics,
            max_chunk_age_nanos,
            inner: Mutex::new(IndexState {
                headers,
                min_time,
                max_time,
            }),
        })
    }

    /// Appends `header`, evicts anything past retention, re-stitches
    /// `prev`/`next` pointers, and recomputes `min_time`/`max_time`.
    ///
    /// Retention evicts *every* header whose `max` falls below the
    /// retention cutoff in a single pass, then re-stitches once (see
    /// DESIGN.md for why this crate prefers an all-at-once sweep).
    pub fn update_index(&self, header: ChunkHeader) -> Result<(), IndexError> {
        let mut state = self.inner.lock().expect("index lock poisoned");
        let was_empty = state.headers.is_empty();

        state.headers.retain(|h| h.id != header.id);
        state.headers.push(header);
        state.headers.sort_by_key(|h| h.min);

        let (_, max_time_after_insert) = min_max(&state.headers);
        if let Some(max_age) = self.max_chunk_age_nanos {
            if let Some(cutoff) = max_time_after_insert.checked_sub_nanos(max_age) {
                let (keep, evict): (Vec<_>, Vec<_>) =
                    state.headers.drain(..).partition(|h| h.max >= cutoff);
                state.headers = keep;
                for evicted in evict {
                    self.evict(&evicted);
                }
            }
        }

        for i in 0..state.headers.len() {
            let prev_id = if i > 0 {
                Some(state.headers[i - 1].id)
            } else {
                None
            };
            let next_id = if i + 1 < state.headers.len() {
                Some(state.headers[i + 1].id)
            } else {
                None
            };

            if state.headers[i].prev_id != prev_id || state.headers[i].next_id != next_id {
                state.headers[i].prev_id = prev_id;
                state.headers[i].next_id = next_id;
                self.rewrite_header(&state.headers[i])?;
            }
        }

        let (min_time, max_time) = min_max(&state.headers);
        state.min_time = min_time;
        state.max_time = max_time;

        if was_empty && !state.headers.is_empty() {
            self.store
                .write(START_IDX_KEY, min_time.format_chunk_id().as_bytes())
                .map_err(IndexError::Store)?;
        }

        self.metrics
            .record_gauge("chunk_index.header_count", state.headers.len() as f64);
        Ok(())
    }

    fn rewrite_header(&self, header: &ChunkHeader) -> Result<(), IndexError> {
        let bytes = crate::codec::encode_versioned(
            &crate::identifier::current_header_version(),
            header,
        )
        .map_err(IndexError::Codec)?;
        self.store
            .write(&header.id.header_key(), &bytes)
            .map_err(IndexError::Store)
    }

    fn evict(&self, header: &ChunkHeader) {
        if let Err(err) = self.store.delete(&header.id.header_key()) {
            warn!(chunk_id = %header.id, error = %err, "failed to delete evicted header blob");
        }
        if let Err(err) = self.store.delete(&header.id.chunk_key()) {
            warn!(chunk_id = %header.id, error = %err, "failed to delete evicted chunk blob");
        }
        self.metrics.record_count("chunk_index.evicted", 1);
    }

    /// Finds the header covering `t`, extrapolating to the nearest end
    /// of the index when `t` falls outside every header's range.
    pub fn find_header_responsible_for(&self, t: AbsTimestamp) -> Option<ChunkHeader> {
        let state = self.inner.lock().expect("index lock poisoned");
        let headers = &state.headers;
        if headers.is_empty() {
            return None;
        }
        if t <= headers[0].min {
            return Some(headers[0].clone());
        }
        if t > headers[headers.len() - 1].min {
            return Some(headers[headers.len() - 1].clone());
        }

        let pos = headers.partition_point(|h| h.min <= t);
        Some(headers[pos - 1].clone())
    }

    pub fn get_state_at(&self, t: AbsTimestamp) -> Result<BTreeMap<String, Vec<u8>>, IndexError> {
        if t < self.min_time() {
            return Ok(BTreeMap::new());
        }
        let Some(header) = self.find_header_responsible_for(t) else {
            return Ok(BTreeMap::new());
        };
        let chunk = self.load_chunk(header)?;
        Ok(chunk.get_state_at(t)?)
    }

    pub fn get_value_at(&self, key: &str, t: AbsTimestamp) -> Result<Option<Vec<u8>>, IndexError> {
        if t < self.min_time() {
            return Ok(None);
        }
        let Some(header) = self.find_header_responsible_for(t) else {
            return Ok(None);
        };
        let chunk = self.load_chunk(header)?;
        Ok(chunk.get_value_at(key, t)?)
    }

    fn load_chunk(&self, header: ChunkHeader) -> Result<Arc<Chunk>, IndexError> {
        let id = header.id;
        if let Some(chunk) = self.cache.get(id) {
            return Ok(chunk);
        }

        match Chunk::load(self.store.as_ref(), header) {
            Ok(chunk) => {
                let chunk = Arc::new(chunk);
                self.cache.insert(chunk.header.id, Arc::clone(&chunk));
                Ok(chunk)
            }
            Err(err) => {
                warn!(chunk_id = %id, error = %err, "chunk load failed");
                self.cache.insert_negative(id);
                Err(IndexError::Chunk(err))
            }
        }
    }

    pub fn min_time(&self) -> AbsTimestamp {
        self.inner.lock().expect("index lock poisoned").min_time
    }

    pub fn max_time(&self) -> AbsTimestamp {
        self.inner.lock().expect("index lock poisoned").max_time
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("index lock poisoned").headers.is_empty()
    }
}

fn min_max(headers: &[ChunkHeader]) -> (AbsTimestamp, AbsTimestamp) {
    match headers.first() {
        None => (AbsTimestamp::ZERO, AbsTimestamp::ZERO),
        Some(first) => {
            let max = headers.iter().map(|h| h.max).max().unwrap_or(first.max);
            (first.min, max)
        }
    }
}

#[derive(Debug)]
pub enum IndexError {
    Store(StoreError),
    Codec(crate::codec::CodecError),
    Chunk(ChunkError),
    CorruptStartIdx,
    MalformedTimestamp(ParseTimestampError),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "{err}"),
            Self::Chunk(err) => write!(f, "{err}"),
            Self::CorruptStartIdx => write!(f, "start.idx is not valid utf-8"),
            Self::MalformedTimestamp(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        IndexError::Store(err)
    }
}

impl From<ChunkError> for IndexError {
    fn from(err: ChunkError) -> Self {
        IndexError::Chunk(err)
    }
}
