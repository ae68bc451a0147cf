//! The chunk format.
//!
//! A chunk is an immutable, time-bounded unit: a keyframe plus a
//! time-sorted stream of per-key diffs, capable of reconstructing state at
//! any timestamp in `[header.min, header.max]`.

pub mod cache;
pub mod id;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::diff::{Diff, DiffError};
use crate::event::{Event, KeyFrame};
use crate::identifier::{current_chunk_version, current_header_version};
use crate::store::{BlobStore, StoreError};
use crate::timestamp::AbsTimestamp;

pub use id::ChunkId;

/// One entry of the on-disk keyframe: a key referenced by index into the
/// chunk's `keys` vector, plus its value at the chunk's start timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedKVPair {
    pub key_index: u32,
    pub data: Vec<u8>,
}

/// The on-disk keyframe: an ordered sequence of [`IndexedKVPair`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedKeyFrame(pub Vec<IndexedKVPair>);

/// The on-disk per-key state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEvent {
    pub timestamp: AbsTimestamp,
    pub key_index: u32,
    pub diff: Diff,
}

/// The persisted chunk body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkData {
    pub id: ChunkId,
    pub timestamp: AbsTimestamp,
    pub keys: Vec<String>,
    pub indexed_key_frame: IndexedKeyFrame,
    pub diffs: Vec<DiffEvent>,
}

/// The small, separately-persisted catalog record describing a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub id: ChunkId,
    pub last_update: AbsTimestamp,
    pub min: AbsTimestamp,
    pub max: AbsTimestamp,
    pub prev_id: Option<ChunkId>,
    pub next_id: Option<ChunkId>,
}

/// An in-memory chunk: header, body, derived indices, and a lazily
/// populated per-diff materialization cache.
///
/// The `frames` cache is the one piece of interior mutability on an
/// otherwise-immutable value, guarded by a short-lived lock.
pub struct Chunk {
    pub header: ChunkHeader,
    pub data: ChunkData,
    key_to_index: std::collections::HashMap<String, u32>,
    frames: Mutex<Vec<Option<Vec<u8>>>>,
}

impl Chunk {
    /// Builds a fully populated chunk from a base keyframe and a batch of
    /// events, all with timestamps `>= start`.
    pub fn finish(
        id: ChunkId,
        start: AbsTimestamp,
        keyframe: KeyFrame,
        events: Vec<Event>,
    ) -> Result<Self, ChunkError> {
        let mut keys: Vec<String> = keyframe.0.iter().map(|pair| pair.key.clone()).collect();
        for event in &events {
            if !keys.contains(&event.key) {
                keys.push(event.key.clone());
            }
        }

        let key_to_index: std::collections::HashMap<String, u32> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i as u32))
            .collect();

        let max = events
            .iter()
            .map(|e| e.timestamp)
            .fold(start, std::cmp::max);

        let mut current: Vec<Vec<u8>> = vec![Vec::new(); keys.len()];
        for pair in &keyframe.0 {
            let idx = key_to_index[&pair.key] as usize;
            current[idx] = pair.data.clone();
        }

        let mut events_by_key: std::collections::HashMap<u32, Vec<&Event>> =
            std::collections::HashMap::new();
        for event in &events {
            let idx = key_to_index[&event.key];
            events_by_key.entry(idx).or_default().push(event);
        }

        let mut diffs = Vec::with_capacity(events.len());
        for (key_index, key_events) in events_by_key {
            for event in key_events {
                let idx = key_index as usize;
                if event.delete {
                    diffs.push(DiffEvent {
                        timestamp: event.timestamp,
                        key_index,
                        diff: Diff::empty(),
                    });
                    current[idx] = Vec::new();
                } else {
                    let generated = Diff::generate(&current[idx], &event.data)
                        .map_err(ChunkError::DiffGenerationFailed)?;
                    diffs.push(DiffEvent {
                        timestamp: event.timestamp,
                        key_index,
                        diff: generated,
                    });
                    current[idx] = event.data.clone();
                }
            }
        }

        diffs.sort_by(|a, b| (a.timestamp, a.key_index).cmp(&(b.timestamp, b.key_index)));

        let indexed_key_frame = IndexedKeyFrame(
            keyframe
                .0
                .iter()
                .map(|pair| IndexedKVPair {
                    key_index: key_to_index[&pair.key],
                    data: pair.data.clone(),
                })
                .collect(),
        );

        let frame_count = diffs.len();
        let data = ChunkData {
            id,
            timestamp: start,
            keys,
            indexed_key_frame,
            diffs,
        };

        let header = ChunkHeader {
            id,
            last_update: AbsTimestamp::now(),
            min: start,
            max,
            prev_id: None,
            next_id: None,
        };

        Ok(Chunk {
            header,
            data,
            key_to_index,
            frames: Mutex::new(vec![None; frame_count]),
        })
    }

    /// Reconstructs the full map state at `t`.
    ///
    /// Deleted keys (diffs that decode to the empty-bytes sentinel) are
    /// dropped from the returned state, matching the façade-level "absent"
    /// contract; see DESIGN.md for the delete-representation rationale.
    pub fn get_state_at(&self, t: AbsTimestamp) -> Result<BTreeMap<String, Vec<u8>>, ChunkError> {
        let mut state: Vec<Vec<u8>> = vec![Vec::new(); self.data.keys.len()];
        for pair in &self.data.indexed_key_frame.0 {
            state[pair.key_index as usize] = pair.data.clone();
        }

        let mut frames = self.frames.lock().expect("frames lock poisoned");

        for (i, d) in self.data.diffs.iter().enumerate() {
            if d.timestamp > t {
                break;
            }

            let idx = d.key_index as usize;
            let value = if d.diff.is_empty() {
                Vec::new()
            } else if let Some(memoized) = &frames[i] {
                memoized.clone()
            } else {
                let computed = d
                    .diff
                    .apply(&state[idx])
                    .map_err(ChunkError::DiffApplicationFailed)?;
                frames[i] = Some(computed.clone());
                computed
            };

            state[idx] = value;
        }
        drop(frames);

        let mut out = BTreeMap::new();
        for (key, idx) in &self.key_to_index {
            let value = &state[*idx as usize];
            if !value.is_empty() {
                out.insert(key.clone(), value.clone());
            }
        }
        Ok(out)
    }

    /// Reconstructs the value of a single key at `t`, or `None` if absent
    /// or deleted.
    pub fn get_value_at(&self, key: &str, t: AbsTimestamp) -> Result<Option<Vec<u8>>, ChunkError> {
        let Some(&idx) = self.key_to_index.get(key) else {
            return Ok(None);
        };

        let mut value = self
            .data
            .indexed_key_frame
            .0
            .iter()
            .find(|pair| pair.key_index == idx)
            .map(|pair| pair.data.clone())
            .unwrap_or_default();

        let mut frames = self.frames.lock().expect("frames lock poisoned");
        for (i, d) in self.data.diffs.iter().enumerate() {
            if d.key_index != idx {
                continue;
            }
            if d.timestamp > t {
                break;
            }
            value = if d.diff.is_empty() {
                Vec::new()
            } else if let Some(memoized) = &frames[i] {
                memoized.clone()
            } else {
                let computed = d
                    .diff
                    .apply(&value)
                    .map_err(ChunkError::DiffApplicationFailed)?;
                frames[i] = Some(computed.clone());
                computed
            };
        }

        Ok(if value.is_empty() { None } else { Some(value) })
    }

    /// Writes the header under `<id>.header` and the body under
    /// `<id>.chunk`. The two writes are not transactional: recovery
    /// tolerates either order of partial failure.
    pub fn save(&self, store: &dyn BlobStore) -> Result<(), ChunkError> {
        let header_bytes = codec::encode_versioned(&current_header_version(), &self.header)
            .map_err(ChunkError::Codec)?;
        store
            .write(&self.header.id.header_key(), &header_bytes)
            .map_err(ChunkError::Store)?;

        let data_bytes = codec::encode_versioned(&current_chunk_version(), &self.data)
            .map_err(ChunkError::Codec)?;
        store
            .write(&self.header.id.chunk_key(), &data_bytes)
            .map_err(ChunkError::Store)?;

        Ok(())
    }

    /// Loads a chunk body from the store and rebuilds its derived indices.
    pub fn load(store: &dyn BlobStore, header: ChunkHeader) -> Result<Self, ChunkError> {
        let bytes = store.read(&header.id.chunk_key()).map_err(ChunkError::Store)?;
        let data: ChunkData = codec::decode_versioned(&current_chunk_version(), bytes.as_slice())
            .map_err(ChunkError::Codec)?;

        let key_to_index = data
            .keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i as u32))
            .collect();

        let frame_count = data.diffs.len();
        Ok(Chunk {
            header,
            data,
            key_to_index,
            frames: Mutex::new(vec![None; frame_count]),
        })
    }
}

pub fn load_header(store: &dyn BlobStore, id: ChunkId) -> Result<ChunkHeader, ChunkError> {
    let bytes = store.read(&id.header_key()).map_err(ChunkError::Store)?;
    codec::decode_versioned(&current_header_version(), bytes.as_slice()).map_err(ChunkError::Codec)
}

#[derive(Debug)]
pub enum ChunkError {
    DiffGenerationFailed(DiffError),
    DiffApplicationFailed(DiffError),
    Codec(CodecError),
    Store(StoreError),
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiffGenerationFailed(err) => write!(f, "diff generation failed: {err}"),
            Self::DiffApplicationFailed(err) => write!(f, "diff application failed: {err}"),
            Self::Codec(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ChunkError {}

impl From<CodecError> for ChunkError {
    fn from(err: CodecError) -> Self {
        ChunkError::Codec(err)
    }
}

impl From<StoreError> for ChunkError {
    fn from(err: StoreError) -> Self {
        ChunkError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{KVPair, KeyFrame};
    use crate::store::memory::MemoryStore;

    fn ts(nanos_offset: i128) -> AbsTimestamp {
        AbsTimestamp::ZERO.checked_sub_nanos(-nanos_offset).unwrap()
    }

    #[test]
    fn keyframe_only_chunk_replays_to_its_own_state() {
        let keyframe = KeyFrame(vec![
            KVPair {
                key: "foo".into(),
                data: b"bar".to_vec(),
            },
            KVPair {
                key: "bar".into(),
                data: b"foo".to_vec(),
            },
        ]);
        let id = ChunkId::from_timestamp(ts(0));
        let chunk = Chunk::finish(id, ts(0), keyframe, Vec::new()).unwrap();

        let state = chunk.get_state_at(ts(100)).unwrap();
        assert_eq!(state.get("foo").unwrap(), b"bar");
        assert_eq!(state.get("bar").unwrap(), b"foo");
    }

    #[test]
    fn replaying_twice_reuses_memoized_frames() {
        let events = vec![Event::set(ts(10), "k", b"v1".to_vec())];
        let id = ChunkId::from_timestamp(ts(0));
        let chunk = Chunk::finish(id, ts(0), KeyFrame::new(), events).unwrap();

        let first = chunk.get_state_at(ts(20)).unwrap();
        let second = chunk.get_state_at(ts(20)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn delete_removes_key_from_state() {
        let events = vec![
            Event::set(ts(10), "k", b"v1".to_vec()),
            Event::del(ts(20), "k"),
        ];
        let id = ChunkId::from_timestamp(ts(0));
        let chunk = Chunk::finish(id, ts(0), KeyFrame::new(), events).unwrap();

        assert!(chunk.get_state_at(ts(10)).unwrap().contains_key("k"));
        assert!(chunk.get_state_at(ts(15)).unwrap().contains_key("k"));
        assert!(!chunk.get_state_at(ts(25)).unwrap().contains_key("k"));
    }

    #[test]
    fn save_and_load_round_trips() {
        let keyframe = KeyFrame(vec![KVPair {
            key: "foo".into(),
            data: b"bar".to_vec(),
        }]);
        let id = ChunkId::from_timestamp(ts(0));
        let chunk = Chunk::finish(id, ts(0), keyframe, Vec::new()).unwrap();

        let store = MemoryStore::new();
        chunk.save(&store).unwrap();

        let header = load_header(&store, id).unwrap();
        let reloaded = Chunk::load(&store, header).unwrap();
        let state = reloaded.get_state_at(ts(100)).unwrap();
        assert_eq!(state.get("foo").unwrap(), b"bar");
    }
}
