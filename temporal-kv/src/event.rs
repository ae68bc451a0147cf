//! The write-side unit of work.

use serde::{Deserialize, Serialize};

use crate::timestamp::AbsTimestamp;

/// An immutable write event: a set or a delete at a point in time.
///
/// Produced by writers (`Map::set`/`Map::del`), consumed by the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: AbsTimestamp,
    pub key: String,
    pub data: Vec<u8>,
    pub delete: bool,
}

impl Event {
    pub fn set(timestamp: AbsTimestamp, key: impl Into<String>, data: Vec<u8>) -> Self {
        Event {
            timestamp,
            key: key.into(),
            data,
            delete: false,
        }
    }

    pub fn del(timestamp: AbsTimestamp, key: impl Into<String>) -> Self {
        Event {
            timestamp,
            key: key.into(),
            data: Vec::new(),
            delete: true,
        }
    }
}

/// One entry of a keyframe: `{key, data}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KVPair {
    pub key: String,
    pub data: Vec<u8>,
}

/// The full map state at a chunk's start timestamp, as an ordered sequence
/// of `KVPair`s. Order is insertion-deterministic (sorted by key) so two
/// runs over the same logical state produce byte-identical keyframes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFrame(pub Vec<KVPair>);

impl KeyFrame {
    pub fn new() -> Self {
        KeyFrame(Vec::new())
    }

    /// Builds a keyframe from a map, sorting by key for reproducibility.
    pub fn from_map(map: std::collections::BTreeMap<String, Vec<u8>>) -> Self {
        KeyFrame(
            map.into_iter()
                .map(|(key, data)| KVPair { key, data })
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|pair| pair.key == key)
            .map(|pair| pair.data.as_slice())
    }
}
