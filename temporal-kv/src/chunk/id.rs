//! Chunk identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::timestamp::{AbsTimestamp, ParseTimestampError};

/// A chunk's identity, derived from its nominal start timestamp.
///
/// Two storage keys derive from it: `<id>.header` and `<id>.chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(AbsTimestamp);

impl ChunkId {
    pub fn from_timestamp(ts: AbsTimestamp) -> Self {
        ChunkId(ts)
    }

    pub fn timestamp(self) -> AbsTimestamp {
        self.0
    }

    pub fn parse(s: &str) -> Result<Self, ParseTimestampError> {
        AbsTimestamp::parse_chunk_id(s).map(ChunkId)
    }

    pub fn header_key(self) -> String {
        format!("{self}.header")
    }

    pub fn chunk_key(self) -> String {
        format!("{self}.chunk")
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format_chunk_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_have_expected_suffixes() {
        let id = ChunkId::from_timestamp(AbsTimestamp::now());
        assert!(id.header_key().ends_with(".header"));
        assert!(id.chunk_key().ends_with(".chunk"));
    }

    #[test]
    fn parse_round_trips_through_display() {
        let id = ChunkId::from_timestamp(AbsTimestamp::now());
        let parsed = ChunkId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
