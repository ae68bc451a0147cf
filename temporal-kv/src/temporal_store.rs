//! The in-memory temporal value store.
//!
//! Services reads that fall in the unchunked tail: the window of time
//! between the last consolidated chunk and the current in-memory mirror.
//! Reset wholesale whenever the sink flushes, since the history it held
//! has moved into a chunk.

use std::collections::HashMap;

use crate::timestamp::AbsTimestamp;

/// A tombstone is recorded as `None`.
type Observation = (AbsTimestamp, Option<Vec<u8>>);

#[derive(Default)]
pub struct TemporalValueStore {
    timelines: HashMap<String, Vec<Observation>>,
    min_time: Option<AbsTimestamp>,
    max_time: Option<AbsTimestamp>,
}

impl TemporalValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a value (or, if `value` is `None`, a delete) for `key` at
    /// `ts`. Maintains sorted order by timestamp within the key's
    /// timeline.
    pub fn add_value(&mut self, key: &str, ts: AbsTimestamp, value: Option<Vec<u8>>) {
        let timeline = self.timelines.entry(key.to_string()).or_default();
        let pos = timeline.partition_point(|(existing_ts, _)| *existing_ts <= ts);
        timeline.insert(pos, (ts, value));

        self.min_time = Some(self.min_time.map_or(ts, |m| m.min(ts)));
        self.max_time = Some(self.max_time.map_or(ts, |m| m.max(ts)));
    }

    /// Returns the most recent recorded value for `key` with timestamp
    /// `<= ts`, or `None` if absent/deleted/never observed.
    pub fn query_value(&self, key: &str, ts: AbsTimestamp) -> Option<Vec<u8>> {
        let timeline = self.timelines.get(key)?;
        let pos = timeline.partition_point(|(existing_ts, _)| *existing_ts <= ts);
        if pos == 0 {
            return None;
        }
        timeline[pos - 1].1.clone()
    }

    /// Returns every key with a non-tombstone value at `ts`.
    pub fn query_all(&self, ts: AbsTimestamp) -> HashMap<String, Vec<u8>> {
        self.timelines
            .keys()
            .filter_map(|key| self.query_value(key, ts).map(|value| (key.clone(), value)))
            .collect()
    }

    /// The inclusive range of timestamps this store has observed, if any.
    pub fn time_range(&self) -> Option<(AbsTimestamp, AbsTimestamp)> {
        match (self.min_time, self.max_time) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    pub fn contains_timestamp(&self, ts: AbsTimestamp) -> bool {
        self.time_range()
            .is_some_and(|(min, max)| ts >= min && ts <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: i128) -> AbsTimestamp {
        AbsTimestamp::ZERO.checked_sub_nanos(-n).unwrap()
    }

    #[test]
    fn query_returns_most_recent_at_or_before() {
        let mut store = TemporalValueStore::new();
        store.add_value("k", ts(10), Some(b"a".to_vec()));
        store.add_value("k", ts(20), Some(b"b".to_vec()));

        assert_eq!(store.query_value("k", ts(5)), None);
        assert_eq!(store.query_value("k", ts(10)), Some(b"a".to_vec()));
        assert_eq!(store.query_value("k", ts(15)), Some(b"a".to_vec()));
        assert_eq!(store.query_value("k", ts(20)), Some(b"b".to_vec()));
    }

    #[test]
    fn tombstone_shadows_earlier_value() {
        let mut store = TemporalValueStore::new();
        store.add_value("k", ts(10), Some(b"a".to_vec()));
        store.add_value("k", ts(20), None);

        assert_eq!(store.query_value("k", ts(20)), None);
    }

    #[test]
    fn out_of_order_insertion_still_sorts() {
        let mut store = TemporalValueStore::new();
        store.add_value("k", ts(20), Some(b"b".to_vec()));
        store.add_value("k", ts(10), Some(b"a".to_vec()));

        assert_eq!(store.query_value("k", ts(10)), Some(b"a".to_vec()));
        assert_eq!(store.query_value("k", ts(20)), Some(b"b".to_vec()));
    }

    #[test]
    fn time_range_tracks_all_additions() {
        let mut store = TemporalValueStore::new();
        assert_eq!(store.time_range(), None);
        store.add_value("k", ts(10), Some(vec![]));
        store.add_value("other", ts(30), Some(vec![]));
        assert_eq!(store.time_range(), Some((ts(10), ts(30))));
    }
}
