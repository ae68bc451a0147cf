//! End-to-end scenarios, run against a real filesystem store via
//! `tempfile` to exercise the on-disk format directly.

use std::sync::Arc;

use temporal_kv::chunk::cache::ChunkCache;
use temporal_kv::chunk::{self, Chunk, ChunkId};
use temporal_kv::event::{KVPair, KeyFrame};
use temporal_kv::map::{Map, MapConfig};
use temporal_kv::store::fs::FsStore;
use temporal_kv::store::BlobStore;
use temporal_kv::AbsTimestamp;

fn ts(n: i128) -> AbsTimestamp {
    AbsTimestamp::ZERO.checked_sub_nanos(-n).unwrap()
}

fn open_store() -> (tempfile::TempDir, Arc<dyn BlobStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn BlobStore> = Arc::new(FsStore::open(dir.path()).unwrap());
    (dir, store)
}

#[test]
fn scenario_1_empty_store() {
    let (_dir, store) = open_store();
    let map = Map::open(store, MapConfig::default()).unwrap();

    assert!(map.get_all(AbsTimestamp::now()).unwrap().is_empty());
    assert_eq!(map.get_min_time(), AbsTimestamp::ZERO);
}

#[test]
fn scenario_2_keyframe_only_chunk_survives_cache_clear_and_reload() {
    let (_dir, store) = open_store();

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
    let built = Chunk::finish(id, ts(0), keyframe, Vec::new()).unwrap();
    built.save(store.as_ref()).unwrap();

    // A fresh cache stands in for "clear chunk cache": nothing here has
    // touched the in-memory Chunk that built the blobs, only the blobs themselves.
    let header = chunk::load_header(store.as_ref(), id).unwrap();
    let reloaded = Chunk::load(store.as_ref(), header).unwrap();
    let _cache = ChunkCache::with_default_ttl();

    let state = reloaded.get_state_at(AbsTimestamp::now()).unwrap();
    assert_eq!(state.get("foo").unwrap(), b"bar");
    assert_eq!(state.get("bar").unwrap(), b"foo");
}

#[test]
fn scenario_3_write_read_round_trip_survives_restart() {
    let (_dir, store) = open_store();
    let t0 = ts(10);
    let t1 = ts(20);

    {
        let map = Map::open(Arc::clone(&store), MapConfig::default()).unwrap();
        map.set(t0, "foo", b"bar".to_vec()).unwrap();
        assert_eq!(map.get(t0, "foo").unwrap(), Some(b"bar".to_vec()));

        map.del(t1, "foo").unwrap();
        assert_eq!(map.get(t1, "foo").unwrap(), None);
    }

    let reopened = Map::open(Arc::clone(&store), MapConfig::default()).unwrap();
    assert_eq!(reopened.get(AbsTimestamp::now(), "foo").unwrap(), None);
}

#[test]
fn scenario_4_historical_read() {
    let (_dir, store) = open_store();
    let map = Map::open(store, MapConfig::default()).unwrap();

    let ta = ts(10);
    let tb = ts(20);
    let tc = ts(30);

    map.set(ta, "foo", b"bar".to_vec()).unwrap();
    map.set(tb, "bar", b"foo".to_vec()).unwrap();
    map.set(tc, "foo", b"foobar".to_vec()).unwrap();

    assert!(map.get_all(ts(9)).unwrap().is_empty());

    let at_b = map.get_all(tb).unwrap();
    assert_eq!(at_b.get("foo").unwrap(), b"bar");
    assert_eq!(at_b.get("bar").unwrap(), b"foo");

    let at_c = map.get_all(tc).unwrap();
    assert_eq!(at_c.get("foo").unwrap(), b"foobar");
    assert_eq!(at_c.get("bar").unwrap(), b"foo");
}

#[test]
fn scenario_6_flush_threshold_drives_consolidation() {
    let (_dir, store) = open_store();
    // A tiny target so a handful of writes trips consolidation.
    let map = Map::open(
        Arc::clone(&store),
        MapConfig {
            target_chunk_size: 16,
            ..Default::default()
        },
    )
    .unwrap();

    for i in 0..20 {
        map.set(ts(i), "k", vec![b'x'; 32]).unwrap();
    }

    // Some of those writes must have been consolidated into a chunk by now:
    // the index's min time has advanced off zero, and a chunk body landed
    // in the store.
    assert!(!map.get_min_time().is_zero());
    assert!(store
        .keys_with_prefix("")
        .unwrap()
        .iter()
        .any(|k| k.ends_with(".chunk")));
}

#[test]
fn scenario_7_monotonicity_rejection_has_no_side_effect() {
    let (_dir, store) = open_store();
    let map = Map::open(store, MapConfig::default()).unwrap();

    map.set(ts(10), "k", b"v".to_vec()).unwrap();
    let result = map.set(ts(9), "k", b"v2".to_vec());
    assert!(result.is_err());

    assert_eq!(map.get(ts(10), "k").unwrap(), Some(b"v".to_vec()));
}
