//! A temporal key-value map: a durable, chunked, point-in-time history
//! over opaque byte values.
//!
//! Accepts monotonically-timestamped set/delete events and answers
//! "what was the map (or one key) at time T" across the full write
//! history. Recent writes are served from an in-memory mirror and a
//! per-key temporal value store; older writes are consolidated into
//! immutable, time-bounded chunks (a keyframe plus sorted per-key binary
//! diffs) catalogued by a doubly-linked, time-sorted index.
//!
//! The module layout mirrors the write/read pipeline, leaves first:
//! [`diff`] and [`codec`] are the encoding primitives; [`event`] is the
//! write-side unit; [`chunk`] is the immutable storage format;
//! [`estimator`] and [`sink`] form the write-ahead event log;
//! [`consolidate`] turns logs into chunks; [`index`] catalogues chunks;
//! [`temporal_store`] services the unchunked tail; [`map`] is the public
//! façade.

pub mod chunk;
pub mod codec;
pub mod consolidate;
pub mod diff;
pub mod estimator;
pub mod event;
pub mod identifier;
pub mod index;
pub mod map;
pub mod sink;
pub mod store;
pub mod telemetry;
pub mod temporal_store;
pub mod timestamp;

pub use map::{Map, MapConfig, MapError};
pub use timestamp::AbsTimestamp;
