//! The event log (sink).
//!
//! A write-ahead log of length-prefixed events, rotated into a new
//! `events/<timestamp>.events` file whenever the compression estimator
//! predicts the accumulated events would yield a chunk near the target
//! size.

use std::fmt;
use std::io::Write as _;
use std::sync::Mutex;

use crate::estimator::CompressionEstimator;
use crate::event::Event;
use crate::store::{BlobStore, StoreError, StreamWriter};
use crate::timestamp::AbsTimestamp;

pub struct EventSink {
    store: std::sync::Arc<dyn BlobStore>,
    estimator: CompressionEstimator,
    current: Mutex<Option<CurrentStream>>,
}

struct CurrentStream {
    key: String,
    writer: Box<dyn StreamWriter>,
}

impl EventSink {
    pub fn new(store: std::sync::Arc<dyn BlobStore>, target_chunk_size: u64) -> Self {
        EventSink {
            store,
            estimator: CompressionEstimator::new(target_chunk_size),
            current: Mutex::new(None),
        }
    }

    /// Encodes `event`, writes its length-prefixed record to the current
    /// stream (opening one if needed), and updates the estimator. Returns
    /// whether this append tripped the flush threshold, in which case the
    /// caller (the `Map` façade) should reset its per-key temporal store
    /// and trigger consolidation.
    pub fn append(&self, event: &Event) -> Result<bool, SinkError> {
        let encoded = postcard::to_allocvec(event).map_err(SinkError::EncodingFailure)?;
        let len = u32::try_from(encoded.len()).map_err(|_| SinkError::RecordTooLarge)?;

        let mut current = self.current.lock().expect("sink lock poisoned");
        if current.is_none() {
            let key = format!("events/{}.events", event.timestamp);
            let writer = self.store.begin_stream(&key).map_err(SinkError::Store)?;
            *current = Some(CurrentStream { key, writer });
        }

        let stream = current.as_mut().expect("just ensured a stream is open");
        stream
            .writer
            .write_all(&len.to_be_bytes())
            .map_err(SinkError::Io)?;
        stream.writer.write_all(&encoded).map_err(SinkError::Io)?;
        drop(current);

        self.estimator.update((4 + encoded.len()) as u64);

        if self.estimator.should_try_flush() {
            self.flush()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Closes the current stream, if any, so the next `append` opens a
    /// fresh event file. Does not itself build a chunk — that is
    /// consolidation's job (`crate::consolidate`).
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut current = self.current.lock().expect("sink lock poisoned");
        if let Some(stream) = current.take() {
            stream.writer.close().map_err(SinkError::Store)?;
        }
        Ok(())
    }

    pub fn estimator(&self) -> &CompressionEstimator {
        &self.estimator
    }
}

#[derive(Debug)]
pub enum SinkError {
    EncodingFailure(postcard::Error),
    RecordTooLarge,
    Io(std::io::Error),
    Store(StoreError),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodingFailure(err) => write!(f, "failed to encode event: {err}"),
            Self::RecordTooLarge => write!(f, "encoded event exceeds u32::MAX bytes"),
            Self::Io(err) => write!(f, "sink i/o failure: {err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SinkError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn append_writes_length_prefixed_record() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let sink = EventSink::new(Arc::clone(&store), 1_000_000);
        let event = Event::set(AbsTimestamp::now(), "k", b"v".to_vec());
        sink.append(&event).unwrap();
        sink.flush().unwrap();

        let keys = store.keys_with_prefix("events/").unwrap();
        assert_eq!(keys.len(), 1);
        let bytes = store.read(&keys[0]).unwrap();
        let len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - 4);
    }

    #[test]
    fn append_trips_flush_threshold() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let sink = EventSink::new(Arc::clone(&store), 8);
        let event = Event::set(AbsTimestamp::now(), "k", b"0123456789".to_vec());
        let flushed = sink.append(&event).unwrap();
        assert!(flushed);
    }
}
