//! An in-memory blob store, mainly for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{BlobStore, StoreError, StreamWriter};

#[derive(Default)]
pub struct MemoryStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryStore {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .expect("memory store lock poisoned")
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .lock()
            .expect("memory store lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .expect("memory store lock poisoned")
            .remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .blobs
            .lock()
            .expect("memory store lock poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn begin_stream(&self, key: &str) -> Result<Box<dyn StreamWriter>, StoreError> {
        Ok(Box::new(MemoryStreamWriter {
            blobs: Arc::clone(&self.blobs),
            key: key.to_string(),
            buffer: Vec::new(),
        }))
    }
}

struct MemoryStreamWriter {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    key: String,
    buffer: Vec<u8>,
}

impl std::io::Write for MemoryStreamWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        let mut blobs = self.blobs.lock().expect("memory store lock poisoned");
        blobs
            .entry(self.key.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StreamWriter for MemoryStreamWriter {
    fn close(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
