//! The blob storage interface.
//!
//! Key-addressed CRUD, prefix listing, and append streams over whatever
//! durable store backs a map: in-memory, local filesystem, or an object
//! store.

pub mod fs;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::fmt;
use std::io;

/// Key-addressed blob CRUD plus prefix listing and an append-stream
/// writer, the external collaborator every other module talks to.
pub trait BlobStore: Send + Sync {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    /// Deleting an already-absent key is not an error: retention
    /// eviction is best-effort and idempotent.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    fn begin_stream(&self, key: &str) -> Result<Box<dyn StreamWriter>, StoreError>;
}

/// An append-capable writer scoped to a single stream; `close` must be
/// called on every write path before the next stream begins.
pub trait StreamWriter: io::Write + Send {
    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    NotFound(String),
    IoFailure(io::Error),
    Cancelled,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "key not found: {key}"),
            Self::IoFailure(err) => write!(f, "storage i/o failure: {err}"),
            Self::Cancelled => write!(f, "storage operation cancelled"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(err.to_string())
        } else {
            StoreError::IoFailure(err)
        }
    }
}
