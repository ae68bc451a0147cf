//! An object-store-backed blob store, feature-gated behind `s3`.
//!
//! Built on `object_store` rather than a vendor SDK directly, so the core
//! never depends on a specific cloud provider's client library.

use std::sync::Arc;

use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use super::{BlobStore, StoreError, StreamWriter};

pub struct S3Store {
    store: Arc<AmazonS3>,
    runtime: tokio::runtime::Runtime,
}

impl S3Store {
    pub fn open(bucket: &str, region: &str) -> Result<Self, StoreError> {
        let store = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(region)
            .build()
            .map_err(object_store_error)?;
        let runtime = tokio::runtime::Runtime::new().map_err(StoreError::IoFailure)?;
        Ok(S3Store {
            store: Arc::new(store),
            runtime,
        })
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

impl BlobStore for S3Store {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = ObjectPath::from(key);
        let payload = object_store::PutPayload::from(data.to_vec());
        self.block_on(self.store.put(&path, payload))
            .map_err(object_store_error)?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = ObjectPath::from(key);
        let result = self
            .block_on(self.store.get(&path))
            .map_err(object_store_error)?;
        let bytes = self
            .block_on(result.bytes())
            .map_err(object_store_error)?;
        Ok(bytes.to_vec())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = ObjectPath::from(key);
        match self.block_on(self.store.delete(&path)) {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(object_store_error(err)),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let path = ObjectPath::from(prefix);
        let entries: Vec<_> = self.block_on(async {
            self.store
                .list(Some(&path))
                .collect::<Vec<_>>()
                .await
        });

        entries
            .into_iter()
            .map(|entry| entry.map(|meta| meta.location.to_string()).map_err(object_store_error))
            .collect()
    }

    fn begin_stream(&self, key: &str) -> Result<Box<dyn StreamWriter>, StoreError> {
        Ok(Box::new(S3StreamWriter {
            store: Arc::clone(&self.store),
            handle: self.runtime.handle().clone(),
            path: ObjectPath::from(key),
            buffer: Vec::new(),
        }))
    }
}

struct S3StreamWriter {
    store: Arc<AmazonS3>,
    handle: tokio::runtime::Handle,
    path: ObjectPath,
    buffer: Vec<u8>,
}

impl std::io::Write for S3StreamWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StreamWriter for S3StreamWriter {
    fn close(self: Box<Self>) -> Result<(), StoreError> {
        let payload = object_store::PutPayload::from(self.buffer);
        self.handle
            .block_on(self.store.put(&self.path, payload))
            .map_err(object_store_error)?;
        Ok(())
    }
}

fn object_store_error(err: object_store::Error) -> StoreError {
    match err {
        object_store::Error::NotFound { path, .. } => StoreError::NotFound(path),
        other => StoreError::IoFailure(std::io::Error::other(other.to_string())),
    }
}
