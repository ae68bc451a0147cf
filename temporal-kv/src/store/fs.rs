//! A filesystem-backed blob store.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{BlobStore, StoreError, StreamWriter};

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FsStore { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for FsStore {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        fs::read(self.path_for(key)).map_err(StoreError::from)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::from(err)),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let search_root = self.path_for(prefix);
        let walk_root = if search_root.is_dir() {
            search_root
        } else {
            search_root
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone())
        };

        if !walk_root.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&walk_root)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .expect("walked entry is under the store root");
            let key = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn begin_stream(&self, key: &str) -> Result<Box<dyn StreamWriter>, StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Box::new(FsStreamWriter { file }))
    }
}

struct FsStreamWriter {
    file: File,
}

impl Write for FsStreamWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl StreamWriter for FsStreamWriter {
    fn close(mut self: Box<Self>) -> Result<(), StoreError> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.write("a.chunk", b"hello").unwrap();
        assert_eq!(store.read("a.chunk").unwrap(), b"hello");
    }

    #[test]
    fn keys_with_prefix_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.write("events/1.events", b"x").unwrap();
        store.write("events/2.events", b"y").unwrap();
        store.write("start.idx", b"z").unwrap();

        let mut keys = store.keys_with_prefix("events/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["events/1.events", "events/2.events"]);
    }

    #[test]
    fn stream_writer_appends_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let mut stream = store.begin_stream("events/a.events").unwrap();
        stream.write_all(b"abc").unwrap();
        stream.close().unwrap();

        let mut stream = store.begin_stream("events/a.events").unwrap();
        stream.write_all(b"def").unwrap();
        stream.close().unwrap();

        assert_eq!(store.read("events/a.events").unwrap(), b"abcdef");
    }

    #[test]
    fn delete_of_missing_key_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.delete("missing").is_ok());
    }
}
