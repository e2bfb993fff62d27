//! Disk-backed `ObjectStorePort` adapter. Binaries are content-addressed by
//! the caller-supplied `storage_key` and written one file per key under a
//! base directory; a real deployment would swap this for an S3/GCS
//! adapter, but the worker and lifecycle manager only ever see the port.

use async_trait::async_trait;
use ragcore_core::error::ErrorCode;
use ragcore_core::ports::{ObjectStorePort, PortError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Keys are opaque to the store but must not escape the base directory;
/// this is the same "no `..`, no absolute paths" discipline the WAL's
/// path handling assumes of its caller.
fn sanitize_key(key: &str) -> Result<&str, PortError> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') {
        return Err(PortError::new(
            ErrorCode::Internal,
            format!("refusing unsafe object store key: {key}"),
        ));
    }
    Ok(key)
}

pub struct LocalObjectStore {
    base_dir: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    fn io_error(err: std::io::Error) -> PortError {
        if err.kind() == std::io::ErrorKind::NotFound {
            PortError::new(ErrorCode::NotFound, err.to_string())
        } else {
            PortError::unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl ObjectStorePort for LocalObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PortError> {
        let key = sanitize_key(key)?;
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(Self::io_error)?;
        }
        // Write to a sibling temp file first so a concurrent `get` never
        // observes a partially-written object (same crash-safety idiom the
        // WAL uses for its own writes, applied to whole-file replace).
        let tmp_path = tmp_path_for(&path);
        {
            let mut tmp = fs::File::create(&tmp_path).await.map_err(Self::io_error)?;
            tmp.write_all(bytes).await.map_err(Self::io_error)?;
            tmp.sync_all().await.map_err(Self::io_error)?;
        }
        fs::rename(&tmp_path, &path).await.map_err(Self::io_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, PortError> {
        let key = sanitize_key(key)?;
        fs::read(self.path_for(key)).await.map_err(Self::io_error)
    }

    async fn delete(&self, key: &str) -> Result<(), PortError> {
        let key = sanitize_key(key)?;
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(e)),
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_bytes_through_a_put_get_cycle() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store.put("docs/a", b"hello").await.unwrap();
        let read = store.get("docs/a").await.unwrap();

        assert_eq!(read, b"hello");
    }

    #[tokio::test]
    async fn get_of_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let err = store.get("nope").await.unwrap_err();

        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store.put("x", b"data").await.unwrap();
        store.delete("x").await.unwrap();
        store.delete("x").await.unwrap();

        let err = store.get("x").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn rejects_path_traversal_keys() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let err = store.put("../escape", b"x").await.unwrap_err();

        assert_eq!(err.code, ErrorCode::Internal);
    }

    #[tokio::test]
    async fn overwrite_never_leaves_a_partial_file_visible() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store.put("k", b"first").await.unwrap();
        store.put("k", b"second-longer-value").await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), b"second-longer-value");
    }
}
