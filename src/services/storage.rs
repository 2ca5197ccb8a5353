//! Gateway to the blob store holding staged images and published results.
//!
//! Staged images live at `temp/{prefix}/{filename}`, the published collage
//! at `{prefix}/result.jpg`. Keeping the result outside the staging prefix
//! means a finished job leaves nothing behind to be staged again.
#[expect(clippy::useless_attribute, reason = "This is from clippy::restricted")]
#[expect(
    clippy::std_instead_of_alloc,
    reason = "Alloc is not available outside of no_std"
)]
use std::sync::Arc;

use axum::body::Bytes;
use object_store::{path::Path, ObjectStore, PutPayload};
use tracing::debug;

use super::errors::StorageError;

/// Root under which callers stage images for a job.
const STAGING_ROOT: &str = "temp";
/// Filename of the published collage under the request prefix.
pub const RESULT_FILENAME: &str = "result.jpg";

/// The prefix holding the staged images of a request.
pub fn staging_prefix(prefix: &str) -> Path {
    Path::from_iter([STAGING_ROOT, prefix])
}

/// The key of one staged image.
pub fn staged_key(prefix: &str, filename: &str) -> Path {
    Path::from_iter([STAGING_ROOT, prefix, filename])
}

/// The well-known key a finished collage is published to.
pub fn result_key(prefix: &str) -> Path {
    Path::from_iter([prefix, RESULT_FILENAME])
}

/// A thin wrapper around the object store exposing the operations the
/// collage pipeline needs.
#[derive(Clone)]
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
}

impl BlobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// List the objects directly under `prefix`, sorted by key. Objects in
    /// nested "directories" are not included.
    pub async fn list(&self, prefix: &Path) -> Result<Vec<Path>, StorageError> {
        let listing = self.store.list_with_delimiter(Some(prefix)).await?;
        let mut keys: Vec<Path> = listing
            .objects
            .into_iter()
            .map(|meta| meta.location)
            .collect();
        keys.sort();
        debug!(%prefix, count = keys.len(), "listed objects");
        Ok(keys)
    }

    /// Download an object into a local file, overwriting it if present.
    pub async fn download(
        &self,
        key: &Path,
        destination: &std::path::Path,
    ) -> Result<(), StorageError> {
        let bytes = self.store.get(key).await?.bytes().await?;
        tokio::fs::write(destination, &bytes).await?;
        Ok(())
    }

    /// Upload a local file to `key`.
    pub async fn upload(&self, source: &std::path::Path, key: &Path) -> Result<(), StorageError> {
        let bytes = tokio::fs::read(source).await?;
        self.put(key, bytes).await
    }

    /// Store `bytes` at `key`. object_store upserts, so an existing object
    /// is replaced.
    pub async fn put(&self, key: &Path, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.store.put(key, PutPayload::from(bytes)).await?;
        Ok(())
    }

    /// Fetch an object, or `None` if it does not exist.
    pub async fn fetch(&self, key: &Path) -> Result<Option<Bytes>, StorageError> {
        match self.store.get(key).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete(&self, key: &Path) -> Result<(), StorageError> {
        self.store.delete(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn blob_store() -> BlobStore {
        BlobStore::new(Arc::new(InMemory::new()))
    }

    #[test]
    fn keys_are_laid_out_per_prefix() {
        assert_eq!(staging_prefix("demo").as_ref(), "temp/demo");
        assert_eq!(staged_key("demo", "a.jpg").as_ref(), "temp/demo/a.jpg");
        assert_eq!(result_key("demo").as_ref(), "demo/result.jpg");
    }

    #[tokio::test]
    async fn list_returns_direct_children_in_key_order() {
        let store = blob_store();
        for key in ["temp/demo/b.jpg", "temp/demo/a.jpg", "temp/demo/nested/c.jpg", "temp/demo2/d.jpg"] {
            store.put(&Path::from(key), vec![1, 2, 3]).await.unwrap();
        }
        let keys = store.list(&staging_prefix("demo")).await.unwrap();
        let keys: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
        assert_eq!(keys, ["temp/demo/a.jpg", "temp/demo/b.jpg"]);
    }

    #[tokio::test]
    async fn list_of_unknown_prefix_is_empty() {
        let keys = blob_store().list(&staging_prefix("nothing")).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn fetch_distinguishes_missing_objects() {
        let store = blob_store();
        let key = result_key("demo");
        assert!(store.fetch(&key).await.unwrap().is_none());
        store.put(&key, vec![7; 4]).await.unwrap();
        assert_eq!(store.fetch(&key).await.unwrap().unwrap().as_ref(), [7; 4]);
        store.delete(&key).await.unwrap();
        assert!(store.fetch(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn download_and_upload_move_bytes_through_local_files() {
        let store = blob_store();
        let dir = tempfile::tempdir().unwrap();
        let source = staged_key("demo", "a.jpg");
        store.put(&source, b"pixels".to_vec()).await.unwrap();

        let local = dir.path().join("a.jpg");
        store.download(&source, &local).await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"pixels");

        let target = result_key("demo");
        store.upload(&local, &target).await.unwrap();
        assert_eq!(store.fetch(&target).await.unwrap().unwrap().as_ref(), b"pixels");
    }

    #[tokio::test]
    async fn download_of_missing_object_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = blob_store()
            .download(&staged_key("demo", "gone.jpg"), &dir.path().join("gone.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectStore(_)));
    }
}
