//! Per-request scratch directories on local disk.
//!
//! A job's staged images are downloaded to `{root}/{prefix}/source/` and its
//! encoded result is written to `{root}/{prefix}/result.jpg`. The directory
//! is owned by a [`ScratchDir`] which removes it on teardown, or on drop if
//! teardown never happened.
use std::path::{Path, PathBuf};

use futures::{StreamExt as _, TryStreamExt as _};
use tracing::{debug, info, warn};

use super::storage::{self, BlobStore, RESULT_FILENAME};

const SOURCE_DIR: &str = "source";

/// Creates scratch directories under a single root.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
    download_concurrency: usize,
}

/// The outcome of staging a prefix.
pub struct StagedWorkspace {
    pub scratch: ScratchDir,
    /// The blob keys that were staged, needed to delete them once published.
    pub keys: Vec<object_store::path::Path>,
    /// Local copies of the staged blobs, in key order.
    pub files: Vec<PathBuf>,
}

impl Workspace {
    pub fn new(root: PathBuf, download_concurrency: usize) -> Self {
        Self {
            root,
            download_concurrency: download_concurrency.max(1),
        }
    }

    /// The scratch directory used for `prefix`.
    pub fn scratch_path(&self, prefix: &str) -> PathBuf {
        self.root.join(prefix)
    }

    /// List and download every blob staged under `prefix`.
    ///
    /// Nothing is created locally when the prefix is empty. A scratch
    /// directory left behind by another job with the same prefix is never
    /// touched.
    pub async fn stage(
        &self,
        store: &BlobStore,
        prefix: &str,
    ) -> Result<StagedWorkspace, errors::WorkspaceError> {
        let keys = store.list(&storage::staging_prefix(prefix)).await?;
        if keys.is_empty() {
            return Err(errors::WorkspaceError::EmptyPrefix(prefix.to_owned()));
        }
        let scratch = self.create(prefix).await?;
        let files = match self.download_all(store, &keys, &scratch.source_dir()).await {
            Ok(files) => files,
            Err(err) => {
                scratch.teardown().await;
                return Err(err);
            }
        };
        info!(prefix, count = files.len(), "staged images");
        Ok(StagedWorkspace {
            scratch,
            keys,
            files,
        })
    }

    async fn create(&self, prefix: &str) -> Result<ScratchDir, errors::WorkspaceError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.scratch_path(prefix);
        if let Err(err) = tokio::fs::create_dir(&path).await {
            return Err(if err.kind() == std::io::ErrorKind::AlreadyExists {
                errors::WorkspaceError::Collision(path)
            } else {
                err.into()
            });
        }
        // From here on the directory is ours to remove.
        let scratch = ScratchDir::new(path);
        tokio::fs::create_dir(scratch.source_dir()).await?;
        Ok(scratch)
    }

    /// Download `keys` into `source_dir`, at most `download_concurrency` at a
    /// time. Each download owns its key, destination and store handle.
    async fn download_all(
        &self,
        store: &BlobStore,
        keys: &[object_store::path::Path],
        source_dir: &Path,
    ) -> Result<Vec<PathBuf>, errors::WorkspaceError> {
        let downloads = keys
            .iter()
            .map(|key| {
                let filename = key
                    .filename()
                    .ok_or_else(|| errors::WorkspaceError::UnnamedObject(key.to_string()))?;
                Ok((key.clone(), source_dir.join(filename)))
            })
            .collect::<Result<Vec<_>, errors::WorkspaceError>>()?;

        let mut files: Vec<PathBuf> = futures::stream::iter(downloads)
            .map(|(key, destination)| {
                let store = store.clone();
                async move {
                    store.download(&key, &destination).await?;
                    debug!(%key, "downloaded staged object");
                    Ok::<_, errors::WorkspaceError>(destination)
                }
            })
            .buffer_unordered(self.download_concurrency)
            .try_collect()
            .await?;
        files.sort();
        Ok(files)
    }
}

/// A scratch directory owned by one job.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    released: bool,
}

impl ScratchDir {
    const fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where staged images are downloaded to.
    pub fn source_dir(&self) -> PathBuf {
        self.path.join(SOURCE_DIR)
    }

    /// Where the encoded collage is written before upload.
    pub fn result_path(&self) -> PathBuf {
        self.path.join(RESULT_FILENAME)
    }

    /// Remove the directory and everything in it. Never fails, errors are
    /// logged.
    pub async fn teardown(mut self) {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "removed scratch directory"),
            Err(err) => warn!(
                path = %self.path.display(),
                "Failed to remove scratch directory: {err}"
            ),
        }
    }
}

/// Fallback for paths which never reach [`ScratchDir::teardown`], such as a
/// panic or an early return. The removal blocks the current thread.
impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            warn!(
                path = %self.path.display(),
                "Failed to remove scratch directory on drop: {err}"
            );
        }
    }
}

pub mod errors {
    use std::path::PathBuf;

    use thiserror::Error;

    pub use crate::services::errors::StorageError;

    #[derive(Debug, Error)]
    pub enum WorkspaceError {
        #[error("No staged images found under prefix {0:?}")]
        EmptyPrefix(String),
        #[error("Scratch directory {} already exists", .0.display())]
        Collision(PathBuf),
        #[error("Staged object {0} has no filename")]
        UnnamedObject(String),
        #[error(transparent)]
        Storage(#[from] StorageError),
        #[error("Failed to prepare scratch directory: {0}")]
        Io(#[from] std::io::Error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    async fn store_with(keys: &[&str]) -> BlobStore {
        let store = BlobStore::new(Arc::new(InMemory::new()));
        for key in keys {
            store
                .put(&object_store::path::Path::from(*key), key.as_bytes().to_vec())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn stage_downloads_every_object_under_the_prefix() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(root.path().to_path_buf(), 2);
        let store = store_with(&["temp/demo/b.jpg", "temp/demo/a.jpg", "temp/other/c.jpg"]).await;

        let staged = workspace.stage(&store, "demo").await.unwrap();
        let names: Vec<_> = staged
            .files
            .iter()
            .map(|file| file.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["a.jpg", "b.jpg"]);
        assert_eq!(staged.keys.len(), 2);
        assert_eq!(
            std::fs::read(&staged.files[0]).unwrap(),
            b"temp/demo/a.jpg"
        );
        assert!(staged.files.iter().all(|file| file.starts_with(staged.scratch.source_dir())));
    }

    #[tokio::test]
    async fn empty_prefix_creates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(root.path().to_path_buf(), 2);
        let store = store_with(&["temp/other/c.jpg"]).await;

        let err = workspace.stage(&store, "demo").await.err().unwrap();
        assert!(matches!(err, errors::WorkspaceError::EmptyPrefix(prefix) if prefix == "demo"));
        assert!(!workspace.scratch_path("demo").exists());
    }

    #[tokio::test]
    async fn existing_scratch_directory_is_a_collision() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(root.path().to_path_buf(), 2);
        let store = store_with(&["temp/demo/a.jpg"]).await;
        let occupied = workspace.scratch_path("demo");
        std::fs::create_dir_all(&occupied).unwrap();
        std::fs::write(occupied.join("keep.txt"), b"other job").unwrap();

        let err = workspace.stage(&store, "demo").await.err().unwrap();
        assert!(matches!(err, errors::WorkspaceError::Collision(_)));
        assert!(occupied.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn teardown_removes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(root.path().to_path_buf(), 2);
        let store = store_with(&["temp/demo/a.jpg"]).await;

        let staged = workspace.stage(&store, "demo").await.unwrap();
        assert!(staged.scratch.path().exists());
        staged.scratch.teardown().await;
        assert!(!workspace.scratch_path("demo").exists());
    }

    #[tokio::test]
    async fn dropping_the_scratch_dir_removes_it() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(root.path().to_path_buf(), 2);
        let store = store_with(&["temp/demo/a.jpg"]).await;

        let staged = workspace.stage(&store, "demo").await.unwrap();
        drop(staged);
        assert!(!workspace.scratch_path("demo").exists());
    }
}
