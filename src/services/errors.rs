//! Shared errors used in multiple services.
use thiserror::Error;

/// Errors returned by the blob store or while moving blobs to and from the
/// local filesystem.
#[derive(Error, Debug)]
pub enum StorageError {
    /// An error returned by the object store.
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    /// The local side of a download or upload failed.
    #[error("Local file error during transfer: {0}")]
    LocalFile(#[from] std::io::Error),
}
