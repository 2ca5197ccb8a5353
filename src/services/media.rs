//! Staging of uploaded images under a request prefix.
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use super::storage::{self, BlobStore};

/// Prefixes and filenames become path segments both in the blob store and
/// on local disk, so they are restricted to a conservative character set.
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("Name regex invalid")
});

/// Whether `name` can safely be used as a prefix or staged filename.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageFileType {
    Png,
    Jpg,
    Gif,
}

impl ImageFileType {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, ..] => Some(Self::Png),
            [0xff, 0xd8, 0xff, ..] => Some(Self::Jpg),
            [0x47, 0x49, 0x46, 0x38, 0x37 | 0x39, 0x61, ..] => Some(Self::Gif),
            _ => None,
        }
    }
}

/// Store an uploaded image as `temp/{prefix}/{filename}`, replacing any
/// image already staged under that name. Returns the key written.
pub async fn stage_image(
    store: &BlobStore,
    prefix: &str,
    filename: &str,
    image: Vec<u8>,
) -> Result<String, errors::StoreImageError> {
    if !is_valid_name(prefix) {
        return Err(errors::StoreImageError::InvalidPrefix);
    }
    if !is_valid_name(filename) {
        return Err(errors::StoreImageError::InvalidFileName);
    }
    let file_type =
        ImageFileType::from_bytes(&image).ok_or(errors::StoreImageError::InvalidFileType)?;
    let key = storage::staged_key(prefix, filename);
    store.put(&key, image).await?;
    info!(%key, ?file_type, "staged image");
    Ok(key.to_string())
}

pub mod errors {
    use thiserror::Error;

    pub use crate::services::errors::StorageError;

    #[derive(Debug, Error)]
    pub enum StoreImageError {
        #[error("Image is of invalid file type")]
        InvalidFileType,
        #[error("Image file name is not allowed")]
        InvalidFileName,
        #[error("Prefix is not allowed")]
        InvalidPrefix,
        #[error(transparent)]
        StorageError(#[from] StorageError),
    }
}
