//! S3-compatible storage settings.
#[expect(clippy::useless_attribute, reason = "This is from clippy::restricted")]
#[expect(
    clippy::std_instead_of_alloc,
    reason = "Alloc is not available outside of no_std"
)]
use std::sync::Arc;

use object_store::{aws::AmazonS3Builder, ObjectStore};

use super::secrets::Secret;

/// Connection settings for the S3-compatible store holding staged images and
/// published results.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// The hostname where the S3-compatible storage service can be accessed.
    pub host: String,
    /// The port where the S3-compatible storage service can be accessed.
    pub port: u16,
    /// The bucket holding staged images and results.
    pub bucket: String,
    pub region: String,
    /// The access key (user) to authenticate to the store with.
    pub access_key: Secret,
    /// The secret key (password) to authenticate to the store with.
    pub secret_key: Secret,
}

impl S3Config {
    /// The plain HTTP endpoint of the store.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Build the object store client for this configuration.
    pub fn build_store(&self) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
        let store = AmazonS3Builder::new()
            .with_endpoint(self.endpoint())
            .with_allow_http(true)
            .with_region(&self.region)
            .with_bucket_name(&self.bucket)
            .with_access_key_id(self.access_key.expose())
            .with_secret_access_key(self.secret_key.expose())
            .build()?;
        Ok(Arc::new(store))
    }
}
