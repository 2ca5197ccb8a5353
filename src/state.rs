//! Defines the state shared across the Axum application.
#[expect(clippy::useless_attribute, reason = "This is from clippy::restricted")]
#[expect(
    clippy::std_instead_of_alloc,
    reason = "Alloc is not available outside of no_std"
)]
use std::sync::Arc;

use object_store::ObjectStore;

use crate::{
    config::Config,
    services::{
        collage::Collager,
        jobs::{JobQueue, JobRegistry},
        storage::BlobStore,
        tinify::{errors::TinifyError, TinifyClient},
    },
};

#[derive(Clone)]
/// The state struct shared across routers.
pub struct AppState {
    pub config: Arc<Config>,
    /// The blob store holding staged images and published collages.
    pub store: BlobStore,
    /// Used for the synchronous checks made before queueing a job.
    pub collager: Arc<Collager>,
    pub jobs: JobQueue,
    /// Absent when no Tinify token is configured.
    pub tinify: Option<TinifyClient>,
}

impl AppState {
    /// Build the state and start the collage workers. Must be called from
    /// within a tokio runtime.
    pub fn new(config: Config, object_store: Arc<dyn ObjectStore>) -> Result<Self, TinifyError> {
        let store = BlobStore::new(object_store);
        let collager = Arc::new(Collager::new(store.clone(), &config.collage));
        let jobs = JobQueue::start(
            collager.clone(),
            JobRegistry::new(config.collage.job_history),
            config.collage.workers,
            config.collage.queue_capacity,
        );
        let tinify = config.tinify.as_ref().map(TinifyClient::new).transpose()?;
        Ok(Self {
            config: Arc::new(config),
            store,
            collager,
            jobs,
            tinify,
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        self.jobs.registry()
    }
}
