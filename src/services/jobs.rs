//! Background execution of collage jobs.
//!
//! Jobs are pushed onto a bounded queue and drained by a fixed pool of
//! worker tasks. Callers get no handle on the job: progress and failures
//! are only visible through the status registry, keyed by prefix.
#[expect(clippy::useless_attribute, reason = "This is from clippy::restricted")]
#[expect(
    clippy::std_instead_of_alloc,
    reason = "Alloc is not available outside of no_std"
)]
use std::sync::Arc;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info};

use super::collage::{CollageRequest, Collager};

/// Where a job is in its life cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Staging,
    Sequencing,
    /// Rendering row `row` (1-based) of `rows`.
    Compositing { row: usize, rows: usize },
    Encoding,
    Publishing,
    CleaningUp,
    Done {
        result_key: String,
        width: u32,
        height: u32,
        /// Staged objects left behind because their deletion failed.
        orphaned: Vec<String>,
    },
    Failed { error: String },
}

impl JobState {
    /// Whether the job has finished, successfully or not.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }
}

/// The latest known state of a job and when it was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    #[serde(flatten)]
    pub state: JobState,
    /// RFC 3339 timestamp of the last transition.
    pub updated_at: String,
}

/// Latest job status per prefix. A new job for a prefix replaces the
/// previous entry.
///
/// At most `capacity` prefixes are remembered. When a new prefix arrives at
/// capacity, the least recently updated finished job is forgotten, or the
/// least recently updated job of any kind if none has finished.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Mutex<Entries>>,
}

struct Entries {
    capacity: usize,
    /// Monotonic counter ordering updates.
    clock: u64,
    jobs: HashMap<String, Entry>,
}

struct Entry {
    status: JobStatus,
    touched: u64,
}

impl Entries {
    fn evict_one(&mut self) {
        let finished = self
            .jobs
            .iter()
            .filter(|(_, entry)| entry.status.state.is_terminal())
            .min_by_key(|(_, entry)| entry.touched);
        let victim = finished
            .or_else(|| self.jobs.iter().min_by_key(|(_, entry)| entry.touched))
            .map(|(prefix, _)| prefix.clone());
        if let Some(prefix) = victim {
            debug!(%prefix, "forgetting job status");
            self.jobs.remove(&prefix);
        }
    }
}

impl JobRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Entries {
                capacity: capacity.max(1),
                clock: 0,
                jobs: HashMap::new(),
            })),
        }
    }

    pub fn get(&self, prefix: &str) -> Option<JobStatus> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .get(prefix)
            .map(|entry| entry.status.clone())
    }

    pub fn set(&self, prefix: &str, state: JobState) {
        let status = JobStatus {
            state,
            updated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.jobs.contains_key(prefix) && entries.jobs.len() >= entries.capacity {
            entries.evict_one();
        }
        entries.clock = entries.clock.saturating_add(1);
        let touched = entries.clock;
        entries
            .jobs
            .insert(prefix.to_owned(), Entry { status, touched });
    }

    /// A handle which reports state transitions for one prefix.
    pub fn handle(&self, prefix: &str) -> JobHandle {
        JobHandle {
            registry: self.clone(),
            prefix: prefix.to_owned(),
        }
    }
}

/// Reports the progress of a single job.
#[derive(Clone)]
pub struct JobHandle {
    registry: JobRegistry,
    prefix: String,
}

impl JobHandle {
    pub fn set(&self, state: JobState) {
        self.registry.set(&self.prefix, state);
    }
}

/// A queued unit of work.
pub struct CollageJob {
    pub request: CollageRequest,
    pub handle: JobHandle,
}

/// The sending side of the job queue.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<CollageJob>,
    registry: JobRegistry,
}

impl JobQueue {
    /// Create the queue and spawn `workers` tasks draining it. Must be
    /// called from within a tokio runtime.
    pub fn start(
        collager: Arc<Collager>,
        registry: JobRegistry,
        workers: usize,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        spawn_workers(collager, receiver, workers);
        Self { sender, registry }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Queue a job without waiting. The job is marked as queued only once a
    /// slot has been reserved for it.
    pub fn try_enqueue(&self, request: CollageRequest) -> Result<(), errors::QueueError> {
        let permit = self.sender.try_reserve().map_err(|err| match err {
            mpsc::error::TrySendError::Full(()) => errors::QueueError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => errors::QueueError::Closed,
        })?;
        let handle = self.registry.handle(&request.prefix);
        handle.set(JobState::Queued);
        info!(prefix = %request.prefix, "queued collage job");
        permit.send(CollageJob { request, handle });
        Ok(())
    }
}

fn spawn_workers(collager: Arc<Collager>, receiver: mpsc::Receiver<CollageJob>, workers: usize) {
    let receiver = Arc::new(AsyncMutex::new(receiver));
    for _ in 0..workers.max(1) {
        let collager = collager.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut guard = receiver.lock().await;
                    guard.recv().await
                };
                let Some(job) = job else { break };
                run_job(&collager, job).await;
            }
        });
    }
}

async fn run_job(collager: &Collager, job: CollageJob) {
    let CollageJob { request, handle } = job;
    match collager.run(&request, &handle).await {
        Ok(published) => {
            info!(
                prefix = %request.prefix,
                result_key = %published.result_key,
                orphaned = published.orphaned.len(),
                "collage job finished"
            );
            handle.set(JobState::Done {
                result_key: published.result_key,
                width: published.width,
                height: published.height,
                orphaned: published.orphaned,
            });
        }
        Err(err) => {
            error!(prefix = %request.prefix, "collage job failed: {err}");
            handle.set(JobState::Failed {
                error: err.to_string(),
            });
        }
    }
}

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum QueueError {
        #[error("The collage queue is full, try again later")]
        QueueFull,
        #[error("The collage queue has shut down")]
        Closed,
    }
}
