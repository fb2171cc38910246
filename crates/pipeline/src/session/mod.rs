//! The session orchestrator.
//!
//! A [`Session`] owns the tasks for one selection and sequences the two
//! stages over them:
//!
//! - every settings change (and the initial start) spawns a compute run over
//!   all supported tasks, bounded by the session's concurrency;
//! - a single task can be written on request once it is writable;
//! - a batch write runs over every writable task once all computes have
//!   finished, after confirmation when it would overwrite originals.
//!
//! Stage failures never escape as errors here. They are recorded on the task
//! and counted in the reports; [`Error`](error::Error) is reserved for
//! requests the session refuses outright.

pub mod error;

use crate::compute::compute;
use crate::store::{ComputeEpoch, Summary, TaskStore};
use crate::task::{Task, build_tasks};
use crate::write::{Placement, WriteOutcome, write};
use self::error::{ErrorKind, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tinyimage_asyncutils::run_bounded;
use tinyimage_codec::CodecHandle;
use tinyimage_config::{OutputMode, Settings};
use tinyimage_storage::FsHandle;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Result of asking for one task to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Written(WriteOutcome),
    /// The write ran and failed; the message is also stored on the task.
    Failed(String),
    /// The task was not writable, so nothing happened.
    Skipped,
}

/// Tally of a batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// What a batch write is about to do, for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRequest {
    pub writable: usize,
    pub output_mode: OutputMode,
}

impl BatchRequest {
    /// Whether the batch would replace or delete original files.
    #[inline]
    pub fn is_destructive(&self) -> bool {
        self.output_mode == OutputMode::OverwriteOriginal
    }
}

/// A compute run in the background.
#[derive(Debug)]
pub struct ComputeRun {
    revision: u64,
    handle: JoinHandle<()>,
}

impl ComputeRun {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Wait for every task of this run to be computed or discarded.
    pub async fn wait(self) {
        if let Err(err) = self.handle.await {
            tracing::error!(revision = self.revision, error = %err, "Compute run aborted");
        }
    }
}

struct Inner {
    fs: FsHandle,
    codec: CodecHandle,
    store: TaskStore,
    /// Output names reserved by writes in flight.
    placement: Placement,
    concurrency: usize,
}

/// A batch of selected images and everything done to them.
///
/// Cheap to clone; clones share the same tasks.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Build the tasks for `paths`.
    ///
    /// Fails if nothing was selected, or nothing selected is a supported
    /// image. Compute does not start until [`start`](Self::start).
    pub fn new<P: Into<PathBuf>>(
        paths: impl IntoIterator<Item = P>,
        settings: Settings,
        fs: FsHandle,
        codec: CodecHandle,
        concurrency: usize,
    ) -> Result<Self> {
        let built = build_tasks(paths);
        if built.tasks.is_empty() {
            exn::bail!(ErrorKind::EmptySelection);
        }
        if built.supported_count == 0 {
            exn::bail!(ErrorKind::NoSupportedImages);
        }
        tracing::info!(
            total = built.tasks.len(),
            supported = built.supported_count,
            concurrency,
            "Created session"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                fs,
                codec,
                store: TaskStore::new(built.tasks, settings.normalized()),
                placement: Placement::default(),
                concurrency: concurrency.max(1),
            }),
        })
    }

    /// Compute every supported task under the initial settings.
    pub async fn start(&self) -> ComputeRun {
        let epoch = self.inner.store.begin_epoch().await;
        self.spawn_compute(epoch)
    }

    /// Replace the settings and recompute everything.
    ///
    /// Results of runs started under earlier settings are discarded as they
    /// arrive. Refused while any write is in flight.
    pub async fn apply_settings(&self, settings: Settings) -> Result<ComputeRun> {
        let epoch = self.inner.store.replace_settings(settings.normalized()).await?;
        Ok(self.spawn_compute(epoch))
    }

    fn spawn_compute(&self, epoch: ComputeEpoch) -> ComputeRun {
        let revision = epoch.revision;
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.compute_all(epoch).await });
        ComputeRun { revision, handle }
    }

    /// Write one task.
    ///
    /// A task that is not writable (not computed yet, or already being
    /// written) is [`Skipped`](ItemOutcome::Skipped) without side effects.
    #[instrument(skip(self))]
    pub async fn write_one(&self, id: &str) -> Result<ItemOutcome> {
        if self.inner.store.in_batch().await {
            exn::bail!(ErrorKind::BatchInProgress);
        }
        self.inner.write_task(id).await
    }

    /// Write every writable task.
    ///
    /// Refused unless every compute has finished and nothing is being
    /// written. When the batch would overwrite originals, `confirm` decides
    /// whether it goes ahead.
    #[instrument(skip_all)]
    pub async fn write_all(&self, confirm: impl FnOnce(&BatchRequest) -> bool) -> Result<BatchReport> {
        let store = &self.inner.store;
        let request = BatchRequest {
            writable: store.check_batch().await?,
            output_mode: store.settings().await.output_mode,
        };
        if request.is_destructive() && !confirm(&request) {
            tracing::info!(writable = request.writable, "Overwrite declined");
            exn::bail!(ErrorKind::Declined);
        }

        let ids = store.begin_batch().await?;
        tracing::info!(writable = ids.len(), "Starting batch write");
        let inner = &*self.inner;
        let outcomes = run_bounded(&ids, inner.concurrency, |id| async move {
            let outcome = inner.write_task(id).await;
            inner.store.advance_batch().await;
            outcome
        })
        .await;
        store.end_batch().await;

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(ItemOutcome::Written(_)) => report.succeeded += 1,
                Ok(ItemOutcome::Failed(_)) => report.failed += 1,
                Ok(ItemOutcome::Skipped) | Err(_) => report.skipped += 1,
            }
        }
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Finished batch write"
        );
        Ok(report)
    }

    /// All tasks, in selection order.
    pub async fn snapshot(&self) -> Vec<Task> {
        self.inner.store.snapshot().await
    }

    pub async fn task(&self, id: &str) -> Option<Task> {
        self.inner.store.get(id).await
    }

    pub async fn summary(&self) -> Summary {
        self.inner.store.summary().await
    }

    pub async fn settings(&self) -> Settings {
        self.inner.store.settings().await
    }

    pub async fn revision(&self) -> u64 {
        self.inner.store.revision().await
    }
}

impl Inner {
    #[instrument(skip_all, fields(revision = epoch.revision, tasks = epoch.ids.len()))]
    async fn compute_all(&self, epoch: ComputeEpoch) {
        let ComputeEpoch { revision, settings, ids } = &epoch;
        let applied = run_bounded(ids, self.concurrency, |id| async move {
            let Some(task) = self.store.begin_compute(id, *revision).await else {
                return false;
            };
            let result = compute(self.fs.as_ref(), self.codec.as_ref(), &task, settings).await;
            self.store.finish_compute(id, *revision, result).await
        })
        .await;
        self.store.finish_epoch(*revision).await;
        tracing::debug!(applied = applied.iter().filter(|applied| **applied).count(), "Compute run finished");
    }

    async fn write_task(&self, id: &str) -> Result<ItemOutcome> {
        let Some(claim) = self.store.begin_write(id).await? else {
            tracing::debug!(task = id, "Task is not writable; skipping");
            return Ok(ItemOutcome::Skipped);
        };
        let result = write(self.fs.as_ref(), &self.placement, &claim.task, &claim.settings).await;
        self.store.finish_write(id, claim.revision, &result).await;
        Ok(match result {
            Ok(outcome) => ItemOutcome::Written(outcome),
            Err(err) => {
                tracing::warn!(task = id, error = ?err, "Write failed");
                ItemOutcome::Failed((*err).to_string())
            },
        })
    }
}
