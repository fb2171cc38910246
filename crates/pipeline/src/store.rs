//! The session's task store.
//!
//! Single authority over every [`Task`] and the settings revision. Workers
//! never mutate tasks directly: they report results here, and each
//! transition is checked against the revision the work was started under.
//! A result computed for an older revision is dropped rather than applied.

use crate::compute::Computed;
use crate::session::error::{ErrorKind, Result};
use crate::task::{ComputeState, Task, TaskId, WriteState};
use crate::write::WriteOutcome;
use std::sync::Arc;
use tinyimage_config::Settings;
use tokio::sync::RwLock;

/// Progress of the running batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: usize,
    pub done: usize,
}

/// Counts for progress display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub supported: usize,
    /// Supported tasks whose compute is `Ready` or `Failed`.
    pub precompute_done: usize,
    pub writable: usize,
    pub writing: usize,
    pub written: usize,
    pub failed: usize,
    pub computing: bool,
    pub batch: Option<BatchProgress>,
}

impl Summary {
    /// Every supported task has finished computing.
    #[inline]
    pub fn all_computed(&self) -> bool {
        self.precompute_done == self.supported
    }
}

/// Everything a compute run needs, captured at the moment it was started.
#[derive(Debug, Clone)]
pub struct ComputeEpoch {
    pub revision: u64,
    pub settings: Settings,
    pub ids: Vec<TaskId>,
}

/// A task claimed for writing.
#[derive(Debug, Clone)]
pub struct WriteClaim {
    /// The task as it was before it was marked `Writing`.
    pub task: Task,
    pub settings: Settings,
    pub revision: u64,
}

struct State {
    tasks: Vec<Task>,
    revision: u64,
    settings: Settings,
    computing: bool,
    batch: Option<BatchProgress>,
}

impl State {
    fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == id)
    }

    fn any_writing(&self) -> bool {
        self.tasks.iter().any(|task| task.write == WriteState::Writing)
    }

    fn epoch(&mut self) -> ComputeEpoch {
        let ids: Vec<TaskId> = self.tasks.iter().filter(|task| task.is_supported()).map(|task| task.id.clone()).collect();
        self.computing = !ids.is_empty();
        ComputeEpoch {
            revision: self.revision,
            settings: self.settings,
            ids,
        }
    }

    fn writable_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().filter(|task| task.is_writable()).map(|task| task.id.clone()).collect()
    }

    /// Batch preconditions, in the order they are reported.
    fn batch_candidates(&self) -> Result<Vec<TaskId>> {
        if self.computing || !self.tasks.iter().all(Task::is_compute_terminal) {
            exn::bail!(ErrorKind::ComputeInProgress);
        }
        if self.batch.is_some() {
            exn::bail!(ErrorKind::BatchInProgress);
        }
        if self.any_writing() {
            exn::bail!(ErrorKind::WriteInProgress);
        }
        let ids = self.writable_ids();
        if ids.is_empty() {
            exn::bail!(ErrorKind::NothingToWrite);
        }
        Ok(ids)
    }
}

pub struct TaskStore {
    state: RwLock<State>,
}

impl TaskStore {
    pub fn new(tasks: Vec<Task>, settings: Settings) -> Self {
        Self {
            state: RwLock::new(State {
                tasks,
                revision: 0,
                settings,
                computing: false,
                batch: None,
            }),
        }
    }

    pub async fn revision(&self) -> u64 {
        self.state.read().await.revision
    }

    pub async fn settings(&self) -> Settings {
        self.state.read().await.settings
    }

    /// Start computing under the current revision.
    pub async fn begin_epoch(&self) -> ComputeEpoch {
        self.state.write().await.epoch()
    }

    /// Replace the settings, bump the revision and reset every task.
    ///
    /// Refused while any write is running: an in-flight write is never
    /// interrupted and must not have its settings changed underneath it.
    pub async fn replace_settings(&self, settings: Settings) -> Result<ComputeEpoch> {
        let mut state = self.state.write().await;
        if state.batch.is_some() || state.any_writing() {
            exn::bail!(ErrorKind::WriteInProgress);
        }
        state.revision += 1;
        state.settings = settings;
        let revision = state.revision;
        for task in &mut state.tasks {
            task.reset_for_revision(revision);
        }
        tracing::info!(revision, "Settings changed");
        Ok(state.epoch())
    }

    /// Mark a pending task as computing. Returns the task to compute, or
    /// `None` if the revision moved on or the task is not pending.
    pub async fn begin_compute(&self, id: &str, revision: u64) -> Option<Task> {
        let mut state = self.state.write().await;
        if state.revision != revision {
            tracing::debug!(task = id, revision, "Skipping compute for outdated revision");
            return None;
        }
        let task = state.task_mut(id)?;
        if task.compute != ComputeState::Pending {
            return None;
        }
        task.compute = ComputeState::Computing;
        task.settings_revision = revision;
        Some(task.clone())
    }

    /// Apply a compute result. Returns `false` if it was stale and dropped.
    pub async fn finish_compute(&self, id: &str, revision: u64, result: crate::error::Result<Computed>) -> bool {
        let mut state = self.state.write().await;
        let current = state.revision;
        let Some(task) = state.task_mut(id).filter(|task| current == revision && task.settings_revision == revision)
        else {
            tracing::warn!(task = id, revision, current, "Discarding stale compute result");
            return false;
        };
        if task.compute != ComputeState::Computing {
            tracing::warn!(task = id, revision, "Discarding compute result for a task that is not computing");
            return false;
        }
        match result {
            Ok(computed) => {
                tracing::debug!(task = id, bytes = computed.output.data.len(), "Precomputed");
                task.source_size_bytes = Some(computed.source_size_bytes);
                task.compute = ComputeState::Ready {
                    output: Some(Arc::new(computed.output)),
                };
            },
            Err(err) => {
                tracing::debug!(task = id, error = ?err, "Precompute failed");
                task.compute = ComputeState::Failed {
                    message: (*err).to_string(),
                };
            },
        }
        true
    }

    /// Clear the computing flag, unless a newer run has taken over.
    pub async fn finish_epoch(&self, revision: u64) {
        let mut state = self.state.write().await;
        if state.revision == revision {
            state.computing = false;
        }
    }

    /// Claim a writable task, marking it `Writing`.
    ///
    /// `Ok(None)` means the task exists but cannot be written right now. The
    /// store is left untouched in that case.
    pub async fn begin_write(&self, id: &str) -> Result<Option<WriteClaim>> {
        let mut state = self.state.write().await;
        let (revision, settings) = (state.revision, state.settings);
        let Some(task) = state.task_mut(id) else {
            exn::bail!(ErrorKind::UnknownTask(id.to_string()));
        };
        if !task.is_writable() {
            return Ok(None);
        }
        let claim = WriteClaim {
            task: task.clone(),
            settings,
            revision,
        };
        task.write = WriteState::Writing;
        Ok(Some(claim))
    }

    /// Apply a write result.
    pub async fn finish_write(&self, id: &str, revision: u64, result: &crate::error::Result<WriteOutcome>) -> bool {
        let mut state = self.state.write().await;
        let current = state.revision;
        let Some(task) = state.task_mut(id) else {
            return false;
        };
        if current != revision || task.write != WriteState::Writing {
            tracing::warn!(task = id, revision, current, "Discarding stale write result");
            return false;
        }
        match result {
            Ok(outcome) => {
                if outcome.next_current_source != task.current_source_path {
                    task.relocate(outcome.next_current_source.clone());
                }
                task.write = WriteState::Written;
                task.written_output_path = Some(outcome.output_path.clone());
                task.last_known_output_bytes = Some(outcome.output_bytes);
                task.compute = ComputeState::Ready { output: None };
            },
            Err(err) => {
                let pending_deletion = err.partial_output().map(ToOwned::to_owned);
                if let Some(committed) = &pending_deletion {
                    task.written_output_path = Some(committed.clone());
                }
                task.write = WriteState::Failed {
                    message: (**err).to_string(),
                    pending_deletion,
                };
            },
        }
        true
    }

    /// Atomically check the batch preconditions and start a batch.
    pub async fn begin_batch(&self) -> Result<Vec<TaskId>> {
        let mut state = self.state.write().await;
        let ids = state.batch_candidates()?;
        state.batch = Some(BatchProgress {
            total: ids.len(),
            done: 0,
        });
        Ok(ids)
    }

    /// Check whether a batch could start now, without starting one.
    pub async fn check_batch(&self) -> Result<usize> {
        Ok(self.state.read().await.batch_candidates()?.len())
    }

    pub async fn advance_batch(&self) {
        if let Some(batch) = &mut self.state.write().await.batch {
            batch.done += 1;
        }
    }

    pub async fn end_batch(&self) {
        self.state.write().await.batch = None;
    }

    pub async fn in_batch(&self) -> bool {
        self.state.read().await.batch.is_some()
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.state.read().await.tasks.iter().find(|task| task.id == id).cloned()
    }

    /// All tasks, in selection order.
    pub async fn snapshot(&self) -> Vec<Task> {
        self.state.read().await.tasks.clone()
    }

    pub async fn summary(&self) -> Summary {
        let state = self.state.read().await;
        let mut summary = Summary {
            total: state.tasks.len(),
            computing: state.computing,
            batch: state.batch,
            ..Summary::default()
        };
        for task in &state.tasks {
            if task.is_supported() {
                summary.supported += 1;
                if task.is_compute_terminal() {
                    summary.precompute_done += 1;
                }
            }
            summary.writable += usize::from(task.is_writable());
            match task.write {
                WriteState::Writing => summary.writing += 1,
                WriteState::Written => summary.written += 1,
                WriteState::Failed { .. } => summary.failed += 1,
                WriteState::Idle => {
                    if matches!(task.compute, ComputeState::Failed { .. }) {
                        summary.failed += 1;
                    }
                },
            }
        }
        summary
    }
}
