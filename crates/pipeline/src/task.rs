//! Tasks and their state machine.
//!
//! One [`Task`] exists per selected file for the whole session. Its compute
//! and write progress are tracked as two independent tagged states:
//!
//! ```text
//! compute:  Unsupported (sticky)
//!           Pending -> Computing -> Ready | Failed
//! write:    Idle -> Writing -> Written | Failed (retryable)
//! ```
//!
//! A settings change sends every supported task back to `Pending`/`Idle`
//! under the new revision.

use derive_more::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tinyimage_format::{ImageFormat, is_supported_extension, normalize_extension};

pub type TaskId = String;

/// An encoded candidate output held in memory until it is written.
#[derive(Clone, PartialEq, Eq)]
pub struct ComputedOutput {
    pub data: Vec<u8>,
    pub format: ImageFormat,
    /// Where the output would go if written now. Advisory: the write stage
    /// plans again against the filesystem as it is at write time.
    pub planned_path: PathBuf,
    pub delete_source_after_write: bool,
}

impl ComputedOutput {
    #[inline]
    pub fn output_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

impl std::fmt::Debug for ComputedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedOutput")
            .field("bytes", &self.data.len())
            .field("format", &self.format)
            .field("planned_path", &self.planned_path)
            .field("delete_source_after_write", &self.delete_source_after_write)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeState {
    /// Missing or unrecognised extension. Never leaves this state.
    Unsupported { reason: String },
    Pending,
    Computing,
    /// `output` is `None` once a successful write has consumed it.
    Ready { output: Option<Arc<ComputedOutput>> },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    Writing,
    Written,
    Failed {
        message: String,
        /// Output already committed by a write whose source deletion failed.
        /// Retrying only has to finish the deletion.
        pending_deletion: Option<PathBuf>,
    },
}

/// Short status shown next to each item.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
pub enum StatusLabel {
    Pending,
    Precomputing,
    Writable,
    Writing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// `"{order_index}:{original path}"`, unique within a session.
    pub id: TaskId,
    pub order_index: usize,
    /// The path as selected. Never changes.
    pub original_selected_path: PathBuf,
    /// Where the image lives now; moves after an overwrite that changed the
    /// extension.
    pub current_source_path: PathBuf,
    pub display_name: String,
    /// Lower-cased and dot-prefixed (`".jpg"`).
    pub source_extension: Option<String>,
    pub source_size_bytes: Option<u64>,
    pub compute: ComputeState,
    pub write: WriteState,
    pub written_output_path: Option<PathBuf>,
    pub last_known_output_bytes: Option<u64>,
    /// Revision the current compute/write state belongs to.
    pub settings_revision: u64,
}

impl Task {
    pub fn new(order_index: usize, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let source_extension = normalize_extension(&path);
        let compute = if is_supported_extension(source_extension.as_deref()) {
            ComputeState::Pending
        } else {
            ComputeState::Unsupported {
                reason: unsupported_reason(source_extension.as_deref()),
            }
        };
        Self {
            id: format!("{order_index}:{}", path.display()),
            order_index,
            original_selected_path: path.clone(),
            display_name: display_name(&path),
            current_source_path: path,
            source_extension,
            source_size_bytes: None,
            compute,
            write: WriteState::Idle,
            written_output_path: None,
            last_known_output_bytes: None,
            settings_revision: 0,
        }
    }

    #[inline]
    pub fn is_supported(&self) -> bool {
        !matches!(self.compute, ComputeState::Unsupported { .. })
    }

    /// Compute has reached a state it will not leave without a settings change.
    #[inline]
    pub fn is_compute_terminal(&self) -> bool {
        matches!(
            self.compute,
            ComputeState::Unsupported { .. } | ComputeState::Ready { .. } | ComputeState::Failed { .. }
        )
    }

    /// The unconsumed computed output, if any.
    pub fn computed(&self) -> Option<&Arc<ComputedOutput>> {
        match &self.compute {
            ComputeState::Ready { output } => output.as_ref(),
            _ => None,
        }
    }

    /// Ready with an unconsumed output and not currently being written.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.computed().is_some() && self.write != WriteState::Writing
    }

    /// Committed output of an earlier partially successful write.
    pub fn pending_deletion(&self) -> Option<&Path> {
        match &self.write {
            WriteState::Failed { pending_deletion, .. } => pending_deletion.as_deref(),
            _ => None,
        }
    }

    pub fn compute_error(&self) -> Option<&str> {
        match &self.compute {
            ComputeState::Unsupported { reason } => Some(reason),
            ComputeState::Failed { message } => Some(message),
            _ => None,
        }
    }

    pub fn write_error(&self) -> Option<&str> {
        match &self.write {
            WriteState::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// The most relevant error: write errors win over compute errors.
    pub fn error_message(&self) -> Option<&str> {
        self.write_error().or_else(|| self.compute_error())
    }

    pub fn status_label(&self) -> StatusLabel {
        match (&self.write, &self.compute) {
            (WriteState::Writing, _) => StatusLabel::Writing,
            (WriteState::Written, _) => StatusLabel::Done,
            (WriteState::Failed { .. }, _) => StatusLabel::Failed,
            (_, ComputeState::Unsupported { .. } | ComputeState::Failed { .. }) => StatusLabel::Failed,
            (_, ComputeState::Pending) => StatusLabel::Pending,
            (_, ComputeState::Computing) => StatusLabel::Precomputing,
            (_, ComputeState::Ready { .. }) => StatusLabel::Writable,
        }
    }

    /// Forget everything produced under an older revision.
    pub(crate) fn reset_for_revision(&mut self, revision: u64) {
        if self.is_supported() {
            self.compute = ComputeState::Pending;
            self.source_size_bytes = None;
        }
        self.write = WriteState::Idle;
        self.written_output_path = None;
        self.last_known_output_bytes = None;
        self.settings_revision = revision;
    }

    /// Point the task at a new source after an overwrite moved it.
    pub(crate) fn relocate(&mut self, path: PathBuf) {
        self.source_extension = normalize_extension(&path);
        self.display_name = display_name(&path);
        self.current_source_path = path;
    }
}

/// Tasks built from a selection, in selection order.
#[derive(Debug, Clone)]
pub struct BuiltTasks {
    pub tasks: Vec<Task>,
    pub supported_count: usize,
}

/// Build one task per selected path.
pub fn build_tasks<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> BuiltTasks {
    let tasks: Vec<Task> = paths.into_iter().enumerate().map(|(index, path)| Task::new(index, path)).collect();
    let supported_count = tasks.iter().filter(|task| task.is_supported()).count();
    BuiltTasks { tasks, supported_count }
}

fn unsupported_reason(extension: Option<&str>) -> String {
    match extension {
        None => "Missing file extension; cannot identify image format".to_string(),
        Some(ext) => format!("Unsupported format: {ext}"),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
