//! The write stage: commit a computed output to disk.
//!
//! Outputs go through [`Filesystem::replace_atomically`], so readers of the
//! destination see either the old file or the complete new one. A source
//! that the plan replaces is deleted only after the new file is in place.
//!
//! Concurrent writes of one session share a [`Placement`]: a write plans its
//! destination and reserves the name in one step, so no other write can pick
//! the same free name before the first one has committed.

use crate::error::{ErrorKind, Result, classify};
use crate::plan::{OutputPlan, plan_output_path_avoiding};
use crate::task::{Task, WriteState};
use exn::{OptionExt, ResultExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tinyimage_config::{OutputMode, Settings};
use tinyimage_format::ImageFormat;
use tinyimage_storage::Filesystem;
use tinyimage_storage::error::ErrorKind as StorageErrorKind;
use tokio::sync::Mutex;
use tracing::instrument;

/// A committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub output_path: PathBuf,
    pub output_bytes: u64,
    /// Where the task's source lives from now on.
    pub next_current_source: PathBuf,
}

/// Output names claimed by writes that have not committed yet.
#[derive(Debug, Default)]
pub struct Placement {
    reserved: Mutex<HashSet<PathBuf>>,
}

impl Placement {
    /// Plan the destination of `task` and reserve it until [`release`](Self::release).
    async fn claim(
        &self,
        fs: &dyn Filesystem,
        task: &Task,
        settings: &Settings,
        format: ImageFormat,
    ) -> Result<OutputPlan> {
        let mut reserved = self.reserved.lock().await;
        let plan = plan_output_path_avoiding(
            fs,
            &task.current_source_path,
            task.source_extension.as_deref(),
            settings,
            format,
            &reserved,
        )
        .await?;
        reserved.insert(plan.final_path.clone());
        Ok(plan)
    }

    async fn release(&self, path: &Path) {
        self.reserved.lock().await.remove(path);
    }
}

/// Write the computed output of `task`.
///
/// The destination is planned again against the filesystem as it is now,
/// because other writes may have taken the name chosen at compute time. If an
/// earlier write of this task committed its output but could not delete the
/// source, only the deletion is retried, provided that output is still there.
#[instrument(skip_all, fields(task = %task.id, source = %task.current_source_path.display()))]
pub async fn write(
    fs: &dyn Filesystem,
    placement: &Placement,
    task: &Task,
    settings: &Settings,
) -> Result<WriteOutcome> {
    let output = task.computed().ok_or_raise(|| ErrorKind::NotWritable)?;
    if task.write == WriteState::Writing {
        exn::bail!(ErrorKind::NotWritable);
    }
    let source = &task.current_source_path;

    if let Some(committed) = task.pending_deletion() {
        if output_in_place(fs, committed).await? {
            tracing::info!(output = %committed.display(), "Retrying deletion of replaced source");
            delete_replaced_source(fs, source, committed).await?;
            return Ok(WriteOutcome {
                output_path: committed.to_path_buf(),
                output_bytes: output.output_bytes(),
                next_current_source: committed.to_path_buf(),
            });
        }
        tracing::warn!(output = %committed.display(), "Committed output is gone; writing it again");
    }

    let plan = placement.claim(fs, task, settings, output.format).await?;
    if plan.final_path != output.planned_path {
        tracing::debug!(
            planned = %output.planned_path.display(),
            actual = %plan.final_path.display(),
            "Destination changed since compute"
        );
    }
    let committed = fs.replace_atomically(&plan.final_path, &output.data).await;
    placement.release(&plan.final_path).await;
    classify(committed, ErrorKind::from_storage)?;

    if plan.delete_source_after_write {
        delete_replaced_source(fs, source, &plan.final_path).await?;
    }

    let next_current_source = match settings.output_mode {
        OutputMode::OverwriteOriginal => plan.final_path.clone(),
        OutputMode::GenerateNew => source.clone(),
    };
    tracing::info!(output = %plan.final_path.display(), bytes = output.data.len(), "Wrote image");
    Ok(WriteOutcome {
        output_path: plan.final_path,
        output_bytes: output.output_bytes(),
        next_current_source,
    })
}

/// Whether an output committed earlier is still a regular file.
async fn output_in_place(fs: &dyn Filesystem, committed: &Path) -> Result<bool> {
    match fs.stat(committed).await {
        Ok(info) => Ok(info.is_file()),
        Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => Ok(false),
        Err(err) => Err(err).or_raise(|| ErrorKind::PartialSuccess(committed.to_path_buf())),
    }
}

async fn delete_replaced_source(fs: &dyn Filesystem, source: &Path, committed: &Path) -> Result<()> {
    match fs.delete(source).await {
        Ok(()) => Ok(()),
        // Already gone counts as deleted.
        Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
            tracing::debug!(source = %source.display(), "Replaced source already gone");
            Ok(())
        },
        Err(err) => {
            tracing::warn!(
                source = %source.display(),
                output = %committed.display(),
                error = ?err,
                "Failed to delete replaced source"
            );
            Err(err).or_raise(|| ErrorKind::PartialSuccess(committed.to_path_buf()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ComputeState, ComputedOutput};
    use std::sync::Arc;
    use tinyimage_config::FormatMode;
    use tinyimage_storage::backend::{MockFilesystem, Operation};

    fn ready_task(source: &str, format: ImageFormat, data: &[u8]) -> Task {
        let mut task = Task::new(0, source);
        task.compute = ComputeState::Ready {
            output: Some(Arc::new(ComputedOutput {
                data: data.to_vec(),
                format,
                planned_path: PathBuf::from(source),
                delete_source_after_write: false,
            })),
        };
        task
    }

    fn overwrite_convert(format: ImageFormat) -> Settings {
        Settings {
            output_mode: OutputMode::OverwriteOriginal,
            format_mode: FormatMode::Convert,
            target_format: format,
            ..Settings::default()
        }
    }

    async fn mutations(fs: &MockFilesystem) -> Vec<(Operation, PathBuf)> {
        fs.operations()
            .await
            .into_iter()
            .filter(|(op, _)| matches!(op, Operation::Replace | Operation::Delete))
            .collect()
    }

    #[tokio::test]
    async fn test_generate_new() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"source".to_vec())]);
        let task = ready_task("/photos/a.jpg", ImageFormat::Jpeg, b"small");
        let outcome = write(&fs, &Placement::default(), &task, &Settings::default()).await.unwrap();
        assert_eq!(outcome.output_path, PathBuf::from("/photos/a.tiny.jpg"));
        assert_eq!(outcome.output_bytes, 5);
        assert_eq!(outcome.next_current_source, PathBuf::from("/photos/a.jpg"));
        assert_eq!(fs.files().await, vec![PathBuf::from("/photos/a.jpg"), PathBuf::from("/photos/a.tiny.jpg")]);
        assert_eq!(fs.read(Path::new("/photos/a.tiny.jpg")).await.unwrap(), b"small");
        assert_eq!(fs.read(Path::new("/photos/a.jpg")).await.unwrap(), b"source");
    }

    #[tokio::test]
    async fn test_write_replans_at_write_time() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"source".to_vec())]);
        let mut task = ready_task("/photos/a.jpg", ImageFormat::Jpeg, b"small");
        if let ComputeState::Ready { output: Some(output) } = &mut task.compute {
            Arc::make_mut(output).planned_path = PathBuf::from("/photos/a.tiny.jpg");
        }
        // Something took the planned name after compute.
        fs.replace_atomically(Path::new("/photos/a.tiny.jpg"), b"other").await.unwrap();
        let outcome = write(&fs, &Placement::default(), &task, &Settings::default()).await.unwrap();
        assert_eq!(outcome.output_path, PathBuf::from("/photos/a.tiny-1.jpg"));
        assert_eq!(fs.read(Path::new("/photos/a.tiny.jpg")).await.unwrap(), b"other");
    }

    #[tokio::test]
    async fn test_reserved_names_are_skipped_and_released() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"source".to_vec())]);
        let placement = Placement::default();
        // Another write is still committing to the first choice.
        placement.reserved.lock().await.insert(PathBuf::from("/photos/a.tiny.jpg"));
        let task = ready_task("/photos/a.jpg", ImageFormat::Jpeg, b"small");
        let outcome = write(&fs, &placement, &task, &Settings::default()).await.unwrap();
        assert_eq!(outcome.output_path, PathBuf::from("/photos/a.tiny-1.jpg"));
        assert_eq!(*placement.reserved.lock().await, HashSet::from([PathBuf::from("/photos/a.tiny.jpg")]));
    }

    #[tokio::test]
    async fn test_failed_commit_releases_reservation() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"source".to_vec())]);
        fs.fail_on(Operation::Replace, Some("/photos/a.tiny.jpg")).await;
        let placement = Placement::default();
        let task = ready_task("/photos/a.jpg", ImageFormat::Jpeg, b"small");
        write(&fs, &placement, &task, &Settings::default()).await.unwrap_err();
        assert!(placement.reserved.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_in_place() {
        let fs = MockFilesystem::with_files([("/photos/a.png", b"original".to_vec())]);
        let task = ready_task("/photos/a.png", ImageFormat::Png, b"tiny");
        let settings = Settings {
            output_mode: OutputMode::OverwriteOriginal,
            ..Settings::default()
        };
        let outcome = write(&fs, &Placement::default(), &task, &settings).await.unwrap();
        assert_eq!(outcome.output_path, PathBuf::from("/photos/a.png"));
        assert_eq!(outcome.next_current_source, PathBuf::from("/photos/a.png"));
        assert_eq!(fs.files().await, vec![PathBuf::from("/photos/a.png")]);
        assert_eq!(fs.read(Path::new("/photos/a.png")).await.unwrap(), b"tiny");
        assert_eq!(mutations(&fs).await, [(Operation::Replace, PathBuf::from("/photos/a.png"))]);
    }

    #[tokio::test]
    async fn test_delete_happens_after_commit() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"original".to_vec())]);
        let task = ready_task("/photos/a.jpg", ImageFormat::Png, b"png!");
        let outcome = write(&fs, &Placement::default(), &task, &overwrite_convert(ImageFormat::Png)).await.unwrap();
        assert_eq!(outcome.output_path, PathBuf::from("/photos/a.png"));
        assert_eq!(outcome.next_current_source, PathBuf::from("/photos/a.png"));
        assert_eq!(fs.files().await, vec![PathBuf::from("/photos/a.png")]);
        assert_eq!(
            mutations(&fs).await,
            [
                (Operation::Replace, PathBuf::from("/photos/a.png")),
                (Operation::Delete, PathBuf::from("/photos/a.jpg")),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_destination_untouched() {
        let fs = MockFilesystem::with_files([("/photos/a.png", b"original".to_vec())]);
        fs.fail_on(Operation::Replace, Some("/photos/a.png")).await;
        let task = ready_task("/photos/a.png", ImageFormat::Png, b"tiny");
        let settings = Settings {
            output_mode: OutputMode::OverwriteOriginal,
            ..Settings::default()
        };
        let err = write(&fs, &Placement::default(), &task, &settings).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unknown(_)));
        assert_eq!(fs.files().await, vec![PathBuf::from("/photos/a.png")]);
        assert_eq!(fs.read(Path::new("/photos/a.png")).await.unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_failed_commit_never_deletes_source() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"original".to_vec())]);
        fs.fail_on(Operation::Replace, None::<PathBuf>).await;
        let task = ready_task("/photos/a.jpg", ImageFormat::Png, b"png!");
        write(&fs, &Placement::default(), &task, &overwrite_convert(ImageFormat::Png)).await.unwrap_err();
        assert_eq!(fs.files().await, vec![PathBuf::from("/photos/a.jpg")]);
        assert!(!mutations(&fs).await.iter().any(|(op, _)| *op == Operation::Delete));
    }

    #[tokio::test]
    async fn test_delete_failure_is_partial_success() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"original".to_vec())]);
        fs.fail_on(Operation::Delete, Some("/photos/a.jpg")).await;
        let mut task = ready_task("/photos/a.jpg", ImageFormat::Png, b"png!");
        let settings = overwrite_convert(ImageFormat::Png);

        let err = write(&fs, &Placement::default(), &task, &settings).await.unwrap_err();
        assert_eq!(*err, ErrorKind::PartialSuccess(PathBuf::from("/photos/a.png")));
        assert_eq!(fs.files().await, vec![PathBuf::from("/photos/a.jpg"), PathBuf::from("/photos/a.png")]);

        // Retrying only finishes the deletion; nothing is written twice.
        fs.clear_failures().await;
        task.write = WriteState::Failed {
            message: (*err).to_string(),
            pending_deletion: Some(PathBuf::from("/photos/a.png")),
        };
        let before = mutations(&fs).await.len();
        let outcome = write(&fs, &Placement::default(), &task, &settings).await.unwrap();
        assert_eq!(outcome.output_path, PathBuf::from("/photos/a.png"));
        assert_eq!(outcome.next_current_source, PathBuf::from("/photos/a.png"));
        assert_eq!(fs.files().await, vec![PathBuf::from("/photos/a.png")]);
        let after = mutations(&fs).await;
        assert_eq!(after[before..], [(Operation::Delete, PathBuf::from("/photos/a.jpg"))]);
    }

    #[tokio::test]
    async fn test_retry_rewrites_output_that_disappeared() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"original".to_vec())]);
        let mut task = ready_task("/photos/a.jpg", ImageFormat::Png, b"png!");
        task.write = WriteState::Failed {
            message: "New file was written, but deleting the original file failed".into(),
            pending_deletion: Some(PathBuf::from("/photos/a.png")),
        };
        // The committed output was moved away before the retry.
        assert!(!fs.exists(Path::new("/photos/a.png")).await.unwrap());

        let outcome = write(&fs, &Placement::default(), &task, &overwrite_convert(ImageFormat::Png)).await.unwrap();
        assert_eq!(outcome.output_path, PathBuf::from("/photos/a.png"));
        assert_eq!(fs.files().await, vec![PathBuf::from("/photos/a.png")]);
        assert_eq!(fs.read(Path::new("/photos/a.png")).await.unwrap(), b"png!");
        assert_eq!(
            mutations(&fs).await,
            [
                (Operation::Replace, PathBuf::from("/photos/a.png")),
                (Operation::Delete, PathBuf::from("/photos/a.jpg")),
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_keeps_source_when_output_cannot_be_checked() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"original".to_vec()), ("/photos/a.png", b"png!".to_vec())]);
        fs.fail_on(Operation::Stat, Some("/photos/a.png")).await;
        let mut task = ready_task("/photos/a.jpg", ImageFormat::Png, b"png!");
        task.write = WriteState::Failed {
            message: "New file was written, but deleting the original file failed".into(),
            pending_deletion: Some(PathBuf::from("/photos/a.png")),
        };
        let err = write(&fs, &Placement::default(), &task, &overwrite_convert(ImageFormat::Png)).await.unwrap_err();
        assert_eq!(*err, ErrorKind::PartialSuccess(PathBuf::from("/photos/a.png")));
        assert!(mutations(&fs).await.is_empty());
    }

    #[tokio::test]
    async fn test_not_writable() {
        let fs = MockFilesystem::default();
        let task = Task::new(0, "/photos/a.jpg");
        let err = write(&fs, &Placement::default(), &task, &Settings::default()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotWritable);

        let mut task = ready_task("/photos/a.jpg", ImageFormat::Jpeg, b"x");
        task.write = WriteState::Writing;
        let err = write(&fs, &Placement::default(), &task, &Settings::default()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotWritable);
        assert!(mutations(&fs).await.is_empty());
    }

    #[tokio::test]
    async fn test_local_filesystem_leaves_no_staging_files() {
        use tinyimage_storage::backend::LocalFilesystem;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        std::fs::write(&source, b"original").unwrap();
        let task = ready_task(source.to_str().unwrap(), ImageFormat::Png, b"png!");

        let fs = LocalFilesystem::new();
        let outcome = write(&fs, &Placement::default(), &task, &overwrite_convert(ImageFormat::Png)).await.unwrap();
        assert_eq!(outcome.output_path, dir.path().join("a.png"));
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.png"]);
    }
}
