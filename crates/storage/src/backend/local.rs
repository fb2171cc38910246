//! Local filesystem backend.
//!
//! Accesses files with `tokio::fs` for async I/O. Staged replacement goes
//! through [`tempfile`] on the blocking pool.

use crate::error::{ErrorKind, Result};
use crate::{FileInfo, FileKind, Filesystem, normalize_path};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::fs::Metadata;
use std::io::Write;
use std::path::Path;
use tokio::fs;

/// Suffix of staging files, so leftovers of a killed process are recognisable.
const STAGING_SUFFIX: &str = ".tinyimage-tmp";

/// Local filesystem backend.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use tinyimage_storage::{Filesystem, backend::LocalFilesystem};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fs = LocalFilesystem::new();
/// let exists = fs.exists(Path::new("/photos/cat.jpg")).await.map_err(|e| e.to_string())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }

    fn file_info(path: &Path, metadata: &Metadata) -> FileInfo {
        let kind = if metadata.is_file() {
            FileKind::File
        } else if metadata.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Other
        };
        FileInfo::new(path, metadata.len(), kind)
    }
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = normalize_path(path)?;
        Ok(fs::try_exists(&path).await.map_err(|e| ErrorKind::from_io(e, &path))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = normalize_path(path)?;
        let metadata = fs::metadata(&path).await.map_err(|e| ErrorKind::from_io(e, &path))?;
        Ok(Self::file_info(&path, &metadata))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = normalize_path(path)?;
        Ok(fs::read(&path).await.map_err(|e| ErrorKind::from_io(e, &path))?)
    }

    async fn replace_atomically(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = normalize_path(path)?;
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || stage_and_persist(&path, &data))
            .await
            .or_raise(|| ErrorKind::BackendError("staging worker did not complete".to_string()))?
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = normalize_path(path)?;
        fs::remove_file(&path).await.map_err(|e| ErrorKind::from_io(e, &path))?;
        tracing::debug!(path = %path.display(), "Deleted file");
        Ok(())
    }
}

/// Write `data` to a named temp file beside `target`, sync it, then persist
/// it over `target`. The temp file is removed when it is dropped unpersisted.
fn stage_and_persist(target: &Path, data: &[u8]) -> Result<()> {
    let dir = target.parent().ok_or_raise(|| ErrorKind::InvalidPath(target.to_path_buf()))?.to_path_buf();
    let name = target.file_name().ok_or_raise(|| ErrorKind::InvalidPath(target.to_path_buf()))?;
    let prefix = format!(".{}.", name.to_string_lossy());

    let mut staged = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(&dir)
        .map_err(|e| ErrorKind::from_io(e, &dir))?;
    staged.write_all(data).map_err(|e| ErrorKind::from_io(e, staged.path()))?;
    // The rename is only crash-safe if the bytes hit the disk first.
    staged.as_file().sync_all().map_err(|e| ErrorKind::from_io(e, staged.path()))?;
    let staged_path = staged.path().to_path_buf();
    staged.persist(target).map_err(|e| ErrorKind::from_io(e.error, target))?;
    tracing::trace!(staged = %staged_path.display(), target = %target.display(), bytes = data.len(), "Replaced file");
    Ok(())
}
