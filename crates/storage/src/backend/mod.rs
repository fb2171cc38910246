//! Filesystem trait and implementations.
//!
//! This module defines the [`Filesystem`] trait, the narrow set of operations
//! the pipeline performs on disk: existence checks for collision avoidance,
//! `stat` and reads while computing, and the staged replace and delete
//! primitives the write protocol is assembled from.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalFilesystem;
#[cfg(feature = "mock")]
pub use self::mock::{MockFilesystem, Operation};
use crate::error::Result;
use crate::models::FileInfo;
use async_trait::async_trait;
use std::path::Path;

/// Unified interface for filesystem access.
///
/// All paths are absolute. Implementations normalize them with
/// [`normalize_path`](crate::normalize_path) and reject anything else with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tinyimage_storage::{Filesystem, error::Result};
///
/// async fn size_if_regular(fs: &dyn Filesystem, path: &Path) -> Result<Option<u64>> {
///     let info = fs.stat(path).await?;
///     Ok(info.is_file().then_some(info.size))
/// }
/// ```
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Check if anything (file, directory, ...) exists at `path`.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata without reading contents, following symlinks.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing
    /// exists at `path`.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Read file contents.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replace the file at `path` with `data`, creating it if needed.
    ///
    /// The bytes are staged in a hidden sibling, flushed to stable storage
    /// and renamed over `path`, so `path` holds either its previous content
    /// or all of `data`. Nothing is left behind on failure. Parent
    /// directories are not created.
    async fn replace_atomically(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;
}
