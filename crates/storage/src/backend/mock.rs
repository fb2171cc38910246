//! In-memory filesystem for testing.

use crate::error::{ErrorKind, Result};
use crate::{FileInfo, FileKind, Filesystem, normalize_path};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Filesystem operations, used to inject failures and to inspect the order
/// in which a [`MockFilesystem`] was driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Exists,
    Stat,
    Read,
    /// Staged replacement; a failure leaves the target untouched.
    Replace,
    Delete,
}

#[derive(Clone)]
enum Entry {
    File(Vec<u8>),
    Directory,
}

#[derive(Default)]
struct State {
    entries: HashMap<PathBuf, Entry>,
    /// `None` matches every path.
    failures: Vec<(Operation, Option<PathBuf>)>,
    log: Vec<(Operation, PathBuf)>,
}

/// In-memory filesystem for testing.
///
/// Entries live in a `HashMap` behind a [`RwLock`], so all trait methods can
/// operate on `&self` without external synchronisation. Failures can be
/// injected per operation (and optionally per path) to exercise error paths
/// that are awkward to provoke on a real disk, such as the commit or the
/// source deletion of a write failing.
///
/// # Examples
///
/// ```
/// use tinyimage_storage::backend::{MockFilesystem, Operation};
/// use tinyimage_storage::Filesystem;
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let fs = MockFilesystem::with_files([("/photos/a.jpg", b"jpeg bytes")]);
/// assert!(fs.exists(Path::new("/photos/a.jpg")).await.unwrap());
///
/// fs.fail_on(Operation::Delete, Some("/photos/a.jpg")).await;
/// assert!(fs.delete(Path::new("/photos/a.jpg")).await.is_err());
/// # }
/// ```
pub struct MockFilesystem {
    state: RwLock<State>,
}

impl MockFilesystem {
    /// Create a mock filesystem pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. a relative path). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut entries = HashMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = normalize_path(&path) else {
                // The panic here is DELIBERATE. There is no error result.
                panic!("MockFilesystem::with_files: invalid path {}", path.display());
            };
            entries.insert(validated, Entry::File(data.into()));
        }
        Self {
            state: RwLock::new(State {
                entries,
                ..State::default()
            }),
        }
    }

    /// Add an empty directory entry (for not-a-file checks).
    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let Ok(validated) = normalize_path(&path) else {
            panic!("MockFilesystem::with_dir: invalid path {}", path.display());
        };
        self.state.try_write().expect("fresh mock is not shared").entries.insert(validated, Entry::Directory);
        self
    }

    /// Make every future `operation` on `path` (or on any path, if `None`)
    /// fail with a [`BackendError`](ErrorKind::BackendError).
    pub async fn fail_on(&self, operation: Operation, path: Option<impl Into<PathBuf>>) {
        let path = path.map(|p| normalize_path(p.into()).expect("valid failure path"));
        self.state.write().await.failures.push((operation, path));
    }

    /// Remove all injected failures.
    pub async fn clear_failures(&self) {
        self.state.write().await.failures.clear();
    }

    /// Every operation performed so far, in order.
    pub async fn operations(&self) -> Vec<(Operation, PathBuf)> {
        self.state.read().await.log.clone()
    }

    /// Paths of all files currently stored, sorted.
    pub async fn files(&self) -> Vec<PathBuf> {
        let guard = self.state.read().await;
        let mut files: Vec<_> = guard
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::File(..)))
            .map(|(path, _)| path.clone())
            .collect();
        files.sort();
        files
    }

    /// Validate, record and check for an injected failure, in that order.
    async fn enter(&self, operation: Operation, path: &Path) -> Result<PathBuf> {
        let path = normalize_path(path)?;
        let mut guard = self.state.write().await;
        guard.log.push((operation, path.clone()));
        let injected = guard
            .failures
            .iter()
            .any(|(op, target)| *op == operation && target.as_ref().is_none_or(|t| *t == path));
        if injected {
            exn::bail!(ErrorKind::BackendError(format!("injected {operation:?} failure: {}", path.display())));
        }
        Ok(path)
    }
}

impl Default for MockFilesystem {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl Filesystem for MockFilesystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = self.enter(Operation::Exists, path).await?;
        Ok(self.state.read().await.entries.contains_key(&path))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = self.enter(Operation::Stat, path).await?;
        let guard = self.state.read().await;
        match guard.entries.get(&path) {
            Some(Entry::File(data)) => Ok(FileInfo::new(&path, data.len() as u64, FileKind::File)),
            Some(Entry::Directory) => Ok(FileInfo::new(&path, 0, FileKind::Directory)),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = self.enter(Operation::Read, path).await?;
        match self.state.read().await.entries.get(&path) {
            Some(Entry::File(data)) => Ok(data.clone()),
            Some(Entry::Directory) => exn::bail!(ErrorKind::IsADirectory(path)),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn replace_atomically(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = self.enter(Operation::Replace, path).await?;
        let mut guard = self.state.write().await;
        if matches!(guard.entries.get(&path), Some(Entry::Directory)) {
            exn::bail!(ErrorKind::IsADirectory(path));
        }
        guard.entries.insert(path, Entry::File(data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = self.enter(Operation::Delete, path).await?;
        let mut guard = self.state.write().await;
        match guard.entries.get(&path) {
            Some(Entry::File(..)) => {
                guard.entries.remove(&path);
                Ok(())
            },
            Some(Entry::Directory) => exn::bail!(ErrorKind::IsADirectory(path)),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_and_read() {
        let fs = MockFilesystem::default();
        fs.replace_atomically(Path::new("/a/test.txt"), b"hello").await.unwrap();
        assert_eq!(fs.read(Path::new("/a/test.txt")).await.unwrap(), b"hello");
        fs.replace_atomically(Path::new("/a/test.txt"), b"again").await.unwrap();
        assert_eq!(fs.read(Path::new("/a/test.txt")).await.unwrap(), b"again");
    }

    #[tokio::test]
    async fn test_stat_kinds() {
        let fs = MockFilesystem::with_files([("/a/file.jpg", b"12345")]).with_dir("/a/folder.jpg");
        let info = fs.stat(Path::new("/a/file.jpg")).await.unwrap();
        assert_eq!((info.kind, info.size), (FileKind::File, 5));
        let info = fs.stat(Path::new("/a/folder.jpg")).await.unwrap();
        assert_eq!(info.kind, FileKind::Directory);
        let err = fs.stat(Path::new("/a/missing.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous_content() {
        let fs = MockFilesystem::with_files([("/a/old.txt", b"old")]).with_dir("/a/dir");
        fs.fail_on(Operation::Replace, Some("/a/old.txt")).await;
        assert!(fs.replace_atomically(Path::new("/a/old.txt"), b"new").await.is_err());
        assert_eq!(fs.read(Path::new("/a/old.txt")).await.unwrap(), b"old");
        let err = fs.replace_atomically(Path::new("/a/dir"), b"new").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::IsADirectory(_)));
        assert_eq!(fs.files().await, vec![PathBuf::from("/a/old.txt")]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let fs = MockFilesystem::with_files([("/a/x.jpg", b"x"), ("/a/y.jpg", b"y")]);
        fs.fail_on(Operation::Delete, Some("/a/x.jpg")).await;
        let err = fs.delete(Path::new("/a/x.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendError(_)));
        // Other paths are unaffected.
        fs.delete(Path::new("/a/y.jpg")).await.unwrap();
        fs.clear_failures().await;
        fs.delete(Path::new("/a/x.jpg")).await.unwrap();
    }

    #[tokio::test]
    async fn test_wildcard_failure() {
        let fs = MockFilesystem::default();
        fs.fail_on(Operation::Replace, None::<PathBuf>).await;
        assert!(fs.replace_atomically(Path::new("/anything"), b"data").await.is_err());
        assert!(fs.files().await.is_empty());
    }

    #[tokio::test]
    async fn test_operation_log() {
        let fs = MockFilesystem::with_files([("/a/x.jpg", b"x")]);
        fs.exists(Path::new("/a/x.jpg")).await.unwrap();
        fs.delete(Path::new("/a/./x.jpg")).await.unwrap();
        assert_eq!(
            fs.operations().await,
            vec![(Operation::Exists, PathBuf::from("/a/x.jpg")), (Operation::Delete, PathBuf::from("/a/x.jpg"))]
        );
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockFilesystem::with_files([("relative.jpg", b"bad")]);
    }
}
