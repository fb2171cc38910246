//! Path validation and normalization.
//!
//! Paths handed to the pipeline come from an external file selection and are
//! always absolute. Two spellings of the same location (`/a/./b.jpg` and
//! `/a/c/../b.jpg`) must compare equal when the planner checks a candidate
//! against the source path, so everything goes through [`normalize`] first.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Lexically normalizes an absolute path.
///
/// Removes `.` components, resolves `..` against the preceding component and
/// collapses duplicate separators. `..` at the root stays at the root. No
/// symlinks are resolved and the filesystem is never touched.
///
/// > **Note:** relative paths and paths containing null bytes are rejected
/// >           with [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tinyimage_storage::normalize_path;
/// # #[cfg(unix)]
/// # {
/// assert_eq!(normalize_path("/a/./b//c/../d.jpg").unwrap(), Path::new("/a/b/d.jpg"));
/// assert_eq!(normalize_path("/../a.jpg").unwrap(), Path::new("/a.jpg"));
/// assert!(normalize_path("relative/a.jpg").is_err());
/// # }
/// ```
pub fn normalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if !path.is_absolute() {
        exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
    }
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir),
            Component::CurDir => {},
            Component::ParentDir => {
                // Popping the root is a no-op, same as `cd /..`.
                normalized.pop();
            },
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls; reject them.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                normalized.push(s);
            },
        }
    }
    Ok(normalized)
}
