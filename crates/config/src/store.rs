//! Persisted default settings.
//!
//! Defaults live in a plain key-value store as a single JSON blob under
//! [`DEFAULT_SETTINGS_STORAGE_KEY`]. The store itself is opaque: the file-backed
//! implementation keeps a JSON object of strings on disk, the in-memory one
//! exists for tests.

use crate::error::{ErrorKind, Result};
use crate::settings::{Settings, parse_stored_settings};
use exn::ResultExt;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key under which the default settings blob is stored.
pub const DEFAULT_SETTINGS_STORAGE_KEY: &str = "tinyimage.default-settings.v1";

/// A string key-value store.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Key-value store persisted as a JSON object in a single file.
///
/// Every `set` rewrites the whole file through a temp file in the same
/// directory, so a crash mid-save leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err).or_raise(|| ErrorKind::StoreIo(self.path.clone())),
        };
        serde_json::from_str(&raw).or_raise(|| ErrorKind::StoreCorrupt(self.path.clone()))
    }

    fn replace(&self, contents: &[u8]) -> Result<()> {
        let io_error = || ErrorKind::StoreIo(self.path.clone());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).or_raise(io_error)?;
        let mut staged = tempfile::NamedTempFile::new_in(dir).or_raise(io_error)?;
        staged.write_all(contents).or_raise(io_error)?;
        staged.as_file().sync_all().or_raise(io_error)?;
        staged.persist(&self.path).or_raise(io_error)?;
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        // A corrupt store is replaced rather than blocking every future save.
        let mut entries = self.load().unwrap_or_else(|err| {
            tracing::warn!(path = %self.path.display(), error = ?err, "Discarding unreadable settings store");
            BTreeMap::new()
        });
        entries.insert(key.to_string(), value.to_string());
        let encoded = serde_json::to_string_pretty(&entries).or_raise(|| ErrorKind::Serialize)?;
        self.replace(encoded.as_bytes())
    }
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Load the persisted default settings.
///
/// Returns `Ok(None)` when nothing is stored, or when the stored blob is not
/// JSON. Anything that is JSON is normalized into valid settings.
pub fn load_default_settings(store: &dyn SettingsStore) -> Result<Option<Settings>> {
    let Some(raw) = store.get(DEFAULT_SETTINGS_STORAGE_KEY)? else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(parse_stored_settings(&raw))
}

/// Normalize and persist `settings` as the new defaults.
pub fn save_default_settings(store: &dyn SettingsStore, settings: &Settings) -> Result<()> {
    let raw = settings.to_stored_json().or_raise(|| ErrorKind::Serialize)?;
    store.set(DEFAULT_SETTINGS_STORAGE_KEY, &raw)?;
    tracing::debug!(key = DEFAULT_SETTINGS_STORAGE_KEY, "Saved default settings");
    Ok(())
}
