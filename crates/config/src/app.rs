//! Application configuration.
//!
//! Layered with figment, lowest precedence first:
//!
//! 1. Built-in defaults ([`AppConfig::default`]).
//! 2. `config.toml` in the platform configuration directory.
//! 3. An explicitly requested TOML file (`--config`).
//! 4. `TINYIMAGE_*` environment variables (`TINYIMAGE_CONCURRENCY=4`).

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Worker pool size when nothing else is configured.
pub const DEFAULT_CONCURRENCY: usize = 2;

const APPLICATION: &str = "tinyimage";
const CONFIG_FILE: &str = "config.toml";
const SETTINGS_FILE: &str = "settings.json";
const ENV_PREFIX: &str = "TINYIMAGE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Maximum compute or write operations in flight at once.
    pub concurrency: usize,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Where persisted default settings are kept. Falls back to the platform
    /// data directory.
    pub settings_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            log_level: "info".to_string(),
            settings_path: None,
        }
    }
}

impl AppConfig {
    /// Load the layered configuration, optionally including an explicit file.
    ///
    /// A missing platform `config.toml` is silently skipped; a missing
    /// explicit file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(dirs) = project_dirs() {
            figment = figment.merge(Toml::file(dirs.config_dir().join(CONFIG_FILE)));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::ConfigFileMissing(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Figment)?;
        Ok(config.validated())
    }

    /// Concurrency below one would never make progress.
    #[must_use]
    pub fn validated(self) -> Self {
        Self {
            concurrency: self.concurrency.max(1),
            ..self
        }
    }

    /// The configured settings file, or `settings.json` in the platform data
    /// directory.
    pub fn settings_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.settings_path {
            return Ok(path.clone());
        }
        let dirs = project_dirs().ok_or_raise(|| ErrorKind::NoProjectDirectory)?;
        Ok(dirs.data_dir().join(SETTINGS_FILE))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APPLICATION)
}
