//! Settings and configuration for tinyimage.
//!
//! Two distinct things live here:
//!
//! - [`Settings`], the compression configuration a session runs under. It is
//!   user-facing, versioned and persisted as the "default settings" through a
//!   [`SettingsStore`].
//! - [`AppConfig`], the process configuration (pool size, log level, where the
//!   settings store lives), layered with figment.

mod app;
pub mod error;
mod settings;
mod store;

pub use crate::app::{AppConfig, DEFAULT_CONCURRENCY};
pub use crate::settings::{
    FormatMode, OutputMode, PNG_COMPRESSION_RANGE, QUALITY_RANGE, SCHEMA_VERSION, Settings, normalize_settings,
    parse_stored_settings,
};
pub use crate::store::{
    DEFAULT_SETTINGS_STORAGE_KEY, FileSettingsStore, MemorySettingsStore, SettingsStore, load_default_settings,
    save_default_settings,
};
