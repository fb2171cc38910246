pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::Filesystem;
pub use crate::models::{FileInfo, FileKind};
pub use crate::path::normalize as normalize_path;
use std::sync::Arc;

pub type FsHandle = Arc<dyn Filesystem + Send + Sync>;
