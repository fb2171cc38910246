//! Precompute and write pipeline for batch image recompression.
//!
//! A [`Session`] holds one [`Task`] per selected file. Every settings change
//! recomputes each supported image in memory ([`compute`]); nothing touches
//! the disk until a write is requested ([`write`]), and then only through a
//! staged temp file and a rename. Output names come from the [`plan`]ner,
//! which never picks an existing file.

pub mod compute;
pub mod error;
pub mod plan;
pub mod session;
pub mod store;
pub mod task;
pub mod write;

pub use crate::plan::{MAX_PATH_ATTEMPTS, OutputPlan, find_available_path, plan_output_path, resolve_output_format};
pub use crate::session::{BatchReport, BatchRequest, ComputeRun, ItemOutcome, Session};
pub use crate::store::{BatchProgress, Summary};
pub use crate::task::{BuiltTasks, ComputeState, ComputedOutput, StatusLabel, Task, TaskId, WriteState, build_tasks};
