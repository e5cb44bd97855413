//! Input directory watching.
//!
//! Turns file-creation events in the input directory into work file paths
//! for the orchestrator.

mod error;
mod job_watcher;

pub use error::WatcherError;
pub use job_watcher::{JobDirectoryWatcher, DEBOUNCE};
