//! Print jobs: work file parsing, the per-job log and the pipeline.

mod log;
mod parser;
mod paths;
mod runner;
mod state;

pub use log::{JobLog, JobLogEntry, LogListener, Severity};
pub use parser::{
    normalize_separators, retain_existing, strip_reference, WorkFile, HEADER_LINES, MARKS_LINES,
};
pub use paths::JobPaths;
pub use runner::{EndCallback, Job, JobError, JobId};
pub use state::JobState;
