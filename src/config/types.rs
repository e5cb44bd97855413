//! Configuration types.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default control socket path.
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/pdf-distiller.sock";

/// Runtime configuration for the distilling service.
///
/// Everything an operator can change through `SetConfig` lives here. Jobs take
/// a snapshot when they start, so a change never affects a job already in
/// progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory watched for new work files.
    pub input_dir: PathBuf,
    /// Name filter for work files, e.g. `*.ps`.
    pub input_filter: String,
    /// Directory that receives the merged PDFs.
    pub output_dir: PathBuf,
    /// Scratch directory for work-file copies and marks files.
    pub working_dir: PathBuf,
    /// Maximum number of jobs converting at the same time.
    pub worker_threads: usize,
    /// Write a `<name>_log.txt` next to every produced PDF.
    pub write_job_log_files: bool,
    /// Leave the merged source documents in place after a successful run.
    pub keep_source_files: bool,
    /// Delay between checks while a work file is still locked by its producer.
    pub lock_poll_interval_ms: u64,
    /// Give up on a locked work file after this many checks. `None` waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_max_attempts: Option<u32>,
    /// Explicit converter executable. Falls back to the platform default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converter: Option<PathBuf>,
    /// Unix socket for the control channel.
    pub control_socket: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            input_filter: "*.ps".to_string(),
            output_dir: PathBuf::from("output"),
            working_dir: PathBuf::from("work"),
            worker_threads: 4,
            write_job_log_files: false,
            keep_source_files: false,
            lock_poll_interval_ms: 1000,
            lock_max_attempts: None,
            converter: None,
            control_socket: PathBuf::from(DEFAULT_CONTROL_SOCKET),
        }
    }
}

impl ServiceConfig {
    /// Suffix a file name must end with to be picked up, lowercased.
    ///
    /// Wildcards are dropped from the filter, so `*.PS` becomes `.ps`.
    #[must_use]
    pub fn filter_suffix(&self) -> String {
        self.input_filter.replace('*', "").to_lowercase()
    }

    /// Returns true if `file_name` passes the input filter.
    #[must_use]
    pub fn matches_filter(&self, file_name: &str) -> bool {
        file_name.to_lowercase().ends_with(&self.filter_suffix())
    }

    /// Worker pool size, never less than one.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.worker_threads.max(1)
    }

    #[must_use]
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    /// Lists the operator-facing options that differ between `self` and `other`.
    #[must_use]
    pub fn changed_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.input_dir != other.input_dir {
            changed.push("input_dir");
        }
        if self.input_filter != other.input_filter {
            changed.push("input_filter");
        }
        if self.output_dir != other.output_dir {
            changed.push("output_dir");
        }
        if self.working_dir != other.working_dir {
            changed.push("working_dir");
        }
        if self.worker_threads != other.worker_threads {
            changed.push("worker_threads");
        }
        if self.write_job_log_files != other.write_job_log_files {
            changed.push("write_job_log_files");
        }
        if self.keep_source_files != other.keep_source_files {
            changed.push("keep_source_files");
        }
        changed
    }
}

/// Live configuration shared between the orchestrator, the watcher and the
/// control channel.
pub type SharedConfig = Arc<RwLock<ServiceConfig>>;

/// Wraps a configuration for sharing.
#[must_use]
pub fn shared(config: ServiceConfig) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

/// Returns a copy of the current configuration.
///
/// A poisoned lock still holds a complete value (writers only ever swap the
/// whole struct), so it is read through.
#[must_use]
pub fn snapshot(config: &SharedConfig) -> ServiceConfig {
    match config.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replaces the current configuration and returns the previous one.
pub fn replace(config: &SharedConfig, next: ServiceConfig) -> ServiceConfig {
    let mut guard = match config.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    std::mem::replace(&mut *guard, next)
}
