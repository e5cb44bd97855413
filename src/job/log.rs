//! Append-only job log with synchronous listeners.

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// A single line in a job's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLogEntry {
    /// Position in the log, starting at 0.
    pub sequence: usize,
    /// When the entry was appended.
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub severity: Severity,
}

impl JobLogEntry {
    /// Renders the entry as `<timestamp>\t<message>`.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "{}\t{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message
        )
    }
}

/// Callback invoked for every appended entry.
pub type LogListener = Box<dyn Fn(&JobLogEntry) + Send + Sync>;

/// Ordered log owned by a single job.
///
/// Entries are never edited or removed. Listeners run synchronously, in
/// registration order, on the thread that appends.
#[derive(Default)]
pub struct JobLog {
    job_name: String,
    entries: Vec<JobLogEntry>,
    listeners: Vec<LogListener>,
}

impl JobLog {
    #[must_use]
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            entries: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Registers a listener for entries appended from now on.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&JobLogEntry) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Drops all listeners.
    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.append(message.into(), Severity::Info);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.append(message.into(), Severity::Warning);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.append(message.into(), Severity::Error);
    }

    /// Appends an entry, mirrors it to `tracing` and notifies listeners.
    pub fn append(&mut self, message: String, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!(job = %self.job_name, "{message}"),
            Severity::Warning => tracing::warn!(job = %self.job_name, "{message}"),
            Severity::Error => tracing::error!(job = %self.job_name, "{message}"),
        }

        let entry = JobLogEntry {
            sequence: self.entries.len(),
            timestamp: Local::now(),
            message,
            severity,
        };
        for listener in &self.listeners {
            listener(&entry);
        }
        self.entries.push(entry);
    }

    #[must_use]
    pub fn entries(&self) -> &[JobLogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries with the given severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    /// Rendered lines, one per entry, in append order.
    #[must_use]
    pub fn rendered_lines(&self) -> Vec<String> {
        self.entries.iter().map(JobLogEntry::render).collect()
    }
}

impl fmt::Debug for JobLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobLog")
            .field("job_name", &self.job_name)
            .field("entries", &self.entries)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
