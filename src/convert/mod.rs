//! External document conversion.
//!
//! The converter is a black box: it gets an ordered list of input files and an
//! output path, writes the merged PDF and exits. Anything it prints is surfaced
//! in the job log as a warning.

mod ghostscript;

pub use ghostscript::*;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::job::JobLog;

/// Error type for converter invocation.
#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    /// The converter binary was not found.
    #[error("Converter binary not found: {0}")]
    NotFound(PathBuf),
    /// Permission denied when spawning.
    #[error("Permission denied running converter: {0}")]
    PermissionDenied(PathBuf),
    /// The child process did not expose the expected pipes.
    #[error("Converter output pipe not available")]
    NoOutputPipe,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Create a `ConvertError` from a spawn failure, classifying common cases.
    fn from_spawn(binary: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(binary.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(binary.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

/// Outcome of a finished conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionReport {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Number of non-blank diagnostic lines the converter printed.
    pub diagnostics: usize,
}

impl ConversionReport {
    #[must_use]
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Merges input documents into a single output file.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Converts `inputs`, in order, into `output`.
    ///
    /// A non-zero exit is reported, not returned as an error; only a failure
    /// to run the converter at all is an error.
    ///
    /// # Errors
    ///
    /// Returns `ConvertError` if the converter cannot be spawned or awaited.
    async fn convert(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        log: &mut JobLog,
    ) -> Result<ConversionReport, ConvertError>;
}
