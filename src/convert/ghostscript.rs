//! Ghostscript invocation.

use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::{ConversionReport, ConvertError, Converter};
use crate::job::JobLog;

/// Flags passed ahead of the output path.
pub const GS_FLAGS: [&str; 6] = [
    "-sDEVICE=pdfwrite",
    "-q",
    "-dQUIET",
    "-dNOPAUSE",
    "-dSAFER",
    "-dBATCH",
];

/// Runs Ghostscript's `pdfwrite` device over the inputs.
#[derive(Debug, Clone)]
pub struct GhostscriptConverter {
    binary: PathBuf,
}

impl GhostscriptConverter {
    /// Uses the platform's default Ghostscript executable.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary(Self::default_binary())
    }

    /// Uses a specific executable.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Uses `binary` if given, the platform default otherwise.
    #[must_use]
    pub fn from_config(binary: Option<&Path>) -> Self {
        match binary {
            Some(binary) => Self::with_binary(binary),
            None => Self::new(),
        }
    }

    /// Console executable matching the host architecture.
    #[must_use]
    pub fn default_binary() -> PathBuf {
        let name = if cfg!(windows) {
            if cfg!(target_pointer_width = "64") {
                "gswin64c.exe"
            } else {
                "gswin32c.exe"
            }
        } else {
            "gs"
        };
        PathBuf::from(name)
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(inputs: &[PathBuf], output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = GS_FLAGS.iter().map(OsString::from).collect();

        let mut output_arg = OsString::from("-sOutputFile=");
        output_arg.push(output);
        args.push(output_arg);

        args.extend(inputs.iter().map(|p| p.as_os_str().to_os_string()));
        args
    }

    /// Shell-quoted command line, for logging.
    #[must_use]
    pub fn command_line(&self, args: &[OsString]) -> String {
        std::iter::once(self.binary.as_os_str())
            .chain(args.iter().map(OsString::as_os_str))
            .map(|arg| shell_escape::escape(Cow::Owned(arg.to_string_lossy().into_owned())))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for GhostscriptConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Converter for GhostscriptConverter {
    async fn convert(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        log: &mut JobLog,
    ) -> Result<ConversionReport, ConvertError> {
        let args = Self::build_args(inputs, output);
        tracing::debug!(command = %self.command_line(&args), "Spawning converter");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConvertError::from_spawn(&self.binary, e))?;

        let stdout = child.stdout.take().ok_or(ConvertError::NoOutputPipe)?;
        let stderr = child.stderr.take().ok_or(ConvertError::NoOutputPipe)?;
        let diagnostics = drain_diagnostics(stdout, stderr, log).await;

        let status = child.wait().await?;
        match status.code() {
            Some(0) => log.info("GS exited."),
            Some(code) => log.warning(format!("GS: Exit Code {code}.")),
            None => log.warning("GS: terminated by signal."),
        }

        Ok(ConversionReport {
            exit_code: status.code(),
            diagnostics,
        })
    }
}

/// Reads both output streams to EOF, logging every non-blank line.
///
/// Lines are split on raw bytes so that non-UTF-8 output cannot stall the
/// child on a full pipe.
async fn drain_diagnostics<O, E>(stdout: O, stderr: E, log: &mut JobLog) -> usize
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out = BufReader::new(stdout).split(b'\n');
    let mut err = BufReader::new(stderr).split(b'\n');
    let (mut out_open, mut err_open) = (true, true);
    let mut count = 0;

    while out_open || err_open {
        let (from_stdout, segment) = tokio::select! {
            seg = out.next_segment(), if out_open => (true, seg),
            seg = err.next_segment(), if err_open => (false, seg),
        };

        match segment {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes);
                let line = line.trim_end_matches('\r');
                if !line.trim().is_empty() {
                    log.warning(format!("GS: {line}"));
                    count += 1;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read converter output"),
        }

        if from_stdout {
            out_open = false;
        } else {
            err_open = false;
        }
    }

    count
}
