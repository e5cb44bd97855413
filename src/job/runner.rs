//! The per-file job pipeline.
//!
//! A job owns one work file from detection to a terminal state:
//!
//! ```text
//! Ready -> InProgress -> move to working dir -> parse -> write marks
//!       -> convert -> Successful -> publish -> clean up -> sidecar log
//! ```
//!
//! Any error after `InProgress` ends the job in `Failed`; the steps that
//! already ran are not rolled back.

use std::fmt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::log::{JobLog, JobLogEntry};
use super::parser::{retain_existing, WorkFile};
use super::paths::JobPaths;
use super::state::JobState;
use crate::config::ServiceConfig;
use crate::convert::{ConvertError, Converter};

/// Unique job identifier.
pub type JobId = Uuid;

/// Called exactly once when the job leaves active processing.
pub type EndCallback = Box<dyn FnOnce(JobState) + Send>;

/// Errors that end a job in `Failed`.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    /// The work file disappeared before it could be moved.
    #[error("Input file {0} no longer exists")]
    InputMissing(PathBuf),

    /// The work file stayed locked for every allowed check.
    #[error("Input file {path} still locked after {attempts} checks")]
    InputLocked { path: PathBuf, attempts: u32 },

    /// A filesystem step failed.
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The converter could not be run.
    #[error("Conversion failed: {0}")]
    Convert(#[from] ConvertError),
}

impl JobError {
    fn io<'a>(
        action: &'static str,
        path: &'a Path,
    ) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One unit of work for one detected work file.
pub struct Job {
    id: JobId,
    file_name: String,
    input_path: PathBuf,
    state: JobState,
    log: JobLog,
    sources: Vec<PathBuf>,
    on_end: Option<EndCallback>,
}

impl Job {
    /// Creates a job for the work file at `input_path`.
    #[must_use]
    pub fn new(file_name: impl Into<String>, input_path: impl Into<PathBuf>) -> Self {
        let file_name = file_name.into();
        let mut log = JobLog::new(file_name.clone());
        log.info("Job initialized.");

        Self {
            id: Uuid::new_v4(),
            file_name,
            input_path: input_path.into(),
            state: JobState::Ready,
            log,
            sources: Vec::new(),
            on_end: None,
        }
    }

    /// Creates a job named after the last component of `path`.
    ///
    /// Returns `None` if the path has no valid UTF-8 file name.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Some(Self::new(name, path))
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    #[must_use]
    pub fn log(&self) -> &JobLog {
        &self.log
    }

    /// Source documents that survived filtering, in merge order.
    #[must_use]
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Registers a listener for log entries appended from now on.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&JobLogEntry) + Send + Sync + 'static,
    {
        self.log.subscribe(listener);
    }

    /// Sets the terminal callback, replacing any previous one.
    pub fn on_end<F>(&mut self, callback: F)
    where
        F: FnOnce(JobState) + Send + 'static,
    {
        self.on_end = Some(Box::new(callback));
    }

    fn transition(&mut self, next: JobState) {
        tracing::debug!(job = %self.file_name, from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    /// Runs the pipeline to a terminal state and fires the terminal callback.
    ///
    /// `config` is the snapshot taken when the worker picked the job up.
    pub async fn run(&mut self, config: &ServiceConfig, converter: &dyn Converter) -> JobState {
        self.transition(JobState::InProgress);
        self.log.info("Job started.");

        let paths = JobPaths::new(&self.input_path, &self.file_name, config);
        match self.process(&paths, config, converter).await {
            Ok(state) => self.transition(state),
            Err(e) => {
                self.transition(JobState::Failed);
                self.log
                    .error(format!("Exception while processing job. - {e}"));
            }
        }

        self.finish();
        self.state
    }

    async fn process(
        &mut self,
        paths: &JobPaths,
        config: &ServiceConfig,
        converter: &dyn Converter,
    ) -> Result<JobState, JobError> {
        // Move the work file out of the input directory.
        tokio::fs::create_dir_all(&config.working_dir)
            .await
            .map_err(JobError::io("create", &config.working_dir))?;
        remove_if_exists(&paths.working)
            .await
            .map_err(JobError::io("remove", &paths.working))?;
        self.wait_until_unlocked(&paths.input, config).await?;
        move_file(&paths.input, &paths.working)
            .await
            .map_err(JobError::io("move", &paths.input))?;
        self.log.info("Input file moved to working directory.");

        // Collect the documents to merge.
        let raw = tokio::fs::read(&paths.working)
            .await
            .map_err(JobError::io("read", &paths.working))?;
        let work_file = WorkFile::parse(&String::from_utf8_lossy(&raw));
        self.sources = retain_existing(work_file.references(), &mut self.log);
        if self.sources.is_empty() {
            self.log.warning("No Files to concatenate found, exit!");
            return Ok(JobState::Skipped);
        }
        self.log.info(format!(
            "Found {} files to concatenate.",
            self.sources.len()
        ));

        // The marks file always goes last and is not existence-checked.
        let mut marks = work_file.marks_header().join("\n");
        marks.push('\n');
        tokio::fs::write(&paths.marks, marks)
            .await
            .map_err(JobError::io("write", &paths.marks))?;
        self.log.info("PDFMarks file written.");
        let mut inputs = self.sources.clone();
        inputs.push(paths.marks.clone());

        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(JobError::io("create", &config.output_dir))?;
        self.log
            .info(format!("Writing to: {}", paths.temp_output.display()));
        let report = converter
            .convert(&inputs, &paths.temp_output, &mut self.log)
            .await?;
        if !report.exited_cleanly() {
            // the output is still published; the log carries the exit code
            tracing::warn!(
                job = %self.file_name,
                exit_code = ?report.exit_code,
                diagnostics = report.diagnostics,
                "Converter reported an error"
            );
        }
        self.transition(JobState::Successful);

        // rename replaces an existing target in one step
        tokio::fs::rename(&paths.temp_output, &paths.output)
            .await
            .map_err(JobError::io("publish", &paths.temp_output))?;
        self.log.info("Output file renamed.");

        for temp in [&paths.working, &paths.marks] {
            remove_if_exists(temp)
                .await
                .map_err(JobError::io("remove", temp))?;
        }
        if !config.keep_source_files {
            self.log.info("Source files deleted.");
            for source in &self.sources {
                remove_if_exists(source)
                    .await
                    .map_err(JobError::io("remove", source))?;
            }
        }
        self.log.info("Temp files deleted. Job succeeded.");

        if config.write_job_log_files {
            let mut text = self.log.rendered_lines().join("\n");
            text.push('\n');
            tokio::fs::write(&paths.job_log, text)
                .await
                .map_err(JobError::io("write", &paths.job_log))?;
        }

        Ok(JobState::Successful)
    }

    /// Polls until the work file can be opened for exclusive read/write.
    async fn wait_until_unlocked(
        &mut self,
        path: &Path,
        config: &ServiceConfig,
    ) -> Result<(), JobError> {
        let mut attempts: u32 = 0;
        loop {
            match open_exclusive(path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(JobError::InputMissing(path.to_path_buf()));
                }
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    if config.lock_max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(JobError::InputLocked {
                            path: path.to_path_buf(),
                            attempts,
                        });
                    }
                    if attempts == 1 {
                        self.log.info("Waiting for input file to be released.");
                    }
                    tracing::trace!(job = %self.file_name, error = %e, attempts, "Input still locked");
                    tokio::time::sleep(config.lock_poll_interval()).await;
                }
            }
        }
    }

    /// Fires the terminal callback once.
    fn finish(&mut self) {
        self.log.clear_listeners();
        if let Some(callback) = self.on_end.take() {
            callback(self.state);
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self.on_end.is_none() {
            return;
        }
        if !self.state.is_terminal() {
            self.transition(JobState::Failed);
            self.log.error("Job aborted before completion.");
        }
        self.finish();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("file_name", &self.file_name)
            .field("input_path", &self.input_path)
            .field("state", &self.state)
            .field("log", &self.log)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

/// Succeeds once nobody else holds the file.
///
/// Windows refuses the share-nothing open while a producer still has the file
/// open. Unix has no mandatory locks, so there only producers that take an
/// advisory lock are seen; one that writes without a lock is not detected and
/// should write elsewhere and rename the finished file into the input
/// directory.
async fn open_exclusive(path: &Path) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.read(true).write(true);
    #[cfg(windows)]
    options.share_mode(0);
    let file = options.open(path).await?.into_std().await;
    // released when `file` is dropped
    file.try_lock().map_err(std::io::Error::from)
}

/// Renames `from` to `to`, copying across filesystems when rename fails.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Err(e) = tokio::fs::rename(from, to).await {
        tracing::debug!(error = %e, from = %from.display(), "Rename failed, copying instead");
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
