//! Directory watcher with notify integration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecursiveMode},
    DebounceEventResult, DebouncedEvent,
};
use tokio::sync::mpsc;

use super::error::WatcherError;
use crate::config::{snapshot, SharedConfig};

/// Debounce window for raw filesystem events.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// How often the bridge thread checks for a stop request.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Watches the input directory for new work files.
///
/// Matching paths are sent on an unbounded channel so the notify thread is
/// never blocked by a slow consumer. The name filter is read from the shared
/// configuration for every batch, so a filter change applies immediately.
pub struct JobDirectoryWatcher {
    watch_dir: PathBuf,
    stop_tx: std_mpsc::Sender<()>,
}

impl JobDirectoryWatcher {
    /// Starts watching `watch_dir` (non-recursively).
    ///
    /// Returns the watcher and a receiver of work file paths. Dropping the
    /// watcher stops the watch.
    ///
    /// # Errors
    ///
    /// Returns an error if `watch_dir` is not a directory or the watch
    /// cannot be registered.
    pub fn new(
        watch_dir: PathBuf,
        config: SharedConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PathBuf>), WatcherError> {
        if !watch_dir.is_dir() {
            return Err(WatcherError::NotADirectory(watch_dir));
        }

        let (path_tx, path_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (notify_tx, notify_rx) = std_mpsc::channel();

        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result| {
            let _ = notify_tx.send(result);
        })?;
        debouncer.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        thread::Builder::new()
            .name("job-watcher".into())
            .spawn(move || {
                loop {
                    if stop_rx.try_recv().is_ok() {
                        break;
                    }
                    match notify_rx.recv_timeout(STOP_POLL) {
                        Ok(result) => {
                            if !Self::handle_debounce_result(result, &config, &path_tx) {
                                break;
                            }
                        }
                        Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                        Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                // keep the debouncer alive until the thread exits
                drop(debouncer);
                tracing::debug!("Directory watcher stopped");
            })
            .map_err(WatcherError::Thread)?;

        tracing::info!(dir = %watch_dir.display(), "Watching input directory");
        Ok((Self { watch_dir, stop_tx }, path_rx))
    }

    /// Forwards matching paths; returns `false` once the receiver is gone.
    fn handle_debounce_result(
        result: DebounceEventResult,
        config: &SharedConfig,
        path_tx: &mpsc::UnboundedSender<PathBuf>,
    ) -> bool {
        match result {
            Ok(events) => {
                let filter = snapshot(config);
                for path in created_paths(&events) {
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if !filter.matches_filter(name) || path.is_dir() {
                        tracing::trace!(path = %path.display(), "Ignoring created entry");
                        continue;
                    }
                    tracing::debug!(path = %path.display(), "Work file detected");
                    if path_tx.send(path).is_err() {
                        return false;
                    }
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::warn!(error = %error, "Directory watch error");
                }
            }
        }
        true
    }

    /// Get the directory being watched.
    #[must_use]
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }
}

impl Drop for JobDirectoryWatcher {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Paths from creation events, each at most once per batch, in event order.
fn created_paths(events: &[DebouncedEvent]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|event| matches!(event.kind, EventKind::Create(_)))
        .flat_map(|event| event.paths.iter())
        .filter(|path| seen.insert((*path).clone()))
        .cloned()
        .collect()
}
