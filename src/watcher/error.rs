//! Watcher error types.

use std::path::PathBuf;

/// Errors that can occur while setting up a directory watch.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// The watch target is missing or not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The bridge thread could not be started.
    #[error("Failed to start watcher thread: {0}")]
    Thread(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_a_directory_display() {
        let err = WatcherError::NotADirectory(PathBuf::from("/spool/in"));
        assert_eq!(err.to_string(), "Not a directory: /spool/in");
    }

    #[test]
    fn test_from_notify_error() {
        let notify_err = notify::Error::generic("test error");
        let watcher_err: WatcherError = notify_err.into();
        assert!(matches!(watcher_err, WatcherError::Notify(_)));
        assert!(watcher_err.to_string().contains("File watcher error"));
    }
}
