//! Error types for the folder watcher.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
///
/// None of these are fatal: the reloader reports them and keeps running.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watched folder {} does not exist or is not a directory", .path.display())]
    FolderMissing { path: PathBuf },

    #[error("Watched folder {} became unavailable: {reason}", .path.display())]
    FolderUnavailable { path: PathBuf, reason: String },

    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {}: {reason}", .path.display())]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
