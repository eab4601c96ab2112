//! Reload error taxonomy and the host-facing error hook.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use super::loader::ParseError;
use super::manager::ApplyError;
use crate::watcher::WatchError;

/// Everything that can go wrong while keeping routes in sync.
///
/// None of these stop the reloader; previously good routes stay deployed.
#[derive(Error, Debug)]
pub enum ReloadError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine rejected a route. `restored` lists ids put back from their
    /// last known-good definition, `lost` those that could not be restored.
    #[error("Failed to apply reload: {source}")]
    Apply {
        path: Option<PathBuf>,
        #[source]
        source: ApplyError,
        restored: Vec<String>,
        lost: Vec<String>,
    },

    #[error("Reloader is not running")]
    NotRunning,
}

impl ReloadError {
    /// File the error relates to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ReloadError::Parse { path, .. } | ReloadError::Read { path, .. } => Some(path.as_path()),
            ReloadError::Apply { path, .. } => path.as_deref(),
            ReloadError::Watch(
                WatchError::FolderMissing { path }
                | WatchError::FolderUnavailable { path, .. }
                | WatchError::PathWatchFailed { path, .. },
            ) => Some(path.as_path()),
            _ => None,
        }
    }

    /// Route the engine rejected, for apply errors.
    pub fn route_id(&self) -> Option<&str> {
        match self {
            ReloadError::Apply { source, .. } => Some(source.id.as_str()),
            _ => None,
        }
    }
}

/// Callback receiving every reload error.
pub type ErrorHandler = Arc<dyn Fn(&ReloadError) + Send + Sync>;

/// Logs errors and forwards them to the optional host hook.
#[derive(Clone, Default)]
pub struct ErrorReporter {
    handler: Arc<RwLock<Option<ErrorHandler>>>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the host hook.
    pub fn set_handler(&self, handler: ErrorHandler) {
        *self.handler.write() = Some(handler);
    }

    pub fn report(&self, error: &ReloadError) {
        match error {
            ReloadError::Apply { restored, lost, .. } if !lost.is_empty() => {
                tracing::error!("[reload] {error} (restored: {restored:?}, lost: {lost:?})");
            }
            ReloadError::Apply { restored, .. } => {
                tracing::warn!("[reload] {error} (restored: {restored:?})");
            }
            _ => tracing::warn!("[reload] {error}"),
        }

        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(error))).is_err() {
                tracing::error!("[reload] error hook panicked while handling: {error}");
            }
        }
    }
}
