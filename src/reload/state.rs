//! Observable lifecycle state of a watched folder.
//!
//! ```text
//! Idle -> Watching <-> Debouncing(path) -> Loading(path) -> Applying(path) -> Watching
//! any running state -> Stopped
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadState {
    /// Built but never started.
    Idle,
    Watching,
    /// Changes pending for this path (the next one due).
    Debouncing(PathBuf),
    /// The loader is parsing this file.
    Loading(PathBuf),
    /// Diff for this file is being applied to the engine.
    Applying(PathBuf),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Loading,
    Applying,
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    debouncing: Option<PathBuf>,
    in_flight: Option<(Stage, PathBuf)>,
}

/// Shared state cell written by the event loop and the coordinator.
#[derive(Debug, Clone)]
pub struct StateTracker {
    inner: Arc<Mutex<Inner>>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                phase: Phase::Idle,
                debouncing: None,
                in_flight: None,
            })),
        }
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ReloadState {
        let inner = self.inner.lock();
        match inner.phase {
            Phase::Idle => ReloadState::Idle,
            Phase::Stopped => ReloadState::Stopped,
            Phase::Running => match (&inner.in_flight, &inner.debouncing) {
                (Some((Stage::Loading, path)), _) => ReloadState::Loading(path.clone()),
                (Some((Stage::Applying, path)), _) => ReloadState::Applying(path.clone()),
                (None, Some(path)) => ReloadState::Debouncing(path.clone()),
                (None, None) => ReloadState::Watching,
            },
        }
    }

    pub(crate) fn mark_running(&self) {
        let mut inner = self.inner.lock();
        inner.phase = Phase::Running;
        inner.debouncing = None;
        inner.in_flight = None;
    }

    pub(crate) fn mark_stopped(&self) {
        let mut inner = self.inner.lock();
        inner.phase = Phase::Stopped;
        inner.debouncing = None;
    }

    pub(crate) fn set_debouncing(&self, path: Option<PathBuf>) {
        self.inner.lock().debouncing = path;
    }

    pub(crate) fn set_in_flight(&self, stage: Stage, path: PathBuf) {
        self.inner.lock().in_flight = Some((stage, path));
    }

    pub(crate) fn clear_in_flight(&self) {
        self.inner.lock().in_flight = None;
    }
}
