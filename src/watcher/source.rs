//! Folder change source backed by `notify`.
//!
//! One interface, two detection strategies: native OS notifications
//! (`RecommendedWatcher`) or periodic scanning (`PollWatcher`). Both feed
//! the same channel of [`SourceEvent`]s, filtered against the [`WatchedFolder`].

use std::path::Path;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::error::WatchError;
use super::event::{ChangeEvent, ChangeKind, WatchedFolder};

/// Capacity of the raw event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Item delivered by a [`FolderChangeSource`].
pub type SourceEvent = Result<ChangeEvent, WatchError>;

/// Change detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchBackend {
    /// Native notifications, falling back to polling at `poll_interval`
    /// when the platform watcher cannot be set up.
    Auto { poll_interval: Duration },
    /// Native OS notifications only.
    Native,
    /// Scan the folder every `interval`.
    Polling { interval: Duration },
}

impl Default for WatchBackend {
    fn default() -> Self {
        WatchBackend::Auto {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Backend actually in use after start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveBackend {
    Native,
    Polling,
}

/// Observes one directory and yields [`ChangeEvent`]s asynchronously.
pub struct FolderChangeSource {
    /// Folder with its root canonicalized.
    folder: WatchedFolder,
    active: ActiveBackend,
    watcher: Box<dyn Watcher + Send>,
}

impl FolderChangeSource {
    /// Start watching `folder`.
    ///
    /// Returns immediately; events arrive on the returned receiver. Fails with
    /// [`WatchError::FolderMissing`] if the folder is absent or not readable.
    pub fn start(
        folder: &WatchedFolder,
        backend: WatchBackend,
    ) -> Result<(Self, mpsc::Receiver<SourceEvent>), WatchError> {
        check_folder(folder.root())?;
        let folder = folder
            .canonicalized()
            .map_err(|e| WatchError::FolderUnavailable {
                path: folder.root().to_path_buf(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (watcher, active) = create_watcher(&folder, backend, &tx)?;

        crate::log_event!(
            "watcher",
            "started",
            "{} ({active:?}, recursive={})",
            folder.root().display(),
            folder.is_recursive()
        );

        Ok((
            Self {
                folder,
                active,
                watcher,
            },
            rx,
        ))
    }

    pub fn folder(&self) -> &WatchedFolder {
        &self.folder
    }

    pub fn active_backend(&self) -> ActiveBackend {
        self.active
    }

    /// Verify the folder is still a readable directory.
    pub fn check_available(&self) -> Result<(), WatchError> {
        check_folder(self.folder.root()).map_err(|e| WatchError::FolderUnavailable {
            path: self.folder.root().to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Re-register the folder with the underlying watcher.
    ///
    /// Used after the folder disappeared and came back.
    pub fn rewatch(&mut self) -> Result<(), WatchError> {
        self.check_available()?;
        let root = self.folder.root();
        let _ = self.watcher.unwatch(root);
        self.watcher
            .watch(root, recursive_mode(&self.folder))
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
        crate::debug_event!("watcher", "rewatched", "{}", root.display());
        Ok(())
    }

    /// Stop watching. No further events are produced.
    pub fn stop(mut self) {
        let _ = self.watcher.unwatch(self.folder.root());
        crate::log_event!("watcher", "stopped", "{}", self.folder.root().display());
    }
}

fn recursive_mode(folder: &WatchedFolder) -> RecursiveMode {
    if folder.is_recursive() {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}

fn check_folder(root: &Path) -> Result<(), WatchError> {
    if !root.is_dir() {
        return Err(WatchError::FolderMissing {
            path: root.to_path_buf(),
        });
    }
    std::fs::read_dir(root).map_err(|e| WatchError::FolderUnavailable {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(())
}

fn create_watcher(
    folder: &WatchedFolder,
    backend: WatchBackend,
    tx: &mpsc::Sender<SourceEvent>,
) -> Result<(Box<dyn Watcher + Send>, ActiveBackend), WatchError> {
    match backend {
        WatchBackend::Native => Ok((native_watcher(folder, tx)?, ActiveBackend::Native)),
        WatchBackend::Polling { interval } => Ok((
            polling_watcher(folder, tx, interval)?,
            ActiveBackend::Polling,
        )),
        WatchBackend::Auto { poll_interval } => match native_watcher(folder, tx) {
            Ok(watcher) => Ok((watcher, ActiveBackend::Native)),
            Err(e) => {
                tracing::warn!("[watcher] native watcher unavailable, polling instead: {e}");
                Ok((
                    polling_watcher(folder, tx, poll_interval)?,
                    ActiveBackend::Polling,
                ))
            }
        },
    }
}

fn native_watcher(
    folder: &WatchedFolder,
    tx: &mpsc::Sender<SourceEvent>,
) -> Result<Box<dyn Watcher + Send>, WatchError> {
    let mut watcher = RecommendedWatcher::new(event_handler(folder, tx), Config::default())?;
    watch_root(&mut watcher, folder)?;
    Ok(Box::new(watcher))
}

fn polling_watcher(
    folder: &WatchedFolder,
    tx: &mpsc::Sender<SourceEvent>,
    interval: Duration,
) -> Result<Box<dyn Watcher + Send>, WatchError> {
    // mtime has one-second resolution; hash contents so quick rewrites are seen
    let config = Config::default()
        .with_poll_interval(interval)
        .with_compare_contents(true);
    let mut watcher = PollWatcher::new(event_handler(folder, tx), config)?;
    watch_root(&mut watcher, folder)?;
    Ok(Box::new(watcher))
}

fn watch_root(watcher: &mut dyn Watcher, folder: &WatchedFolder) -> Result<(), WatchError> {
    watcher
        .watch(folder.root(), recursive_mode(folder))
        .map_err(|e| WatchError::PathWatchFailed {
            path: folder.root().to_path_buf(),
            reason: e.to_string(),
        })
}

/// Callback run on the notify thread, forwarding translated events.
fn event_handler(
    folder: &WatchedFolder,
    tx: &mpsc::Sender<SourceEvent>,
) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    let folder = folder.clone();
    let tx = tx.clone();
    move |res: notify::Result<Event>| {
        let events = match res {
            Ok(event) => translate(&folder, event),
            Err(e) => vec![Err(WatchError::EventError {
                details: e.to_string(),
            })],
        };
        for event in events {
            // Receiver gone means the reloader stopped
            if tx.blocking_send(event).is_err() {
                return;
            }
        }
    }
}

/// Map a notify event onto zero or more change events for accepted paths.
pub(crate) fn translate(folder: &WatchedFolder, event: Event) -> Vec<SourceEvent> {
    if matches!(event.kind, EventKind::Remove(_))
        && event.paths.iter().any(|p| p == folder.root())
    {
        return vec![Err(WatchError::FolderUnavailable {
            path: folder.root().to_path_buf(),
            reason: "folder was removed".to_string(),
        })];
    }

    let changes: Vec<(&Path, ChangeKind)> = match event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| (p.as_path(), ChangeKind::Created))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| (p.as_path(), ChangeKind::Deleted))
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event
                .paths
                .iter()
                .map(|p| (p.as_path(), ChangeKind::Deleted))
                .collect(),
            RenameMode::To => event
                .paths
                .iter()
                .map(|p| (p.as_path(), ChangeKind::Created))
                .collect(),
            RenameMode::Both => {
                let mut changes = Vec::new();
                if let Some(from) = event.paths.first() {
                    changes.push((from.as_path(), ChangeKind::Deleted));
                }
                if let Some(to) = event.paths.get(1) {
                    changes.push((to.as_path(), ChangeKind::Created));
                }
                changes
            }
            _ => event
                .paths
                .iter()
                .map(|p| {
                    let kind = if p.exists() {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Deleted
                    };
                    (p.as_path(), kind)
                })
                .collect(),
        },
        EventKind::Modify(_) | EventKind::Any => event
            .paths
            .iter()
            .map(|p| (p.as_path(), ChangeKind::Modified))
            .collect(),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    };

    changes
        .into_iter()
        .filter(|(path, _)| {
            let accepted = folder.accepts(path);
            if !accepted {
                crate::debug_event!("watcher", "ignored", "{}", path.display());
            }
            accepted
        })
        .map(|(path, kind)| Ok(ChangeEvent::new(path.to_path_buf(), kind)))
        .collect()
}
