//! Lifecycle of a watched folder: start, stop and the public handle.
//!
//! ```text
//! start() ──> watch task:  FolderChangeSource -> Debouncer ──┐
//!                                                            │ Settled
//!             worker task: ReloadCoordinator  <──────────────┘
//! stop()  ──> cancel timers, close source, wait for in-flight reload
//! ```

mod builder;
mod event_loop;

pub use builder::RouteReloaderBuilder;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ReloadSettings;
use crate::reload::{
    BroadcastObserver, EventEmitter, RegistryView, ReloadCoordinator, ReloadError, ReloadEvent,
    ReloadOutcome, ReloadState, ReloadStats, RouteDefinition, StateTracker,
};
use crate::watcher::{ActiveBackend, ChangeKind, FolderChangeSource, Settled, WatchError};

use event_loop::{WatchLoop, run_worker, scan_folder};

/// Background tasks of a started reloader.
struct Running {
    shutdown: CancellationToken,
    jobs: mpsc::UnboundedSender<Settled>,
    backend: ActiveBackend,
    /// Canonical root of the watched folder.
    root: PathBuf,
    watch_task: JoinHandle<()>,
    worker_task: JoinHandle<()>,
}

/// Keeps the routes of an engine in sync with a folder of definition files.
pub struct RouteReloader {
    settings: ReloadSettings,
    coordinator: Arc<ReloadCoordinator>,
    broadcast: Arc<BroadcastObserver>,
    state: StateTracker,
    running: Option<Running>,
}

impl RouteReloader {
    /// Create a builder for configuring the reloader.
    pub fn builder() -> RouteReloaderBuilder {
        RouteReloaderBuilder::new()
    }

    /// Start watching.
    ///
    /// Returns once the watch is established; reloads happen on background
    /// tasks of the current tokio runtime. Calling it while running is a no-op.
    pub fn start(&mut self) -> Result<(), ReloadError> {
        if self.running.is_some() {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|e| WatchError::InitFailed {
            reason: format!("start() must be called within a tokio runtime: {e}"),
        })?;

        let (source, events) = FolderChangeSource::start(
            &self.settings.watched_folder(),
            self.settings.watch_backend(),
        )?;
        let backend = source.active_backend();
        let root = source.folder().root().to_path_buf();
        let shutdown = CancellationToken::new();
        let (jobs, jobs_rx) = mpsc::unbounded_channel();

        if self.settings.load_existing {
            let existing = scan_folder(source.folder());
            crate::log_event!("reloader", "loading existing", "{} files", existing.len());
            for path in existing {
                let _ = jobs.send(Settled::now(path, ChangeKind::Created));
            }
        }

        self.state.mark_running();

        let worker_task = runtime.spawn(run_worker(
            Arc::clone(&self.coordinator),
            jobs_rx,
            shutdown.clone(),
        ));
        let watch_loop = WatchLoop::new(
            source,
            events,
            &self.settings,
            jobs.clone(),
            &self.coordinator,
            self.state.clone(),
            shutdown.clone(),
        );
        let watch_task = runtime.spawn(watch_loop.run());

        crate::log_event!(
            "reloader",
            "started",
            "{} (debounce {:?})",
            self.settings.folder.display(),
            self.settings.debounce()
        );

        self.running = Some(Running {
            shutdown,
            jobs,
            backend,
            root,
            watch_task,
            worker_task,
        });
        Ok(())
    }

    /// Stop watching.
    ///
    /// Pending timers are cancelled immediately and no further settle fires.
    /// A reload already in progress finishes before this returns.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.shutdown.cancel();
        drop(running.jobs);

        if let Err(e) = running.worker_task.await {
            tracing::error!("[reloader] reload worker failed: {e}");
        }
        if let Err(e) = running.watch_task.await {
            tracing::error!("[reloader] watch task failed: {e}");
        }

        self.state.mark_stopped();
        crate::log_event!("reloader", "stopped", "{}", self.settings.folder.display());
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Change-detection backend in use, once started.
    pub fn active_backend(&self) -> Option<ActiveBackend> {
        self.running.as_ref().map(|r| r.backend)
    }

    pub fn state(&self) -> ReloadState {
        self.state.current()
    }

    /// Read-only view of the deployed routes.
    pub fn registry(&self) -> RegistryView {
        self.coordinator.registry()
    }

    /// Observer registry; observers added here are called synchronously.
    pub fn events(&self) -> &Arc<EventEmitter> {
        self.coordinator.events()
    }

    /// Receive every reload event asynchronously.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.broadcast.subscribe()
    }

    pub fn stats(&self) -> ReloadStats {
        self.coordinator.stats()
    }

    pub fn settings(&self) -> &ReloadSettings {
        &self.settings
    }

    /// Install or replace the error hook.
    pub fn on_reload_error(&self, handler: impl Fn(&ReloadError) + Send + Sync + 'static) {
        self.coordinator.reporter().set_handler(Arc::new(handler));
    }

    /// Deploy a route that no watched file owns.
    pub async fn register_external(
        &self,
        id: &str,
        definition: RouteDefinition,
    ) -> Result<ReloadOutcome, ReloadError> {
        self.coordinator.register_external(id, definition).await
    }

    /// Queue a reload of `path` without waiting for a change.
    ///
    /// Relative paths are taken from the watched folder. A path that no longer
    /// exists retires the routes it owned.
    pub fn trigger(&self, path: impl AsRef<Path>) -> Result<(), ReloadError> {
        let running = self.running.as_ref().ok_or(ReloadError::NotRunning)?;
        let path = resolve_in(&running.root, path.as_ref());
        running
            .jobs
            .send(Settled::now(path, ChangeKind::Modified))
            .map_err(|_| ReloadError::NotRunning)
    }
}

/// Canonical form of `path` inside `root`, also for files already deleted.
fn resolve_in(root: &Path, path: &Path) -> PathBuf {
    let joined = root.join(path);
    if let Ok(canonical) = joined.canonicalize() {
        return canonical;
    }
    match (joined.parent().map(Path::canonicalize), joined.file_name()) {
        (Some(Ok(parent)), Some(name)) => parent.join(name),
        _ => joined,
    }
}

impl Drop for RouteReloader {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}
