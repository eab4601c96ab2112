//! Background tasks: the watch loop and the reload worker.
//!
//! The watch loop owns the change source and the debouncer and never waits on
//! a reload. Settled paths go through an unbounded queue to a single worker,
//! which hands them to the coordinator one at a time.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::ReloadSettings;
use crate::reload::{ErrorReporter, RegistryView, ReloadCoordinator, ReloadError, StateTracker};
use crate::watcher::{
    ChangeEvent, ChangeKind, Debouncer, FolderChangeSource, Settled, SourceEvent, WatchError,
    WatchedFolder,
};

/// Files currently in `folder` that it accepts, in path order.
pub(super) fn scan_folder(folder: &WatchedFolder) -> Vec<PathBuf> {
    let max_depth = if folder.is_recursive() { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(folder.root())
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| folder.accepts(path))
        .collect();
    files.sort();
    files
}

/// Folder lost; waiting to re-establish the watch.
#[derive(Debug)]
struct Outage {
    backoff: Duration,
    next_attempt: Instant,
}

pub(super) struct WatchLoop {
    source: FolderChangeSource,
    events: mpsc::Receiver<SourceEvent>,
    debouncer: Debouncer,
    jobs: mpsc::UnboundedSender<Settled>,
    reporter: ErrorReporter,
    registry: RegistryView,
    state: StateTracker,
    shutdown: CancellationToken,
    health_interval: Duration,
    retry_initial: Duration,
    retry_max: Duration,
}

impl WatchLoop {
    pub(super) fn new(
        source: FolderChangeSource,
        events: mpsc::Receiver<SourceEvent>,
        settings: &ReloadSettings,
        jobs: mpsc::UnboundedSender<Settled>,
        coordinator: &ReloadCoordinator,
        state: StateTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            events,
            debouncer: Debouncer::new(settings.debounce()),
            jobs,
            reporter: coordinator.reporter().clone(),
            registry: coordinator.registry(),
            state,
            shutdown,
            health_interval: settings.poll_interval(),
            retry_initial: settings.retry_initial(),
            retry_max: settings.retry_max(),
        }
    }

    pub(super) async fn run(mut self) {
        let mut health =
            tokio::time::interval_at(Instant::now() + self.health_interval, self.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut outage: Option<Outage> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(settled) = self.debouncer.next_settled(), if self.debouncer.has_pending() => {
                    self.dispatch(settled);
                }

                Some(event) = self.events.recv() => {
                    self.on_source_event(event, &mut outage);
                }

                _ = health.tick() => {
                    self.check_health(&mut outage);
                }
            }

            self.state
                .set_debouncing(self.debouncer.next_due().map(Path::to_path_buf));
        }

        let discarded = self.debouncer.cancel_all();
        self.state.set_debouncing(None);
        if discarded > 0 {
            crate::debug_event!("watcher", "discarded", "{discarded} pending changes");
        }
        self.source.stop();
    }

    fn dispatch(&self, settled: Settled) {
        crate::debug_event!(
            "debounce",
            "settled",
            "{} ({:?}, {} events)",
            settled.path.display(),
            settled.last_kind,
            settled.events
        );
        if self.jobs.send(settled).is_err() {
            crate::debug_event!("watcher", "worker gone, dropping settle");
        }
    }

    fn on_source_event(&mut self, event: SourceEvent, outage: &mut Option<Outage>) {
        match event {
            Ok(change) => self.debouncer.record(change),
            Err(error @ WatchError::FolderUnavailable { .. }) => self.begin_outage(error, outage),
            Err(error) => self.reporter.report(&ReloadError::Watch(error)),
        }
    }

    /// Report a lost folder once and schedule the first re-watch attempt.
    fn begin_outage(&self, error: WatchError, outage: &mut Option<Outage>) {
        if outage.is_some() {
            return;
        }
        self.reporter.report(&ReloadError::Watch(error));
        *outage = Some(Outage {
            backoff: self.retry_initial,
            next_attempt: Instant::now() + self.retry_initial,
        });
    }

    fn check_health(&mut self, outage: &mut Option<Outage>) {
        let Some(current) = outage.as_mut() else {
            if let Err(error) = self.source.check_available() {
                self.begin_outage(error, outage);
            }
            return;
        };

        let now = Instant::now();
        if now < current.next_attempt {
            return;
        }

        match self.source.rewatch() {
            Ok(()) => {
                *outage = None;
                crate::log_event!(
                    "watcher",
                    "recovered",
                    "{}",
                    self.source.folder().root().display()
                );
                self.resync();
            }
            Err(e) => {
                current.backoff = (current.backoff * 2).min(self.retry_max);
                current.next_attempt = now + current.backoff;
                crate::debug_event!(
                    "watcher",
                    "rewatch failed",
                    "{e}; retrying in {:?}",
                    current.backoff
                );
            }
        }
    }

    /// Queue every file that may have changed while the watch was down.
    fn resync(&mut self) {
        let mut paths: BTreeSet<PathBuf> = scan_folder(self.source.folder()).into_iter().collect();
        paths.extend(self.registry.owners());

        for path in paths {
            let kind = if path.exists() {
                ChangeKind::Modified
            } else {
                ChangeKind::Deleted
            };
            self.debouncer.record(ChangeEvent::new(path, kind));
        }
    }
}

/// Consume settled paths one at a time until shutdown.
///
/// A reload in progress when shutdown is requested runs to completion.
pub(super) async fn run_worker(
    coordinator: Arc<ReloadCoordinator>,
    mut jobs: mpsc::UnboundedReceiver<Settled>,
    shutdown: CancellationToken,
) {
    loop {
        let settled = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(settled) => settled,
                None => break,
            },
        };

        // Failures are logged and forwarded to the error hook by the coordinator
        let _ = coordinator.handle_settled(&settled).await;
    }

    crate::debug_event!("worker", "stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_folder_respects_filter_and_depth() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.toml"), "").unwrap();
        std::fs::write(dir.path().join("a.toml"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.toml"), "").unwrap();

        let flat = WatchedFolder::new(dir.path()).extensions(["toml"]);
        assert_eq!(
            scan_folder(&flat),
            vec![dir.path().join("a.toml"), dir.path().join("b.toml")]
        );

        let deep = WatchedFolder::new(dir.path())
            .recursive(true)
            .extensions(["toml"]);
        assert_eq!(scan_folder(&deep).len(), 3);
    }
}
