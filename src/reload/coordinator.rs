//! Reload coordinator: load, diff and apply one settled file at a time.
//!
//! The coordinator owns the [`ActiveRegistry`]. Every reload, whether it
//! comes from the watcher or a direct call, takes the same async mutex, so two
//! files never mutate the registry concurrently. Registry updates happen
//! before the matching [`ReloadEvent`] is published, so observers always see
//! committed state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::diff::{self, RouteDiff, RouteOp};
use super::error::{ErrorReporter, ReloadError};
use super::events::{EventEmitter, ReloadEvent};
use super::fingerprint::{Fingerprint, FingerprintCache};
use super::loader::{Loader, ParseError, RouteDefinition, RouteDefinitionSet};
use super::manager::{ApplyError, RouteManager};
use super::registry::{ActiveRegistry, RegistryEntry, RegistryView};
use super::state::{Stage, StateTracker};
use crate::watcher::{ChangeKind, Settled};

/// What a reload changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// Source file, `None` for external registrations.
    pub path: Option<PathBuf>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Ids whose previous instance was removed and re-added with new content.
    pub replaced: Vec<String>,
    /// Content was identical to the last applied version; nothing was done.
    pub unchanged: bool,
}

impl ReloadOutcome {
    fn for_path(path: Option<&Path>) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            ..Self::default()
        }
    }

    fn unchanged(path: &Path) -> Self {
        Self {
            unchanged: true,
            ..Self::for_path(Some(path))
        }
    }

    /// Check if no route was touched.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.replaced.is_empty()
    }
}

/// Counters over the coordinator's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadStats {
    /// Successful reload attempts, including no-ops.
    pub reloads: u64,
    /// Failed reload attempts (parse, read or apply).
    pub failures: u64,
    pub last_reload: Option<DateTime<Utc>>,
}

pub struct ReloadCoordinator {
    loader: Arc<dyn Loader>,
    manager: Arc<dyn RouteManager>,
    registry: Arc<RwLock<ActiveRegistry>>,
    emitter: Arc<EventEmitter>,
    reporter: ErrorReporter,
    state: StateTracker,
    fingerprints: Mutex<FingerprintCache>,
    skip_unchanged: bool,
    /// Serializes every load+apply.
    apply_lock: tokio::sync::Mutex<()>,
    stats: Mutex<ReloadStats>,
}

impl ReloadCoordinator {
    pub fn new(loader: Arc<dyn Loader>, manager: Arc<dyn RouteManager>) -> Self {
        Self {
            loader,
            manager,
            registry: Arc::new(RwLock::new(ActiveRegistry::new())),
            emitter: Arc::new(EventEmitter::new()),
            reporter: ErrorReporter::new(),
            state: StateTracker::new(),
            fingerprints: Mutex::new(FingerprintCache::new()),
            skip_unchanged: true,
            apply_lock: tokio::sync::Mutex::new(()),
            stats: Mutex::new(ReloadStats::default()),
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub(crate) fn with_state(mut self, state: StateTracker) -> Self {
        self.state = state;
        self
    }

    /// Skip reloads whose content matches the last applied version.
    pub fn skip_unchanged(mut self, enabled: bool) -> Self {
        self.skip_unchanged = enabled;
        self
    }

    /// Read-only view of the active registry.
    pub fn registry(&self) -> RegistryView {
        RegistryView::new(Arc::clone(&self.registry))
    }

    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.emitter
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn stats(&self) -> ReloadStats {
        self.stats.lock().clone()
    }

    /// React to a debounced change.
    ///
    /// The file is read again whatever the last event was, so a delete
    /// followed by a re-create reloads instead of retiring.
    pub async fn handle_settled(&self, settled: &Settled) -> Result<ReloadOutcome, ReloadError> {
        if settled.last_kind == ChangeKind::Deleted {
            crate::debug_event!("coordinator", "settled deletion", "{}", settled.path.display());
        }
        self.reload_serialized(&settled.path).await
    }

    /// Reload one file now. A missing file retires the routes it owned.
    pub async fn reload(&self, path: &Path) -> Result<ReloadOutcome, ReloadError> {
        self.reload_serialized(path).await
    }

    /// Deploy a route that no watched file owns.
    ///
    /// An existing instance under the same id is removed first. A file that
    /// later defines this id takes it over.
    pub async fn register_external(
        &self,
        id: &str,
        definition: RouteDefinition,
    ) -> Result<ReloadOutcome, ReloadError> {
        let _guard = self.apply_lock.lock().await;
        let diff = diff::single(&self.registry.read(), id, &definition);
        let outcome = self.apply(None, diff).await?;
        crate::log_event!("coordinator", "registered", "{id}");
        Ok(outcome)
    }

    async fn reload_serialized(&self, path: &Path) -> Result<ReloadOutcome, ReloadError> {
        let _guard = self.apply_lock.lock().await;
        let result = self.reload_file(path).await;
        self.state.clear_in_flight();

        match &result {
            Ok(outcome) => {
                {
                    let mut stats = self.stats.lock();
                    stats.reloads += 1;
                    stats.last_reload = Some(Utc::now());
                }
                if outcome.unchanged {
                    crate::debug_event!("coordinator", "no changes", "{}", path.display());
                } else {
                    crate::log_event!(
                        "coordinator",
                        "reloaded",
                        "{} (+{} -{} ~{})",
                        path.display(),
                        outcome.added.len(),
                        outcome.removed.len(),
                        outcome.replaced.len()
                    );
                }
            }
            Err(e) => {
                self.stats.lock().failures += 1;
                self.reporter.report(e);
            }
        }

        result
    }

    async fn reload_file(&self, path: &Path) -> Result<ReloadOutcome, ReloadError> {
        self.state.set_in_flight(Stage::Loading, path.to_path_buf());
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.retire(path).await;
            }
            Err(source) => {
                return Err(ReloadError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let fingerprint = Fingerprint::of(&bytes);
        if self.skip_unchanged && self.fingerprints.lock().is_unchanged(path, &fingerprint) {
            return Ok(ReloadOutcome::unchanged(path));
        }

        let loaded = self.parse(path, bytes).await?;
        crate::debug_event!(
            "coordinator",
            "loaded",
            "{} ({} routes, {fingerprint})",
            path.display(),
            loaded.len()
        );

        let diff = diff::compute(&self.registry.read(), path, &loaded);
        self.state.set_in_flight(Stage::Applying, path.to_path_buf());
        let outcome = self.apply(Some(path), diff).await?;

        self.fingerprints
            .lock()
            .record(path.to_path_buf(), fingerprint);
        Ok(outcome)
    }

    /// Remove every route owned by a file that is gone.
    async fn retire(&self, path: &Path) -> Result<ReloadOutcome, ReloadError> {
        self.fingerprints.lock().forget(path);
        let diff = diff::retire(&self.registry.read(), path);
        if diff.is_empty() {
            return Ok(ReloadOutcome::for_path(Some(path)));
        }
        crate::log_event!(
            "coordinator",
            "retiring",
            "{} ({} routes)",
            path.display(),
            diff.removals.len()
        );
        self.state.set_in_flight(Stage::Applying, path.to_path_buf());
        self.apply(Some(path), diff).await
    }

    /// Run the loader on a blocking thread.
    async fn parse(&self, path: &Path, bytes: Vec<u8>) -> Result<RouteDefinitionSet, ReloadError> {
        let loader = Arc::clone(&self.loader);
        let file = path.to_path_buf();
        let parsed = tokio::task::spawn_blocking(move || {
            let contents = String::from_utf8(bytes)
                .map_err(|e| ParseError::new(format!("file is not valid UTF-8: {e}")))?;
            loader.parse(&file, &contents)
        })
        .await
        .unwrap_or_else(|e| Err(ParseError::new(format!("loader task failed: {e}"))));

        parsed.map_err(|source| ReloadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply a diff in order, restoring displaced routes if the engine rejects one.
    async fn apply(
        &self,
        owner: Option<&Path>,
        diff: RouteDiff,
    ) -> Result<ReloadOutcome, ReloadError> {
        // Removed entries not yet re-added: candidates for restore
        let mut displaced: Vec<RegistryEntry> = Vec::new();

        for op in diff.ops() {
            match op {
                RouteOp::Remove { id } => {
                    if let Err(e) = self.manager.remove(id).await {
                        let source = ApplyError::new(id.as_str(), e.reason);
                        return Err(self.rollback(owner, source, displaced).await);
                    }
                    let removed = self.registry.write().remove(id);
                    let source = removed.as_ref().and_then(|entry| entry.owner.clone());
                    // The previous owner no longer matches its last applied content
                    if let Some(previous) = source.as_deref() {
                        if Some(previous) != owner {
                            self.fingerprints.lock().forget(previous);
                        }
                    }
                    displaced.extend(removed);
                    self.emitter.publish(&ReloadEvent::removed(id.as_str(), source));
                }
                RouteOp::Add { id, definition } => {
                    if let Err(e) = self.manager.add(id, definition).await {
                        let source = ApplyError::new(id.as_str(), e.reason);
                        return Err(self.rollback(owner, source, displaced).await);
                    }
                    self.registry.write().insert(RegistryEntry {
                        id: id.clone(),
                        definition: definition.clone(),
                        owner: owner.map(Path::to_path_buf),
                    });
                    displaced.retain(|entry| entry.id != *id);
                    self.emitter.publish(&ReloadEvent::added(
                        id.as_str(),
                        owner.map(Path::to_path_buf),
                    ));
                }
            }
        }

        let mut replaced: Vec<String> = diff
            .replacements
            .iter()
            .chain(diff.takeovers.iter())
            .cloned()
            .collect();
        replaced.sort();

        Ok(ReloadOutcome {
            added: diff.additions,
            removed: diff.removals,
            replaced,
            ..ReloadOutcome::for_path(owner)
        })
    }

    /// Put back routes removed by a failed apply from their last known-good definition.
    async fn rollback(
        &self,
        owner: Option<&Path>,
        source: ApplyError,
        displaced: Vec<RegistryEntry>,
    ) -> ReloadError {
        let mut restored = Vec::new();
        let mut lost = Vec::new();

        for entry in displaced {
            match self.manager.add(&entry.id, &entry.definition).await {
                Ok(()) => {
                    let event = ReloadEvent::added(entry.id.as_str(), entry.owner.clone());
                    restored.push(entry.id.clone());
                    self.registry.write().insert(entry);
                    self.emitter.publish(&event);
                }
                Err(e) => {
                    tracing::error!(
                        "[coordinator] failed to restore route '{}': {}",
                        entry.id,
                        e.reason
                    );
                    lost.push(entry.id);
                }
            }
        }

        ReloadError::Apply {
            path: owner.map(Path::to_path_buf),
            source,
            restored,
            lost,
        }
    }
}
