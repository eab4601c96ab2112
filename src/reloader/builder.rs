use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendKind, ConfigError, ReloadSettings};
use crate::reload::{
    BroadcastObserver, ErrorReporter, Loader, ReloadCoordinator, ReloadError, ReloadObserver,
    RouteManager, StateTracker,
};

use super::RouteReloader;

/// Capacity of the built-in broadcast channel.
const BROADCAST_CAPACITY: usize = 256;

/// Builder for constructing a [`RouteReloader`].
pub struct RouteReloaderBuilder {
    settings: ReloadSettings,
    loader: Option<Arc<dyn Loader>>,
    manager: Option<Arc<dyn RouteManager>>,
    observers: Vec<Arc<dyn ReloadObserver>>,
    error_handler: Option<crate::reload::ErrorHandler>,
    broadcast_capacity: usize,
}

impl RouteReloaderBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            settings: ReloadSettings::default(),
            loader: None,
            manager: None,
            observers: Vec::new(),
            error_handler: None,
            broadcast_capacity: BROADCAST_CAPACITY,
        }
    }

    /// Replace all settings at once, e.g. from [`ReloadSettings::load_from`].
    pub fn settings(mut self, settings: ReloadSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the folder to watch.
    pub fn folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.settings.folder = folder.into();
        self
    }

    /// Set the debounce delay.
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.settings.debounce_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Watch subdirectories too.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.settings.recursive = recursive;
        self
    }

    /// Only react to files with these extensions.
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Select the change-detection backend.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.settings.backend = backend;
        self
    }

    /// Set the polling and health-check interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Bounds of the backoff used to re-establish a lost watch.
    pub fn retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.settings.retry_initial_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
        self.settings.retry_max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Reload files already in the folder at start.
    pub fn load_existing(mut self, enabled: bool) -> Self {
        self.settings.load_existing = enabled;
        self
    }

    /// Skip reloads whose content is unchanged.
    pub fn skip_unchanged(mut self, enabled: bool) -> Self {
        self.settings.skip_unchanged = enabled;
        self
    }

    /// Set the loader that parses definition files.
    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Set the engine routes are applied to.
    pub fn route_manager(mut self, manager: Arc<dyn RouteManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Add an observer.
    pub fn observer(mut self, observer: impl ReloadObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Set the hook receiving every reload error.
    pub fn on_reload_error(
        mut self,
        handler: impl Fn(&ReloadError) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Set the capacity of the channel behind [`RouteReloader::subscribe`].
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Build the RouteReloader.
    pub fn build(self) -> Result<RouteReloader, ConfigError> {
        self.settings.validate()?;

        let loader = self.loader.ok_or_else(|| ConfigError::Invalid {
            field: "loader",
            reason: "a loader is required".to_string(),
        })?;
        let manager = self.manager.ok_or_else(|| ConfigError::Invalid {
            field: "route_manager",
            reason: "a route manager is required".to_string(),
        })?;

        let reporter = ErrorReporter::new();
        if let Some(handler) = self.error_handler {
            reporter.set_handler(handler);
        }

        let state = StateTracker::new();
        let coordinator = ReloadCoordinator::new(loader, manager)
            .with_reporter(reporter)
            .with_state(state.clone())
            .skip_unchanged(self.settings.skip_unchanged);

        let broadcast = Arc::new(BroadcastObserver::new(self.broadcast_capacity));
        for observer in self.observers {
            coordinator.events().subscribe_arc(observer);
        }
        coordinator.events().subscribe_arc(broadcast.clone());

        Ok(RouteReloader {
            settings: self.settings,
            coordinator: Arc::new(coordinator),
            broadcast,
            state,
            running: None,
        })
    }
}

impl Default for RouteReloaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
