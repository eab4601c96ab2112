//! Hot reload of route definitions from a watched folder.
//!
//! Changed files are debounced, parsed by a host [`Loader`], diffed against
//! the routes they currently own and applied to a host [`RouteManager`].

pub mod logging;

pub mod config;
pub mod reload;
pub mod reloader;
pub mod watcher;

pub use config::{BackendKind, ConfigError, LoggingConfig, ReloadSettings};
pub use reload::{
    ActiveRegistry, ApplyError, BroadcastObserver, EventEmitter, Loader, ObserverError,
    ObserverId, ParseError, RegistryEntry, RegistryView, ReloadCoordinator, ReloadError,
    ReloadEvent, ReloadEventKind, ReloadObserver, ReloadOutcome, ReloadState, ReloadStats,
    RouteDefinition, RouteDefinitionSet, RouteManager, TomlLoader,
};
pub use reloader::{RouteReloader, RouteReloaderBuilder};
pub use watcher::{ChangeEvent, ChangeKind, WatchBackend, WatchError, WatchedFolder};
