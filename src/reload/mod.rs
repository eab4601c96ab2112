//! Loading, diffing and applying route definition files.
//!
//! # Architecture
//!
//! ```text
//! Settled(path)
//!     |
//! ReloadCoordinator  (one reload at a time)
//!   - Loader::parse        -> RouteDefinitionSet | ParseError
//!   - diff vs ActiveRegistry (ids owned by path)
//!   - RouteManager remove/add, removals first, id order
//!   - registry update, then EventEmitter::publish
//!   - rollback of removed ids on ApplyError
//! ```

mod coordinator;
mod diff;
mod error;
mod events;
mod fingerprint;
mod loader;
mod manager;
mod registry;
mod state;

pub use coordinator::{ReloadCoordinator, ReloadOutcome, ReloadStats};
pub use diff::{RouteDiff, RouteOp};
pub use error::{ErrorHandler, ErrorReporter, ReloadError};
pub use events::{
    BroadcastObserver, EventEmitter, ObserverError, ObserverId, ReloadEvent, ReloadEventKind,
    ReloadObserver,
};
pub use fingerprint::{Fingerprint, FingerprintCache};
pub use loader::{Loader, ParseError, RouteDefinition, RouteDefinitionSet, TomlLoader};
pub use manager::{ApplyError, RouteManager};
pub use registry::{ActiveRegistry, RegistryEntry, RegistryView};
pub use state::{ReloadState, StateTracker};
