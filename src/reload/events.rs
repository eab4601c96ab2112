//! Lifecycle notifications published while a reload is applied.
//!
//! Observers are called synchronously, in apply order, after the registry
//! has been updated. A failing or panicking observer is logged and skipped;
//! it never aborts the apply or starves the other observers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

/// What happened to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadEventKind {
    Added,
    Removed,
}

/// A route was added to or removed from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadEvent {
    pub kind: ReloadEventKind,
    pub route_id: String,
    /// Owning file, `None` for routes registered outside the folder.
    pub source: Option<PathBuf>,
}

impl ReloadEvent {
    pub fn added(route_id: impl Into<String>, source: Option<PathBuf>) -> Self {
        Self {
            kind: ReloadEventKind::Added,
            route_id: route_id.into(),
            source,
        }
    }

    pub fn removed(route_id: impl Into<String>, source: Option<PathBuf>) -> Self {
        Self {
            kind: ReloadEventKind::Removed,
            route_id: route_id.into(),
            source,
        }
    }
}

/// Error returned by an observer. Logged, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ObserverError(String);

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives reload events synchronously during apply.
pub trait ReloadObserver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "observer"
    }

    fn on_event(&self, event: &ReloadEvent) -> Result<(), ObserverError>;
}

impl<F> ReloadObserver for F
where
    F: Fn(&ReloadEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_event(&self, event: &ReloadEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

/// Handle returned by [`EventEmitter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Registry of observers.
#[derive(Default)]
pub struct EventEmitter {
    observers: RwLock<Vec<(ObserverId, Arc<dyn ReloadObserver>)>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn subscribe(&self, observer: impl ReloadObserver + 'static) -> ObserverId {
        self.subscribe_arc(Arc::new(observer))
    }

    /// Register a shared observer.
    pub fn subscribe_arc(&self, observer: Arc<dyn ReloadObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        crate::debug_event!("events", "subscribed", "{} as {id:?}", observer.name());
        self.observers.write().push((id, observer));
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Deliver an event to every observer registered right now.
    ///
    /// Returns how many observers accepted it.
    pub fn publish(&self, event: &ReloadEvent) -> usize {
        // Snapshot so observers may (un)subscribe while being notified
        let observers: Vec<Arc<dyn ReloadObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        let mut delivered = 0;
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(
                        "[events] observer '{}' failed on {:?} {}: {e}",
                        observer.name(),
                        event.kind,
                        event.route_id
                    );
                }
                Err(_) => {
                    tracing::error!(
                        "[events] observer '{}' panicked on {:?} {}",
                        observer.name(),
                        event.kind,
                        event.route_id
                    );
                }
            }
        }

        crate::debug_event!(
            "events",
            "published",
            "{:?} {} to {delivered} observers",
            event.kind,
            event.route_id
        );
        delivered
    }
}

/// Forwards events into a broadcast channel for async consumers.
pub struct BroadcastObserver {
    sender: broadcast::Sender<ReloadEvent>,
}

impl BroadcastObserver {
    /// Create a new broadcaster with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.sender.subscribe()
    }
}

impl ReloadObserver for BroadcastObserver {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn on_event(&self, event: &ReloadEvent) -> Result<(), ObserverError> {
        match self.sender.send(event.clone()) {
            Ok(count) => {
                crate::debug_event!("broadcast", "sent", "{event:?} to {count} subscribers");
            }
            Err(_) => {
                // No receivers, this is fine
                crate::debug_event!("broadcast", "dropped", "no subscribers for {event:?}");
            }
        }
        Ok(())
    }
}
