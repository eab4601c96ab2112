//! Shared fixtures: an in-memory engine and folder helpers.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use hotroute::{
    ApplyError, BackendKind, ObserverError, ReloadEvent, ReloadEventKind, RouteDefinition,
    RouteManager, RouteReloader, RouteReloaderBuilder, TomlLoader,
};

#[derive(Debug, Clone)]
struct DeployedRoute {
    from: String,
    to: String,
    body: Option<String>,
}

/// Engine that delivers messages from `direct:` consumers to `mock:` endpoints.
#[derive(Default)]
pub struct MockEngine {
    routes: Mutex<BTreeMap<String, DeployedRoute>>,
    calls: Mutex<Vec<String>>,
    received: Mutex<BTreeMap<String, Vec<String>>>,
    rejected_endpoints: Mutex<HashSet<String>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every add targeting `endpoint` fail.
    pub fn reject_endpoint(&self, endpoint: &str) {
        self.rejected_endpoints.lock().insert(endpoint.to_string());
    }

    /// Send a message to a consumer endpoint. Returns whether a route took it.
    pub fn send(&self, endpoint: &str, message: &str) -> bool {
        let route = self
            .routes
            .lock()
            .values()
            .find(|r| r.from == endpoint)
            .cloned();
        let Some(route) = route else {
            return false;
        };
        let body = route.body.unwrap_or_else(|| message.to_string());
        self.received.lock().entry(route.to).or_default().push(body);
        true
    }

    pub fn received(&self, endpoint: &str) -> Vec<String> {
        self.received
            .lock()
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    pub fn route_ids(&self) -> Vec<String> {
        self.routes.lock().keys().cloned().collect()
    }

    /// Every add/remove call, e.g. `+bar` or `-bar`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

fn field(definition: &RouteDefinition, name: &str) -> Option<String> {
    definition
        .content()
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[async_trait]
impl RouteManager for MockEngine {
    async fn add(&self, id: &str, definition: &RouteDefinition) -> Result<(), ApplyError> {
        let from = field(definition, "from").ok_or_else(|| ApplyError::new(id, "missing 'from'"))?;
        let to = field(definition, "to").ok_or_else(|| ApplyError::new(id, "missing 'to'"))?;

        if self.rejected_endpoints.lock().contains(&to) {
            return Err(ApplyError::new(id, format!("cannot resolve endpoint {to}")));
        }

        let mut routes = self.routes.lock();
        if routes.contains_key(id) {
            return Err(ApplyError::new(id, "a route with this id already exists"));
        }
        if routes.values().any(|r| r.from == from) {
            return Err(ApplyError::new(id, format!("{from} already has a consumer")));
        }
        routes.insert(
            id.to_string(),
            DeployedRoute {
                from,
                to,
                body: field(definition, "body"),
            },
        );
        self.calls.lock().push(format!("+{id}"));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), ApplyError> {
        if self.routes.lock().remove(id).is_none() {
            return Err(ApplyError::new(id, "no such route"));
        }
        self.calls.lock().push(format!("-{id}"));
        Ok(())
    }
}

/// Events seen by a synchronous observer.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ReloadEvent>>>,
}

impl EventLog {
    pub fn observer(&self) -> impl Fn(&ReloadEvent) -> Result<(), ObserverError> + use<> {
        let events = Arc::clone(&self.events);
        move |event: &ReloadEvent| {
            events.lock().push(event.clone());
            Ok(())
        }
    }

    pub fn count(&self, kind: ReloadEventKind, route_id: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind && e.route_id == route_id)
            .count()
    }

    /// Events rendered as `Added:bar` / `Removed:bar`.
    pub fn summary(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| format!("{:?}:{}", e.kind, e.route_id))
            .collect()
    }
}

/// Builder preset: TOML loader, polling backend, short timers.
pub fn reloader(folder: &Path, engine: &Arc<MockEngine>) -> RouteReloaderBuilder {
    RouteReloader::builder()
        .folder(folder)
        .extensions(["toml"])
        .debounce(Duration::from_millis(20))
        .backend(BackendKind::Polling)
        .poll_interval(Duration::from_millis(50))
        .loader(TomlLoader)
        .route_manager(engine.clone())
}

/// A route file body.
pub fn route(id: &str, from: &str, to: &str) -> String {
    format!("[{id}]\nfrom = \"{from}\"\nto = \"{to}\"\n")
}

/// Move a file into `folder` atomically, like a deployment copy would.
pub fn drop_file(folder: &Path, name: &str, contents: &str) -> PathBuf {
    let staging = folder.join(format!(".{name}.part"));
    std::fs::write(&staging, contents).unwrap();
    let target = folder.join(name);
    std::fs::rename(&staging, &target).unwrap();
    target.canonicalize().unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
