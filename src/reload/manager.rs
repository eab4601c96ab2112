//! Route manager contract: the live engine that runs routes.

use async_trait::async_trait;
use thiserror::Error;

use super::loader::RouteDefinition;

/// The engine rejected an operation for one route.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("route '{id}' rejected: {reason}")]
pub struct ApplyError {
    pub id: String,
    pub reason: String,
}

impl ApplyError {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Adds and removes routes on the running engine.
///
/// The coordinator never adds an id that is still deployed: an existing
/// instance is always removed first.
#[async_trait]
pub trait RouteManager: Send + Sync {
    /// Deploy a route under `id`.
    async fn add(&self, id: &str, definition: &RouteDefinition) -> Result<(), ApplyError>;

    /// Stop and discard the route deployed under `id`.
    async fn remove(&self, id: &str) -> Result<(), ApplyError>;
}
