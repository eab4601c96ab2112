//! Loader contract: turning a definition file into a set of routes.
//!
//! The file format belongs to the host application. The reload engine only
//! needs a mapping from route id to an opaque definition it can compare.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque content of one route, compared by value to detect replacements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteDefinition(serde_json::Value);

impl RouteDefinition {
    pub fn new(content: impl Into<serde_json::Value>) -> Self {
        Self(content.into())
    }

    pub fn content(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_content(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for RouteDefinition {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Routes defined by one successfully loaded file, keyed by id.
///
/// Produced fresh on every load; iteration is in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteDefinitionSet {
    routes: BTreeMap<String, RouteDefinition>,
}

impl RouteDefinitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_route(mut self, id: impl Into<String>, definition: RouteDefinition) -> Self {
        self.routes.insert(id.into(), definition);
        self
    }

    /// Insert a route, returning the definition it replaced within this set.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        definition: RouteDefinition,
    ) -> Option<RouteDefinition> {
        self.routes.insert(id.into(), definition)
    }

    pub fn get(&self, id: &str) -> Option<&RouteDefinition> {
        self.routes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.routes.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RouteDefinition)> {
        self.routes.iter().map(|(id, def)| (id.as_str(), def))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, RouteDefinition)> for RouteDefinitionSet {
    fn from_iter<T: IntoIterator<Item = (S, RouteDefinition)>>(iter: T) -> Self {
        Self {
            routes: iter.into_iter().map(|(id, def)| (id.into(), def)).collect(),
        }
    }
}

/// A definition file could not be turned into routes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Attach a 1-based source position.
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "line {line}, column {column}: {}", self.message)
            }
            (Some(line), None) => write!(f, "line {line}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Parses the contents of a definition file.
///
/// Called from a blocking thread; implementations may do CPU-heavy work.
pub trait Loader: Send + Sync {
    fn parse(&self, path: &Path, contents: &str) -> Result<RouteDefinitionSet, ParseError>;
}

impl<F> Loader for F
where
    F: Fn(&Path, &str) -> Result<RouteDefinitionSet, ParseError> + Send + Sync,
{
    fn parse(&self, path: &Path, contents: &str) -> Result<RouteDefinitionSet, ParseError> {
        self(path, contents)
    }
}

/// Loader for TOML files where each top-level table is one route, keyed by id.
///
/// ```toml
/// [bar]
/// from = "direct:bar"
/// to = "mock:bar"
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlLoader;

impl Loader for TomlLoader {
    fn parse(&self, _path: &Path, contents: &str) -> Result<RouteDefinitionSet, ParseError> {
        let table: toml::Table =
            toml::from_str(contents).map_err(|e| toml_parse_error(contents, &e))?;

        let mut routes = RouteDefinitionSet::new();
        for (id, value) in table {
            if !value.is_table() {
                return Err(ParseError::new(format!("route '{id}' must be a table")));
            }
            let content = serde_json::to_value(&value)
                .map_err(|e| ParseError::new(format!("route '{id}': {e}")))?;
            routes.insert(id, RouteDefinition::new(content));
        }
        Ok(routes)
    }
}

fn toml_parse_error(contents: &str, error: &toml::de::Error) -> ParseError {
    let parse_error = ParseError::new(error.message());
    let Some(span) = error.span() else {
        return parse_error;
    };
    let before = contents.get(..span.start).unwrap_or(contents);
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    parse_error.at(line, column)
}
