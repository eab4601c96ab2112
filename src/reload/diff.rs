//! Diff between a freshly loaded file and the routes it currently owns.
//!
//! Operations are ordered so every removal runs before any addition, and
//! within each group ids are in lexical order. A replacement therefore always
//! removes the old instance before the new one is added under the same id.

use std::path::Path;

use super::loader::{RouteDefinition, RouteDefinitionSet};
use super::registry::ActiveRegistry;

/// A single operation against the route manager.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOp {
    Remove { id: String },
    Add { id: String, definition: RouteDefinition },
}

impl RouteOp {
    pub fn id(&self) -> &str {
        match self {
            RouteOp::Remove { id } | RouteOp::Add { id, .. } => id,
        }
    }
}

/// Changes needed to bring the registry in line with one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteDiff {
    /// Ids new to the registry.
    pub additions: Vec<String>,
    /// Ids the file no longer defines.
    pub removals: Vec<String>,
    /// Ids the file keeps but with different content.
    pub replacements: Vec<String>,
    /// Ids currently deployed by another owner that this file now defines.
    pub takeovers: Vec<String>,
    ops: Vec<RouteOp>,
}

impl RouteDiff {
    /// Ordered operations to apply.
    pub fn ops(&self) -> &[RouteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Diff a successful load of `path` against the registry.
pub fn compute(registry: &ActiveRegistry, path: &Path, loaded: &RouteDefinitionSet) -> RouteDiff {
    let mut diff = RouteDiff::default();
    let mut removes = Vec::new();
    let mut adds = Vec::new();

    for entry in registry.owned_by(path) {
        if !loaded.contains(&entry.id) {
            diff.removals.push(entry.id.clone());
            removes.push(entry.id.clone());
        }
    }

    for (id, definition) in loaded.iter() {
        match registry.get(id) {
            None => diff.additions.push(id.to_string()),
            Some(existing) if existing.owner.as_deref() == Some(path) => {
                if existing.definition == *definition {
                    continue;
                }
                diff.replacements.push(id.to_string());
                removes.push(id.to_string());
            }
            Some(_) => {
                diff.takeovers.push(id.to_string());
                removes.push(id.to_string());
            }
        }
        adds.push(RouteOp::Add {
            id: id.to_string(),
            definition: definition.clone(),
        });
    }

    removes.sort();
    diff.ops = removes
        .into_iter()
        .map(|id| RouteOp::Remove { id })
        .chain(adds)
        .collect();
    diff
}

/// Diff for a deleted file: remove everything it owns.
pub fn retire(registry: &ActiveRegistry, path: &Path) -> RouteDiff {
    let removals = registry.ids_owned_by(path);
    RouteDiff {
        ops: removals
            .iter()
            .map(|id| RouteOp::Remove { id: id.clone() })
            .collect(),
        removals,
        ..RouteDiff::default()
    }
}

/// Diff for deploying one route outside any file.
pub fn single(registry: &ActiveRegistry, id: &str, definition: &RouteDefinition) -> RouteDiff {
    let mut diff = RouteDiff::default();
    match registry.get(id) {
        Some(existing) if existing.owner.is_none() && existing.definition == *definition => {
            return diff;
        }
        Some(existing) if existing.owner.is_none() => {
            diff.replacements.push(id.to_string());
            diff.ops.push(RouteOp::Remove { id: id.to_string() });
        }
        Some(_) => {
            diff.takeovers.push(id.to_string());
            diff.ops.push(RouteOp::Remove { id: id.to_string() });
        }
        None => diff.additions.push(id.to_string()),
    }
    diff.ops.push(RouteOp::Add {
        id: id.to_string(),
        definition: definition.clone(),
    });
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::registry::RegistryEntry;
    use serde_json::json;
    use std::path::PathBuf;

    fn def(to: &str) -> RouteDefinition {
        RouteDefinition::new(json!({ "to": to }))
    }

    fn registry_with(entries: &[(&str, &str, Option<&str>)]) -> ActiveRegistry {
        let mut registry = ActiveRegistry::new();
        for (id, to, owner) in entries {
            registry.insert(RegistryEntry {
                id: id.to_string(),
                definition: def(to),
                owner: owner.map(PathBuf::from),
            });
        }
        registry
    }

    fn op_summary(diff: &RouteDiff) -> Vec<String> {
        diff.ops()
            .iter()
            .map(|op| match op {
                RouteOp::Remove { id } => format!("-{id}"),
                RouteOp::Add { id, .. } => format!("+{id}"),
            })
            .collect()
    }

    #[test]
    fn test_new_file_adds_everything() {
        let registry = registry_with(&[("other", "mock:other", Some("/r/other.xml"))]);
        let loaded = RouteDefinitionSet::new()
            .with_route("foo", def("mock:foo"))
            .with_route("bar", def("mock:bar"));

        let diff = compute(&registry, Path::new("/r/a.xml"), &loaded);
        assert_eq!(diff.additions, vec!["bar", "foo"]);
        assert!(diff.removals.is_empty());
        assert_eq!(op_summary(&diff), vec!["+bar", "+foo"]);
    }

    #[test]
    fn test_replacement_removes_before_add() {
        let registry = registry_with(&[
            ("bar", "mock:foo", Some("/r/a.xml")),
            ("keep", "mock:keep", Some("/r/a.xml")),
        ]);
        let loaded = RouteDefinitionSet::new()
            .with_route("bar", def("mock:bar"))
            .with_route("keep", def("mock:keep"));

        let diff = compute(&registry, Path::new("/r/a.xml"), &loaded);
        assert_eq!(diff.replacements, vec!["bar"]);
        assert_eq!(op_summary(&diff), vec!["-bar", "+bar"]);
    }

    #[test]
    fn test_dropped_ids_are_removed() {
        let registry = registry_with(&[
            ("a", "mock:a", Some("/r/f.xml")),
            ("b", "mock:b", Some("/r/f.xml")),
        ]);
        let loaded = RouteDefinitionSet::new()
            .with_route("b", def("mock:b"))
            .with_route("c", def("mock:c"));

        let diff = compute(&registry, Path::new("/r/f.xml"), &loaded);
        assert_eq!(diff.removals, vec!["a"]);
        assert_eq!(diff.additions, vec!["c"]);
        assert_eq!(op_summary(&diff), vec!["-a", "+c"]);
    }

    #[test]
    fn test_all_removals_precede_additions() {
        let registry = registry_with(&[
            ("a", "mock:old", Some("/r/f.xml")),
            ("z", "mock:z", Some("/r/f.xml")),
        ]);
        let loaded = RouteDefinitionSet::new()
            .with_route("a", def("mock:new"))
            .with_route("m", def("mock:m"));

        let diff = compute(&registry, Path::new("/r/f.xml"), &loaded);
        assert_eq!(op_summary(&diff), vec!["-a", "-z", "+a", "+m"]);
    }

    #[test]
    fn test_takeover_of_external_route() {
        let registry = registry_with(&[("bar", "mock:foo", None)]);
        let loaded = RouteDefinitionSet::new().with_route("bar", def("mock:bar"));

        let diff = compute(&registry, Path::new("/r/bar.xml"), &loaded);
        assert_eq!(diff.takeovers, vec!["bar"]);
        assert!(diff.additions.is_empty());
        assert_eq!(op_summary(&diff), vec!["-bar", "+bar"]);
    }

    #[test]
    fn test_unchanged_file_is_empty_diff() {
        let registry = registry_with(&[("bar", "mock:bar", Some("/r/bar.xml"))]);
        let loaded = RouteDefinitionSet::new().with_route("bar", def("mock:bar"));

        assert!(compute(&registry, Path::new("/r/bar.xml"), &loaded).is_empty());
    }

    #[test]
    fn test_retire_removes_only_owned_ids() {
        let registry = registry_with(&[
            ("a", "mock:a", Some("/r/f.xml")),
            ("b", "mock:b", Some("/r/g.xml")),
            ("c", "mock:c", None),
        ]);

        let diff = retire(&registry, Path::new("/r/f.xml"));
        assert_eq!(op_summary(&diff), vec!["-a"]);
    }

    #[test]
    fn test_single_external_route() {
        let registry = registry_with(&[("bar", "mock:foo", None)]);

        assert!(single(&registry, "bar", &def("mock:foo")).is_empty());
        assert_eq!(
            op_summary(&single(&registry, "bar", &def("mock:bar"))),
            vec!["-bar", "+bar"]
        );
        assert_eq!(op_summary(&single(&registry, "new", &def("mock:new"))), vec!["+new"]);
    }
}
