//! Watched folder description and raw change events.

use std::path::{Path, PathBuf};
use std::time::Instant;

/// A folder whose definition files drive reloads.
///
/// Immutable once watching starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFolder {
    root: PathBuf,
    recursive: bool,
    /// Lowercased extensions without the leading dot. Empty accepts everything.
    extensions: Vec<String>,
}

impl WatchedFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: false,
            extensions: Vec::new(),
        }
    }

    /// Set recursive mode.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Restrict events to these file extensions (`"xml"` and `".xml"` are equivalent).
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn extension_filter(&self) -> &[String] {
        &self.extensions
    }

    /// Same folder with its root resolved to a canonical absolute path.
    pub(crate) fn canonicalized(&self) -> std::io::Result<Self> {
        Ok(Self {
            root: self.root.canonicalize()?,
            ..self.clone()
        })
    }

    /// Check if a path is inside the folder and passes the extension filter.
    pub fn accepts(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };

        // The folder itself, or a nested path when not recursive
        let depth = relative.components().count();
        if depth == 0 || (!self.recursive && depth > 1) {
            return false;
        }

        if self.extensions.is_empty() {
            return true;
        }

        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }
}

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A raw change observed in the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// When the change was detected
    pub detected_at: Instant,
}

impl ChangeEvent {
    pub fn new(path: PathBuf, kind: ChangeKind) -> Self {
        Self {
            path,
            kind,
            detected_at: Instant::now(),
        }
    }
}
