//! Content fingerprints of the last successfully applied version of each file.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// SHA-256 of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(content: &[u8]) -> Self {
        Self(Sha256::digest(content).into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FingerprintCache {
    applied: HashMap<PathBuf, Fingerprint>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if `fingerprint` matches what was last applied for `path`.
    pub fn is_unchanged(&self, path: &Path, fingerprint: &Fingerprint) -> bool {
        self.applied.get(path) == Some(fingerprint)
    }

    pub fn record(&mut self, path: PathBuf, fingerprint: Fingerprint) {
        self.applied.insert(path, fingerprint);
    }

    pub fn forget(&mut self, path: &Path) {
        self.applied.remove(path);
    }
}
