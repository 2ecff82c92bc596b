// Index identifiers and lock-name derivation
use crate::constants;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Sentinel for an absent release or dist.
pub const NULL_STRING: &str = "";

/// Identifies one flat-file index: either a `(project, release, dist)` index of
/// URLs, or a per-project index of debug ids (empty release and dist).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlatFileIdentifier {
    pub project_id: u64,
    pub release: String,
    pub dist: String,
}

impl FlatFileIdentifier {
    pub fn new(project_id: u64, release: impl Into<String>, dist: impl Into<String>) -> Self {
        Self {
            project_id,
            release: release.into(),
            dist: dist.into(),
        }
    }

    /// Identifier of the project-wide debug-id index
    pub fn for_debug_id(project_id: u64) -> Self {
        Self::new(project_id, NULL_STRING, NULL_STRING)
    }

    pub fn is_indexing_by_release(&self) -> bool {
        !self.release.is_empty()
    }

    /// Lowercase hex SHA-1 of `"{project_id}|{release}|{dist}"`.
    ///
    /// Deterministic across processes, so every writer agrees on lock identity.
    pub fn key_hash(&self) -> String {
        let key = format!("{}|{}|{}", self.project_id, self.release, self.dist);
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Name of the lock serializing writers of this index
    pub fn lock_name(&self) -> String {
        format!("{}{}", constants::LOCK_NAME_PREFIX, self.key_hash())
    }
}

impl fmt::Display for FlatFileIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_indexing_by_release() {
            write!(f, "{}/{}/{}", self.project_id, self.release, self.dist)
        } else {
            write!(f, "{}/<debug-ids>", self.project_id)
        }
    }
}
