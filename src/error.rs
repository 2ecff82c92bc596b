// Error types for index (de)serialization and locked indexing
use std::time::Duration;

/// Failure to read or render a flat-file index blob.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("malformed index: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid bundle id {0:?}: expected \"<prefix>/<integer>\"")]
    InvalidBundleId(String),

    #[error("invalid bundle timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("index key {key:?} references bundle {index}, but only {bundles} bundles exist")]
    DanglingReference {
        key: String,
        index: usize,
        bundles: usize,
    },
}

/// Failure of the locked read-merge-write cycle that is not a storage error.
#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
    #[error("timed out after {waited:?} waiting for lock {name}")]
    LockTimeout { name: String, waited: Duration },
}
