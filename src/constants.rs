//! Global constants for the index wire format, lock naming, storage filenames and lock timing defaults
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Binary name used in log prefixes and CLI help
pub const BINARY_NAME: &str = "artifact-index";

/// Package version from Cargo.toml (set at compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Wire Format Constants
// ============================================================================

/// Prefix of every serialized `bundle_id`.
///
/// The download service resolves bundles with this string verbatim, so it must
/// stay byte-exact.
pub const BUNDLE_ID_PREFIX: &str = "artifact_bundle/";

/// Renders the wire-format bundle token for a bundle id
pub fn bundle_token(bundle_id: i64) -> String {
    format!("{}{}", BUNDLE_ID_PREFIX, bundle_id)
}

// ============================================================================
// Lock Constants
// ============================================================================

/// Prefix of the mutual-exclusion lock name guarding one index
pub const LOCK_NAME_PREFIX: &str = "bundle_index:write:";

/// Maximum time a writer may hold an index lock (10 minutes)
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60 * 10);

/// How long a writer waits for an index lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// First retry delay when an index lock is contended
pub const DEFAULT_LOCK_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Upper bound of the exponential retry delay
pub const MAX_LOCK_RETRY_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Storage Constants
// ============================================================================

/// Extension of a stored index blob
pub const INDEX_FILE_EXTENSION: &str = "json";

/// Suffix of a per-identifier indexing state file
pub const STATE_FILE_SUFFIX: &str = ".state.json";

/// Extension of a lock file shared by processes using one store directory
pub const LOCK_FILE_EXTENSION: &str = "lock";

/// Returns the blob filename for an identifier key hash
pub fn index_filename(key_hash: &str) -> String {
    format!("{}.{}", key_hash, INDEX_FILE_EXTENSION)
}

/// Returns the state filename for an identifier key hash
pub fn state_filename(key_hash: &str) -> String {
    format!("{}{}", key_hash, STATE_FILE_SUFFIX)
}

/// Resolves the on-disk blob path for an identifier key hash
pub fn index_path(dir: impl AsRef<Path>, key_hash: &str) -> PathBuf {
    dir.as_ref().join(index_filename(key_hash))
}

/// Resolves the on-disk state path for an identifier key hash
pub fn state_path(dir: impl AsRef<Path>, key_hash: &str) -> PathBuf {
    dir.as_ref().join(state_filename(key_hash))
}

/// Returns the lock filename for a lock name (`:` is not portable in filenames)
pub fn lock_filename(name: &str) -> String {
    format!("{}.{}", name.replace(':', "_"), LOCK_FILE_EXTENSION)
}

/// Resolves the lock file guarding a named index lock
pub fn lock_path(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    dir.as_ref().join(lock_filename(name))
}

/// Resolves the lock file guarding updates of an identifier's state file
pub fn state_lock_path(dir: impl AsRef<Path>, key_hash: &str) -> PathBuf {
    dir.as_ref().join(format!("{}.state.{}", key_hash, LOCK_FILE_EXTENSION))
}
