//! Flat-file indexes of artifact bundles.
//!
//! A [`FlatFileIndex`] maps URLs (for a project release) or debug ids (for a
//! project) to the bundles that contain a matching file, newest last, and
//! round-trips through a JSON blob. [`BundleIndexer`] keeps stored indexes up
//! to date with a locked read-merge-write cycle over pluggable
//! [`IndexStore`] and [`LockService`] implementations.
pub mod archive;
pub mod constants;
pub mod error;
pub mod flat_file;
pub mod identifier;
pub mod indexer;
pub mod locks;
pub mod options;
pub mod store;

pub use archive::{BundleArchive, ManifestArchive, SourceFileType};
pub use error::{IndexError, IndexingError};
pub use flat_file::{BundleMeta, FlatFileIndex};
pub use identifier::FlatFileIdentifier;
pub use indexer::{BundleIndexer, IndexerStats};
pub use locks::{FileLock, FileLocks, LocalLocks, LockService};
pub use options::{IndexerOptions, IndexerOptionsBuilder};
pub use store::{FileStore, IndexStore, IndexingState, MemoryStore};
