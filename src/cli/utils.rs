// Shared utility functions for CLI commands

use anyhow::{Context, Result};
use artifact_index::{
    BundleIndexer, FileLocks, FileStore, FlatFileIdentifier, IndexerOptionsBuilder,
};
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Arguments selecting one index
#[derive(Args, Debug, Clone)]
pub struct IdentifierArgs {
    /// Project id
    #[arg(short, long)]
    pub project: u64,

    /// Release (omit to select the project's debug-id index)
    #[arg(short, long)]
    pub release: Option<String>,

    /// Distribution of the release
    #[arg(short, long, requires = "release")]
    pub dist: Option<String>,
}

impl IdentifierArgs {
    pub fn identifier(&self) -> FlatFileIdentifier {
        match &self.release {
            Some(release) if !release.is_empty() => FlatFileIdentifier::new(
                self.project,
                release.as_str(),
                self.dist.as_deref().unwrap_or_default(),
            ),
            _ => FlatFileIdentifier::for_debug_id(self.project),
        }
    }
}

/// Open the store directory and wrap it in an indexer whose locks are shared
/// with every other process using the directory
pub fn create_indexer(dir: PathBuf, lock_timeout_secs: u64) -> Result<BundleIndexer<FileStore, FileLocks>> {
    let store = FileStore::open(&dir)
        .with_context(|| format!("Failed to open store: {}", dir.display()))?;
    let options = IndexerOptionsBuilder::new()
        .lock_timeout(Duration::from_secs(lock_timeout_secs))
        .build();
    let locks = FileLocks::new(store.directory());
    Ok(BundleIndexer::new(store, locks).with_options(options))
}

/// Parse an RFC 3339 timestamp, defaulting to now
pub fn parse_timestamp(value: Option<&str>) -> Result<DateTime<Utc>> {
    match value {
        None => Ok(Utc::now()),
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Invalid timestamp: {}", s))?
            .with_timezone(&Utc)),
    }
}
