use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use tempfile::TempDir;

use artifact_index::{BundleArchive, BundleIndexer, FileLocks, FileStore, IndexerOptions, SourceFileType};

#[allow(dead_code)]
pub fn setup_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(anyhow::Error::from)
}

#[allow(dead_code)]
pub fn setup_store(dir: &Path) -> Result<FileStore> {
    FileStore::open(dir)
}

/// Indexer with its own store handle and lock service over `dir`, as a
/// separate CLI process would build it
#[allow(dead_code)]
pub fn setup_shared_indexer(dir: &Path, options: IndexerOptions) -> Result<BundleIndexer<FileStore, FileLocks>> {
    let store = FileStore::open(dir)?;
    Ok(BundleIndexer::new(store, FileLocks::new(dir)).with_options(options))
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("timestamp in range")
}

/// Archive listing the same names as URLs and as debug ids
#[allow(dead_code)]
pub struct ListArchive(pub Vec<String>);

#[allow(dead_code)]
impl ListArchive {
    pub fn new(names: &[&str]) -> Self {
        Self(names.iter().map(|n| n.to_string()).collect())
    }
}

impl BundleArchive for ListArchive {
    fn get_all_urls(&self) -> Vec<String> {
        self.0.clone()
    }

    fn get_all_debug_ids(&self) -> Vec<(String, SourceFileType)> {
        self.0
            .iter()
            .map(|id| (id.clone(), SourceFileType::MinifiedSource))
            .collect()
    }
}

/// Write a bundle manifest.json listing `urls`, each tagged with `debug_id` if given
#[allow(dead_code)]
pub fn write_manifest(dir: &Path, name: &str, urls: &[&str], debug_id: Option<&str>) -> Result<std::path::PathBuf> {
    let mut files = serde_json::Map::new();
    for url in urls {
        let mut entry = serde_json::json!({ "url": url, "type": "minified_source" });
        if let Some(debug_id) = debug_id {
            entry["headers"] = serde_json::json!({ "debug-id": debug_id });
        }
        files.insert(format!("files/_/_/{}", url.trim_start_matches("~/")), entry);
    }
    let manifest = serde_json::json!({ "files": files });

    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
    Ok(path)
}
