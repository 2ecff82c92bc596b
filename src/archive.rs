// Bundle contents readers feeding the flat-file index
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Read access to the file listing of one artifact bundle.
pub trait BundleArchive {
    /// Every URL the bundle holds a file for
    fn get_all_urls(&self) -> Vec<String>;

    /// Every debug id in the bundle, with the type of file it was found on
    fn get_all_debug_ids(&self) -> Vec<(String, SourceFileType)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceFileType {
    Source,
    MinifiedSource,
    SourceMap,
    IndexedRamBundle,
    Unknown,
}

impl SourceFileType {
    pub fn parse(value: &str) -> Self {
        match value {
            "source" => SourceFileType::Source,
            "minified_source" => SourceFileType::MinifiedSource,
            "source_map" => SourceFileType::SourceMap,
            "indexed_ram_bundle" => SourceFileType::IndexedRamBundle,
            _ => SourceFileType::Unknown,
        }
    }
}

// ============================================================================
// Manifest - manifest.json of an uploaded bundle
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    files: BTreeMap<String, ManifestFile>,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "type")]
    file_type: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl ManifestFile {
    fn debug_id(&self) -> Option<String> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("debug-id"))
            .map(|(_, value)| normalize_debug_id(value))
            .filter(|id| !id.is_empty())
    }
}

/// Debug ids are matched case-insensitively; store them lowercase
pub fn normalize_debug_id(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// A bundle described by its `manifest.json`.
#[derive(Debug)]
pub struct ManifestArchive {
    manifest: Manifest,
}

impl ManifestArchive {
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest = serde_json::from_str(json).context("Failed to parse bundle manifest")?;
        Ok(Self { manifest })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        Self::from_json(&data)
    }

    pub fn file_count(&self) -> usize {
        self.manifest.files.len()
    }
}

impl BundleArchive for ManifestArchive {
    fn get_all_urls(&self) -> Vec<String> {
        let urls: BTreeSet<&str> = self
            .manifest
            .files
            .values()
            .filter_map(|file| file.url.as_deref())
            .collect();
        urls.into_iter().map(str::to_string).collect()
    }

    fn get_all_debug_ids(&self) -> Vec<(String, SourceFileType)> {
        let ids: BTreeSet<(String, SourceFileType)> = self
            .manifest
            .files
            .values()
            .filter_map(|file| {
                let file_type = SourceFileType::parse(file.file_type.as_deref().unwrap_or(""));
                file.debug_id().map(|id| (id, file_type))
            })
            .collect();
        ids.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "org": "acme",
        "release": "1.0",
        "files": {
            "files/_/_/index.js": {
                "url": "~/index.js",
                "type": "minified_source",
                "headers": { "Debug-Id": "2F259F80-58B7-44CB-D7CD-DE1505E7E718" }
            },
            "files/_/_/index.js.map": {
                "url": "~/index.js.map",
                "type": "source_map",
                "headers": { "debug-id": "2f259f80-58b7-44cb-d7cd-de1505e7e718" }
            },
            "files/_/_/app.js": {
                "url": "~/app.js",
                "type": "source"
            },
            "files/_/_/orphan": {
                "type": "source"
            }
        }
    }"#;

    #[test]
    fn test_urls_skip_files_without_url() {
        let archive = ManifestArchive::from_json(MANIFEST).unwrap();
        assert_eq!(archive.file_count(), 4);
        assert_eq!(
            archive.get_all_urls(),
            vec!["~/app.js", "~/index.js", "~/index.js.map"]
        );
    }

    #[test]
    fn test_debug_ids_normalized() {
        let archive = ManifestArchive::from_json(MANIFEST).unwrap();
        let ids = archive.get_all_debug_ids();
        assert_eq!(
            ids,
            vec![
                (
                    "2f259f80-58b7-44cb-d7cd-de1505e7e718".to_string(),
                    SourceFileType::MinifiedSource
                ),
                (
                    "2f259f80-58b7-44cb-d7cd-de1505e7e718".to_string(),
                    SourceFileType::SourceMap
                ),
            ]
        );
    }

    #[test]
    fn test_empty_manifest() {
        let archive = ManifestArchive::from_json("{}").unwrap();
        assert!(archive.get_all_urls().is_empty());
        assert!(archive.get_all_debug_ids().is_empty());
    }

    #[test]
    fn test_invalid_manifest() {
        assert!(ManifestArchive::from_json("{\"files\": []}").is_err());
    }

    #[test]
    fn test_source_file_type_parse() {
        assert_eq!(SourceFileType::parse("source_map"), SourceFileType::SourceMap);
        assert_eq!(SourceFileType::parse("whatever"), SourceFileType::Unknown);
    }
}
