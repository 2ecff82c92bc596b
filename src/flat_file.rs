//! Flat-file index of artifact bundles.
//!
//! Maps every URL (release indexes) or debug id (debug-id indexes) to the
//! bundles containing a matching file. Bundles are referenced by their position
//! in [`FlatFileIndex::bundles`], and each reference list is kept sorted by
//! `(timestamp, id)` so that the newest bundle is always the last entry.
use crate::archive::BundleArchive;
use crate::constants;
use crate::error::IndexError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Reference lists keyed by URL or debug id
pub type FileMap = BTreeMap<String, Vec<usize>>;

/// One indexed bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleMeta {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}

impl BundleMeta {
    pub fn new(id: i64, timestamp: DateTime<Utc>) -> Self {
        Self { id, timestamp }
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawIndex {
    #[serde(default)]
    bundles: Vec<RawBundle>,
    #[serde(default)]
    files_by_url: FileMap,
    #[serde(default)]
    files_by_debug_id: FileMap,
}

#[derive(Debug, Deserialize)]
struct RawBundle {
    bundle_id: String,
    timestamp: String,
}

impl RawBundle {
    fn into_meta(self) -> Result<BundleMeta, IndexError> {
        let id = self
            .bundle_id
            .rsplit_once('/')
            .and_then(|(_, id)| id.parse::<i64>().ok())
            .ok_or_else(|| IndexError::InvalidBundleId(self.bundle_id.clone()))?;
        let timestamp = parse_timestamp(&self.timestamp)?;
        Ok(BundleMeta { id, timestamp })
    }
}

/// Parses an ISO-8601 timestamp; values without an offset are taken as UTC.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, IndexError> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(source) => NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| IndexError::InvalidTimestamp {
                value: value.to_string(),
                source,
            }),
    }
}

fn check_references(files: &FileMap, bundle_count: usize) -> Result<(), IndexError> {
    for (key, entries) in files {
        if let Some(&index) = entries.iter().find(|&&index| index >= bundle_count) {
            return Err(IndexError::DanglingReference {
                key: key.clone(),
                index,
                bundles: bundle_count,
            });
        }
    }
    Ok(())
}

fn files_to_value(files: &FileMap) -> Value {
    let map: Map<String, Value> = files
        .iter()
        .map(|(key, entries)| (key.clone(), Value::from(entries.clone())))
        .collect();
    Value::Object(map)
}

// ============================================================================
// FlatFileIndex
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatFileIndex {
    bundles: Vec<BundleMeta>,
    files_by_url: FileMap,
    files_by_debug_id: FileMap,
}

impl FlatFileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an index from its stored JSON blob.
    ///
    /// Missing top-level keys are treated as empty, so blobs written by older
    /// versions (or an empty object) load fine.
    pub fn from_json(json: &str) -> Result<Self, IndexError> {
        let raw: RawIndex = serde_json::from_str(json)?;

        let bundles = raw
            .bundles
            .into_iter()
            .map(RawBundle::into_meta)
            .collect::<Result<Vec<_>, _>>()?;

        check_references(&raw.files_by_url, bundles.len())?;
        check_references(&raw.files_by_debug_id, bundles.len())?;

        Ok(Self {
            bundles,
            files_by_url: raw.files_by_url,
            files_by_debug_id: raw.files_by_debug_id,
        })
    }

    pub fn to_json(&self) -> String {
        let bundles: Vec<Value> = self
            .bundles
            .iter()
            .map(|bundle| {
                json!({
                    "bundle_id": constants::bundle_token(bundle.id),
                    "timestamp": bundle.timestamp.to_rfc3339(),
                })
            })
            .collect();

        json!({
            "bundles": bundles,
            "files_by_url": files_to_value(&self.files_by_url),
            "files_by_debug_id": files_to_value(&self.files_by_debug_id),
        })
        .to_string()
    }

    pub fn bundles(&self) -> &[BundleMeta] {
        &self.bundles
    }

    pub fn files_by_url(&self) -> &FileMap {
        &self.files_by_url
    }

    pub fn files_by_debug_id(&self) -> &FileMap {
        &self.files_by_debug_id
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn bundle_meta(&self, bundle_id: i64) -> Option<&BundleMeta> {
        self.bundles.iter().find(|bundle| bundle.id == bundle_id)
    }

    /// Bundles containing `url`, newest first
    pub fn bundles_for_url(&self, url: &str) -> Vec<&BundleMeta> {
        self.resolve(self.files_by_url.get(url))
    }

    /// Bundles containing `debug_id`, newest first
    pub fn bundles_for_debug_id(&self, debug_id: &str) -> Vec<&BundleMeta> {
        self.resolve(self.files_by_debug_id.get(debug_id))
    }

    fn resolve(&self, entries: Option<&Vec<usize>>) -> Vec<&BundleMeta> {
        entries
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .filter_map(|&index| self.bundles.get(index))
                    .collect()
            })
            .unwrap_or_default()
    }

    // === Merging ===

    pub fn merge_urls<A: BundleArchive + ?Sized>(&mut self, bundle_meta: &BundleMeta, archive: &A) {
        let Some(bundle_index) = self.add_or_update_bundle(bundle_meta) else {
            log::debug!("Bundle {} already indexed, skipping URL merge", bundle_meta.id);
            return;
        };

        let urls = archive.get_all_urls();
        log::debug!("Merging {} URLs of bundle {}", urls.len(), bundle_meta.id);
        for url in urls {
            add_sorted_entry(&self.bundles, &mut self.files_by_url, url, bundle_index);
        }
    }

    pub fn merge_debug_ids<A: BundleArchive + ?Sized>(
        &mut self,
        bundle_meta: &BundleMeta,
        archive: &A,
    ) {
        let Some(bundle_index) = self.add_or_update_bundle(bundle_meta) else {
            log::debug!("Bundle {} already indexed, skipping debug id merge", bundle_meta.id);
            return;
        };

        let debug_ids = archive.get_all_debug_ids();
        log::debug!("Merging {} debug ids of bundle {}", debug_ids.len(), bundle_meta.id);
        for (debug_id, _) in debug_ids {
            add_sorted_entry(&self.bundles, &mut self.files_by_debug_id, debug_id, bundle_index);
        }
    }

    /// Returns the position to reference `bundle_meta` at, or `None` when the
    /// exact same bundle is already present.
    ///
    /// A bundle whose id is known but whose timestamp changed is replaced at
    /// its existing position. Reference lists are only re-sorted as they are
    /// touched by the following merge; lists the merge does not touch keep
    /// their previous order.
    pub fn add_or_update_bundle(&mut self, bundle_meta: &BundleMeta) -> Option<usize> {
        match self.position_of(bundle_meta.id) {
            None => {
                self.bundles.push(*bundle_meta);
                Some(self.bundles.len() - 1)
            }
            Some(position) if self.bundles[position] == *bundle_meta => None,
            Some(position) => {
                self.bundles[position] = *bundle_meta;
                Some(position)
            }
        }
    }

    // === Removal ===

    /// Drop a bundle and every reference to it. Returns `false` if the bundle
    /// was not part of the index.
    pub fn remove(&mut self, bundle_id: i64) -> bool {
        let Some(position) = self.position_of(bundle_id) else {
            return false;
        };

        for files in [&mut self.files_by_url, &mut self.files_by_debug_id] {
            files.retain(|_, entries| {
                entries.retain(|&index| index != position);
                for index in entries.iter_mut() {
                    if *index > position {
                        *index -= 1;
                    }
                }
                !entries.is_empty()
            });
        }

        self.bundles.remove(position);
        log::debug!("Removed bundle {} from position {}", bundle_id, position);
        true
    }

    fn position_of(&self, bundle_id: i64) -> Option<usize> {
        self.bundles.iter().position(|bundle| bundle.id == bundle_id)
    }
}

/// Insert `bundle_index` into `files[key]`, keeping the list free of
/// duplicates and sorted by `(timestamp, id)`.
fn add_sorted_entry(bundles: &[BundleMeta], files: &mut FileMap, key: String, bundle_index: usize) {
    let entries = files.entry(key).or_default();
    entries.push(bundle_index);
    entries.sort_unstable();
    entries.dedup();
    entries.sort_by_key(|&index| {
        let bundle = &bundles[index];
        (bundle.timestamp, bundle.id)
    });
}
