// Locked read-merge-write maintenance of stored flat-file indexes
use crate::archive::BundleArchive;
use crate::error::IndexingError;
use crate::flat_file::{BundleMeta, FlatFileIndex};
use crate::identifier::{FlatFileIdentifier, NULL_STRING};
use crate::locks::{self, LockService};
use crate::options::IndexerOptions;
use crate::store::{IndexStore, IndexingState};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Counters {
    indexed: AtomicU64,
    duplicated_indexing: AtomicU64,
    removals: AtomicU64,
    removal_would_block: AtomicU64,
    unreadable_indexes: AtomicU64,
    lock_timeouts: AtomicU64,
}

/// Snapshot of the indexer's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerStats {
    /// Bundles merged into a stored index
    pub indexed: u64,
    /// Merges whose state was already moved to `WasIndexed` by someone else
    pub duplicated_indexing: u64,
    /// Stored indexes a bundle was removed from
    pub removals: u64,
    /// Removals skipped because the index lock could not be taken in time
    pub removal_would_block: u64,
    /// Removals skipped because the stored index could not be read
    pub unreadable_indexes: u64,
    pub lock_timeouts: u64,
}

/// Keeps stored indexes up to date as bundles are uploaded and deleted.
///
/// Every mutation of a stored index happens inside one hold of the lock named
/// by [`FlatFileIdentifier::lock_name`], covering load, merge and store.
pub struct BundleIndexer<S, L> {
    store: S,
    locks: L,
    options: IndexerOptions,
    counters: Counters,
}

impl<S: IndexStore, L: LockService> BundleIndexer<S, L> {
    pub fn new(store: S, locks: L) -> Self {
        Self {
            store,
            locks,
            options: IndexerOptions::default(),
            counters: Counters::default(),
        }
    }

    pub fn with_options(mut self, options: IndexerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    pub fn stats(&self) -> IndexerStats {
        IndexerStats {
            indexed: self.counters.indexed.load(Ordering::Relaxed),
            duplicated_indexing: self.counters.duplicated_indexing.load(Ordering::Relaxed),
            removals: self.counters.removals.load(Ordering::Relaxed),
            removal_would_block: self.counters.removal_would_block.load(Ordering::Relaxed),
            unreadable_indexes: self.counters.unreadable_indexes.load(Ordering::Relaxed),
            lock_timeouts: self.counters.lock_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Read the current stored index without taking the write lock.
    ///
    /// A missing blob yields an empty index.
    pub fn load_index(&self, identifier: &FlatFileIdentifier) -> Result<FlatFileIndex> {
        match self.store.load_index(identifier)? {
            Some(json) => FlatFileIndex::from_json(&json)
                .with_context(|| format!("Stored index for {} is malformed", identifier)),
            None => Ok(FlatFileIndex::new()),
        }
    }

    fn lock(&self, identifier: &FlatFileIdentifier) -> Result<L::Guard, IndexingError> {
        locks::blocking_acquire(
            &self.locks,
            &identifier.lock_name(),
            self.options.lock_duration,
            self.options.lock_initial_delay,
            self.options.lock_timeout,
        )
        .inspect_err(|_| {
            self.counters.lock_timeouts.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn save_index(&self, identifier: &FlatFileIdentifier, index: &FlatFileIndex) -> Result<()> {
        self.store
            .store_index(identifier, &index.to_json())
            .with_context(|| format!("Failed to store index for {}", identifier))?;
        log::info!(
            "Stored index {} ({} bundles, {} urls, {} debug ids)",
            identifier,
            index.bundles().len(),
            index.files_by_url().len(),
            index.files_by_debug_id().len()
        );
        Ok(())
    }

    fn mark_indexed(&self, identifier: &FlatFileIdentifier, bundle_id: i64) -> Result<()> {
        let updated = self.store.compare_state_and_set(
            identifier,
            bundle_id,
            IndexingState::NotIndexed,
            IndexingState::WasIndexed,
        )?;
        if updated {
            self.counters.indexed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.duplicated_indexing.fetch_add(1, Ordering::Relaxed);
            log::warn!("Bundle {} was already indexed into {}", bundle_id, identifier);
        }
        Ok(())
    }

    /// Register `bundle_id` as pending for every index it belongs to.
    ///
    /// Per project that is the `(release, dist)` index when a release is given,
    /// and the debug-id index when the bundle has debug ids.
    pub fn mark_bundle_for_flat_file_indexing(
        &self,
        bundle_id: i64,
        has_debug_ids: bool,
        project_ids: &[u64],
        release: Option<&str>,
        dist: Option<&str>,
    ) -> Result<Vec<FlatFileIdentifier>> {
        let mut identifiers = Vec::new();

        for &project_id in project_ids {
            if let Some(release) = release.filter(|r| !r.is_empty()) {
                identifiers.push(FlatFileIdentifier::new(
                    project_id,
                    release,
                    dist.unwrap_or(NULL_STRING),
                ));
            }
            if has_debug_ids {
                identifiers.push(FlatFileIdentifier::for_debug_id(project_id));
            }
        }

        for identifier in &identifiers {
            self.store
                .mark_pending(identifier, bundle_id)
                .with_context(|| format!("Failed to mark bundle {} for {}", bundle_id, identifier))?;
        }

        log::debug!(
            "Marked bundle {} for indexing into {} indexes",
            bundle_id,
            identifiers.len()
        );
        Ok(identifiers)
    }

    /// Merge one bundle into the stored index for `identifier`.
    ///
    /// A stored entry for the same bundle id with different metadata is removed
    /// first, so the re-indexed bundle is placed by its new timestamp in every
    /// list.
    pub fn update_artifact_bundle_index<A: BundleArchive + ?Sized>(
        &self,
        bundle_meta: &BundleMeta,
        archive: &A,
        identifier: &FlatFileIdentifier,
    ) -> Result<()> {
        let _guard = self.lock(identifier)?;

        let mut index = self.load_index(identifier)?;
        if index
            .bundle_meta(bundle_meta.id)
            .is_some_and(|existing| existing != bundle_meta)
        {
            log::debug!("Dropping stale entry of bundle {} from {}", bundle_meta.id, identifier);
            index.remove(bundle_meta.id);
        }

        merge_bundle(&mut index, identifier, bundle_meta, archive);
        self.save_index(identifier, &index)?;
        self.mark_indexed(identifier, bundle_meta.id)
    }

    /// Merge many bundles into one release index under a single lock hold.
    pub fn index_bundles_for_release<A: BundleArchive>(
        &self,
        identifier: &FlatFileIdentifier,
        bundles: &[(BundleMeta, A)],
    ) -> Result<()> {
        if !identifier.is_indexing_by_release() {
            anyhow::bail!("{} is not a release index", identifier);
        }

        let _guard = self.lock(identifier)?;

        let mut index = self.load_index(identifier)?;
        for (bundle_meta, archive) in bundles {
            if self.store.indexing_state(identifier, bundle_meta.id)?.is_none() {
                self.store.mark_pending(identifier, bundle_meta.id)?;
            }
            if index
                .bundle_meta(bundle_meta.id)
                .is_some_and(|existing| existing != bundle_meta)
            {
                index.remove(bundle_meta.id);
            }
            index.merge_urls(bundle_meta, archive);
        }
        self.save_index(identifier, &index)?;

        for (bundle_meta, _) in bundles {
            self.mark_indexed(identifier, bundle_meta.id)?;
        }
        Ok(())
    }

    /// Remove a deleted bundle from every index that tracks it.
    ///
    /// Returns how many stored indexes changed. An index whose lock cannot be
    /// taken in time, or whose stored blob cannot be read, is skipped and keeps
    /// tracking the bundle, so a later call retries it.
    pub fn remove_bundle_from_indexes(&self, bundle_id: i64) -> Result<usize> {
        let identifiers = self.store.identifiers_for_bundle(bundle_id)?;
        let mut removed = 0usize;

        for identifier in identifiers {
            let _guard = match self.lock(&identifier) {
                Ok(guard) => guard,
                Err(e) => {
                    self.counters.removal_would_block.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Skipping removal of bundle {} from {}: {}", bundle_id, identifier, e);
                    continue;
                }
            };

            let mut index = match self.load_index(&identifier) {
                Ok(index) => index,
                Err(e) => {
                    self.counters.unreadable_indexes.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Skipping removal of bundle {} from {}: {:#}", bundle_id, identifier, e);
                    continue;
                }
            };
            if index.remove(bundle_id) {
                self.save_index(&identifier, &index)?;
                self.counters.removals.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
            self.store.forget_bundle(&identifier, bundle_id)?;
        }

        Ok(removed)
    }
}

fn merge_bundle<A: BundleArchive + ?Sized>(
    index: &mut FlatFileIndex,
    identifier: &FlatFileIdentifier,
    bundle_meta: &BundleMeta,
    archive: &A,
) {
    if identifier.is_indexing_by_release() {
        index.merge_urls(bundle_meta, archive);
    } else {
        index.merge_debug_ids(bundle_meta, archive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::SourceFileType;
    use crate::locks::LocalLocks;
    use crate::store::MemoryStore;
    use chrono::DateTime;
    use std::time::Duration;

    struct Files(Vec<&'static str>);

    impl BundleArchive for Files {
        fn get_all_urls(&self) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }

        fn get_all_debug_ids(&self) -> Vec<(String, SourceFileType)> {
            self.0
                .iter()
                .map(|s| (s.to_string(), SourceFileType::SourceMap))
                .collect()
        }
    }

    fn meta(id: i64, secs: i64) -> BundleMeta {
        BundleMeta::new(id, DateTime::from_timestamp(secs, 0).unwrap())
    }

    fn indexer() -> BundleIndexer<MemoryStore, LocalLocks> {
        BundleIndexer::new(MemoryStore::new(), LocalLocks::new())
    }

    #[test]
    fn test_mark_identifiers() -> Result<()> {
        let indexer = indexer();
        let ids = indexer.mark_bundle_for_flat_file_indexing(1, true, &[10, 20], Some("1.0"), None)?;
        assert_eq!(
            ids,
            vec![
                FlatFileIdentifier::new(10, "1.0", ""),
                FlatFileIdentifier::for_debug_id(10),
                FlatFileIdentifier::new(20, "1.0", ""),
                FlatFileIdentifier::for_debug_id(20),
            ]
        );
        for id in &ids {
            assert_eq!(indexer.store().indexing_state(id, 1)?, Some(IndexingState::NotIndexed));
        }

        let ids = indexer.mark_bundle_for_flat_file_indexing(2, false, &[10], Some(""), Some("web"))?;
        assert!(ids.is_empty());

        let ids = indexer.mark_bundle_for_flat_file_indexing(3, false, &[10], Some("2.0"), Some("web"))?;
        assert_eq!(ids, vec![FlatFileIdentifier::new(10, "2.0", "web")]);
        Ok(())
    }

    #[test]
    fn test_update_release_index() -> Result<()> {
        let indexer = indexer();
        let ids = indexer.mark_bundle_for_flat_file_indexing(1, false, &[1], Some("1.0"), None)?;
        indexer.update_artifact_bundle_index(&meta(1, 100), &Files(vec!["a.js", "b.js"]), &ids[0])?;

        let index = indexer.load_index(&ids[0])?;
        assert_eq!(index.bundles(), &[meta(1, 100)]);
        assert_eq!(index.files_by_url()["a.js"], vec![0]);
        assert!(index.files_by_debug_id().is_empty());
        assert_eq!(indexer.store().indexing_state(&ids[0], 1)?, Some(IndexingState::WasIndexed));
        assert_eq!(indexer.stats().indexed, 1);
        Ok(())
    }

    #[test]
    fn test_update_debug_id_index() -> Result<()> {
        let indexer = indexer();
        let ids = indexer.mark_bundle_for_flat_file_indexing(1, true, &[1], None, None)?;
        indexer.update_artifact_bundle_index(&meta(1, 100), &Files(vec!["abc"]), &ids[0])?;

        let index = indexer.load_index(&ids[0])?;
        assert!(index.files_by_url().is_empty());
        assert_eq!(index.files_by_debug_id()["abc"], vec![0]);
        Ok(())
    }

    #[test]
    fn test_duplicated_indexing_counted() -> Result<()> {
        let indexer = indexer();
        let ids = indexer.mark_bundle_for_flat_file_indexing(1, false, &[1], Some("1.0"), None)?;
        let archive = Files(vec!["a.js"]);
        indexer.update_artifact_bundle_index(&meta(1, 100), &archive, &ids[0])?;
        let first = indexer.store().load_index(&ids[0])?;

        indexer.update_artifact_bundle_index(&meta(1, 100), &archive, &ids[0])?;
        assert_eq!(indexer.store().load_index(&ids[0])?, first);
        assert_eq!(indexer.stats().duplicated_indexing, 1);
        Ok(())
    }

    #[test]
    fn test_reindex_with_new_timestamp_resorts() -> Result<()> {
        let indexer = indexer();
        let id = FlatFileIdentifier::new(1, "1.0", "");
        indexer.update_artifact_bundle_index(&meta(1, 100), &Files(vec!["a.js", "b.js"]), &id)?;
        indexer.update_artifact_bundle_index(&meta(2, 200), &Files(vec!["a.js", "b.js"]), &id)?;
        indexer.update_artifact_bundle_index(&meta(1, 300), &Files(vec!["a.js"]), &id)?;

        let index = indexer.load_index(&id)?;
        let ids: Vec<i64> = index.bundles().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(index.files_by_url()["a.js"], vec![0, 1]);
        assert_eq!(index.files_by_url()["b.js"], vec![0]);
        Ok(())
    }

    #[test]
    fn test_malformed_stored_index_propagates() -> Result<()> {
        let indexer = indexer();
        let id = FlatFileIdentifier::new(1, "1.0", "");
        indexer.store().store_index(&id, "{not json")?;
        let err = indexer
            .update_artifact_bundle_index(&meta(1, 100), &Files(vec!["a.js"]), &id)
            .unwrap_err();
        assert!(err.to_string().contains("malformed"));
        Ok(())
    }

    #[test]
    fn test_lock_timeout_abandons_update() -> Result<()> {
        let locks = LocalLocks::new();
        let indexer = BundleIndexer::new(MemoryStore::new(), locks.clone()).with_options(
            crate::options::IndexerOptionsBuilder::new()
                .lock_timeout(Duration::from_millis(20))
                .lock_initial_delay(Duration::from_millis(2))
                .build(),
        );
        let id = FlatFileIdentifier::new(1, "1.0", "");
        let _held = locks.try_acquire(&id.lock_name(), Duration::from_secs(60)).unwrap();

        let err = indexer
            .update_artifact_bundle_index(&meta(1, 100), &Files(vec!["a.js"]), &id)
            .unwrap_err();
        assert!(err.downcast_ref::<IndexingError>().is_some());
        assert_eq!(indexer.store().load_index(&id)?, None);
        assert_eq!(indexer.stats().lock_timeouts, 1);
        Ok(())
    }

    #[test]
    fn test_remove_from_all_indexes() -> Result<()> {
        let indexer = indexer();
        let ids = indexer.mark_bundle_for_flat_file_indexing(1, true, &[1], Some("1.0"), None)?;
        for id in &ids {
            indexer.update_artifact_bundle_index(&meta(1, 100), &Files(vec!["x"]), id)?;
        }
        indexer.mark_bundle_for_flat_file_indexing(2, false, &[1], Some("1.0"), None)?;
        indexer.update_artifact_bundle_index(&meta(2, 200), &Files(vec!["x"]), &ids[0])?;

        assert_eq!(indexer.remove_bundle_from_indexes(1)?, 2);
        let release = indexer.load_index(&ids[0])?;
        assert_eq!(release.bundles(), &[meta(2, 200)]);
        assert_eq!(release.files_by_url()["x"], vec![0]);
        assert!(indexer.load_index(&ids[1])?.is_empty());
        assert!(indexer.store().identifiers_for_bundle(1)?.is_empty());

        assert_eq!(indexer.remove_bundle_from_indexes(1)?, 0);
        assert_eq!(indexer.stats().removals, 2);
        Ok(())
    }

    #[test]
    fn test_removal_would_block_keeps_tracking() -> Result<()> {
        let locks = LocalLocks::new();
        let indexer = BundleIndexer::new(MemoryStore::new(), locks.clone()).with_options(
            crate::options::IndexerOptionsBuilder::new()
                .lock_timeout(Duration::from_millis(20))
                .lock_initial_delay(Duration::from_millis(2))
                .build(),
        );
        let ids = indexer.mark_bundle_for_flat_file_indexing(1, false, &[1], Some("1.0"), None)?;
        indexer.update_artifact_bundle_index(&meta(1, 100), &Files(vec!["x"]), &ids[0])?;

        let held = locks.try_acquire(&ids[0].lock_name(), Duration::from_secs(60)).unwrap();
        assert_eq!(indexer.remove_bundle_from_indexes(1)?, 0);
        assert_eq!(indexer.stats().removal_would_block, 1);
        assert_eq!(indexer.store().identifiers_for_bundle(1)?, ids);

        drop(held);
        assert_eq!(indexer.remove_bundle_from_indexes(1)?, 1);
        Ok(())
    }

    #[test]
    fn test_unreadable_index_does_not_block_other_removals() -> Result<()> {
        // cover both iteration orders of the two identifiers
        for corrupt in 0..2 {
            let indexer = indexer();
            let ids = indexer.mark_bundle_for_flat_file_indexing(1, true, &[1], Some("1.0"), None)?;
            for id in &ids {
                indexer.update_artifact_bundle_index(&meta(1, 100), &Files(vec!["x"]), id)?;
            }
            let bad = &ids[corrupt];
            let good = &ids[1 - corrupt];
            indexer.store().store_index(bad, "{not json")?;

            assert_eq!(indexer.remove_bundle_from_indexes(1)?, 1);
            assert!(indexer.load_index(good)?.is_empty());
            assert_eq!(indexer.stats().unreadable_indexes, 1);
            assert_eq!(indexer.store().identifiers_for_bundle(1)?, vec![bad.clone()]);
            assert_eq!(indexer.store().load_index(bad)?.as_deref(), Some("{not json"));
        }
        Ok(())
    }

    #[test]
    fn test_index_bundles_for_release() -> Result<()> {
        let indexer = indexer();
        let id = FlatFileIdentifier::new(1, "1.0", "web");
        let bundles = vec![
            (meta(3, 300), Files(vec!["a.js"])),
            (meta(1, 100), Files(vec!["a.js", "b.js"])),
        ];
        indexer.index_bundles_for_release(&id, &bundles)?;

        let index = indexer.load_index(&id)?;
        assert_eq!(index.files_by_url()["a.js"], vec![1, 0]);
        assert_eq!(indexer.store().indexing_state(&id, 3)?, Some(IndexingState::WasIndexed));
        assert_eq!(indexer.stats().indexed, 2);

        let debug: Vec<(BundleMeta, Files)> = Vec::new();
        assert!(indexer
            .index_bundles_for_release(&FlatFileIdentifier::for_debug_id(1), &debug)
            .is_err());
        Ok(())
    }
}
