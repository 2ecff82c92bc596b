// Storage of index blobs and per-bundle indexing state
use crate::constants;
use crate::identifier::FlatFileIdentifier;
use crate::locks::FileLock;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Whether a bundle marked for an index has been merged into it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingState {
    NotIndexed,
    WasIndexed,
}

/// Where serialized indexes and indexing state live.
///
/// Implementations must be safe to share between writers; exclusion for a
/// single identifier is provided by the caller's lock, not by the store.
pub trait IndexStore: Send + Sync {
    fn load_index(&self, identifier: &FlatFileIdentifier) -> Result<Option<String>>;

    fn store_index(&self, identifier: &FlatFileIdentifier, json: &str) -> Result<()>;

    /// Record `bundle_id` as pending for `identifier` (state `NotIndexed`)
    fn mark_pending(&self, identifier: &FlatFileIdentifier, bundle_id: i64) -> Result<()>;

    /// Move the bundle's state from `expected` to `new`. Returns `false` when
    /// the current state is not `expected` (or the bundle is not tracked).
    fn compare_state_and_set(
        &self,
        identifier: &FlatFileIdentifier,
        bundle_id: i64,
        expected: IndexingState,
        new: IndexingState,
    ) -> Result<bool>;

    fn indexing_state(
        &self,
        identifier: &FlatFileIdentifier,
        bundle_id: i64,
    ) -> Result<Option<IndexingState>>;

    /// Every identifier that tracks `bundle_id`
    fn identifiers_for_bundle(&self, bundle_id: i64) -> Result<Vec<FlatFileIdentifier>>;

    /// Stop tracking `bundle_id` for `identifier`
    fn forget_bundle(&self, identifier: &FlatFileIdentifier, bundle_id: i64) -> Result<()>;
}

fn poisoned() -> anyhow::Error {
    anyhow!("index store lock poisoned")
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    indexes: RwLock<HashMap<FlatFileIdentifier, String>>,
    states: RwLock<HashMap<FlatFileIdentifier, BTreeMap<i64, IndexingState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStore for MemoryStore {
    fn load_index(&self, identifier: &FlatFileIdentifier) -> Result<Option<String>> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        Ok(indexes.get(identifier).cloned())
    }

    fn store_index(&self, identifier: &FlatFileIdentifier, json: &str) -> Result<()> {
        let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
        indexes.insert(identifier.clone(), json.to_string());
        Ok(())
    }

    fn mark_pending(&self, identifier: &FlatFileIdentifier, bundle_id: i64) -> Result<()> {
        let mut states = self.states.write().map_err(|_| poisoned())?;
        states
            .entry(identifier.clone())
            .or_default()
            .insert(bundle_id, IndexingState::NotIndexed);
        Ok(())
    }

    fn compare_state_and_set(
        &self,
        identifier: &FlatFileIdentifier,
        bundle_id: i64,
        expected: IndexingState,
        new: IndexingState,
    ) -> Result<bool> {
        let mut states = self.states.write().map_err(|_| poisoned())?;
        let state = states
            .get_mut(identifier)
            .and_then(|bundles| bundles.get_mut(&bundle_id));
        match state {
            Some(state) if *state == expected => {
                *state = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn indexing_state(
        &self,
        identifier: &FlatFileIdentifier,
        bundle_id: i64,
    ) -> Result<Option<IndexingState>> {
        let states = self.states.read().map_err(|_| poisoned())?;
        Ok(states
            .get(identifier)
            .and_then(|bundles| bundles.get(&bundle_id))
            .copied())
    }

    fn identifiers_for_bundle(&self, bundle_id: i64) -> Result<Vec<FlatFileIdentifier>> {
        let states = self.states.read().map_err(|_| poisoned())?;
        let mut identifiers: Vec<FlatFileIdentifier> = states
            .iter()
            .filter(|(_, bundles)| bundles.contains_key(&bundle_id))
            .map(|(identifier, _)| identifier.clone())
            .collect();
        identifiers.sort_by(|a, b| a.key_hash().cmp(&b.key_hash()));
        Ok(identifiers)
    }

    fn forget_bundle(&self, identifier: &FlatFileIdentifier, bundle_id: i64) -> Result<()> {
        let mut states = self.states.write().map_err(|_| poisoned())?;
        if let Some(bundles) = states.get_mut(identifier) {
            bundles.remove(&bundle_id);
        }
        Ok(())
    }
}

// ============================================================================
// FileStore - one blob and one state file per identifier
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    identifier: FlatFileIdentifier,
    #[serde(default)]
    bundles: BTreeMap<i64, IndexingState>,
}

/// Store rooted at a directory that several processes may share.
///
/// State file updates are serialized through a lock file per identifier.
#[derive(Debug)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `directory`
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.exists() {
            fs::create_dir_all(&directory)
                .with_context(|| format!("Failed to create store directory: {}", directory.display()))?;
        }
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn read_state(&self, identifier: &FlatFileIdentifier) -> Result<StateFile> {
        let path = constants::state_path(&self.directory, &identifier.key_hash());
        if !path.exists() {
            return Ok(StateFile {
                identifier: identifier.clone(),
                bundles: BTreeMap::new(),
            });
        }
        read_state_file(&path)
    }

    fn write_state(&self, state: &StateFile) -> Result<()> {
        let path = constants::state_path(&self.directory, &state.identifier.key_hash());
        let json = serde_json::to_string_pretty(state).context("Failed to serialize indexing state")?;
        write_atomic(&path, &json)
    }

    fn update_state<F, T>(&self, identifier: &FlatFileIdentifier, update: F) -> Result<T>
    where
        F: FnOnce(&mut BTreeMap<i64, IndexingState>) -> (T, bool),
    {
        let lock_path = constants::state_lock_path(&self.directory, &identifier.key_hash());
        let _lock = FileLock::lock_exclusive(&lock_path)
            .with_context(|| format!("Failed to lock state file: {}", lock_path.display()))?;
        let mut state = self.read_state(identifier)?;
        let (result, changed) = update(&mut state.bundles);
        if changed {
            self.write_state(&state)?;
        }
        Ok(result)
    }
}

fn read_state_file(path: &Path) -> Result<StateFile> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse state file: {}", path.display()))
}

/// Write through a temp file and rename, so readers never see a partial file
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename into place: {}", path.display()))?;
    Ok(())
}

impl IndexStore for FileStore {
    fn load_index(&self, identifier: &FlatFileIdentifier) -> Result<Option<String>> {
        let path = constants::index_path(&self.directory, &identifier.key_hash());
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read index: {}", path.display()))?;
        Ok(Some(data))
    }

    fn store_index(&self, identifier: &FlatFileIdentifier, json: &str) -> Result<()> {
        let path = constants::index_path(&self.directory, &identifier.key_hash());
        write_atomic(&path, json)
    }

    fn mark_pending(&self, identifier: &FlatFileIdentifier, bundle_id: i64) -> Result<()> {
        self.update_state(identifier, |bundles| {
            let changed = bundles.insert(bundle_id, IndexingState::NotIndexed)
                != Some(IndexingState::NotIndexed);
            ((), changed)
        })
    }

    fn compare_state_and_set(
        &self,
        identifier: &FlatFileIdentifier,
        bundle_id: i64,
        expected: IndexingState,
        new: IndexingState,
    ) -> Result<bool> {
        self.update_state(identifier, |bundles| match bundles.get_mut(&bundle_id) {
            Some(state) if *state == expected => {
                *state = new;
                (true, true)
            }
            _ => (false, false),
        })
    }

    fn indexing_state(
        &self,
        identifier: &FlatFileIdentifier,
        bundle_id: i64,
    ) -> Result<Option<IndexingState>> {
        let state = self.read_state(identifier)?;
        Ok(state.bundles.get(&bundle_id).copied())
    }

    fn identifiers_for_bundle(&self, bundle_id: i64) -> Result<Vec<FlatFileIdentifier>> {
        let mut identifiers = Vec::new();

        for entry in fs::read_dir(&self.directory)
            .with_context(|| format!("Failed to read directory: {}", self.directory.display()))?
        {
            let path = entry?.path();
            let is_state_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(constants::STATE_FILE_SUFFIX));
            if !is_state_file {
                continue;
            }

            let state = read_state_file(&path)?;
            if state.bundles.contains_key(&bundle_id) {
                identifiers.push(state.identifier);
            }
        }

        identifiers.sort_by(|a, b| a.key_hash().cmp(&b.key_hash()));
        Ok(identifiers)
    }

    fn forget_bundle(&self, identifier: &FlatFileIdentifier, bundle_id: i64) -> Result<()> {
        self.update_state(identifier, |bundles| ((), bundles.remove(&bundle_id).is_some()))
    }
}
