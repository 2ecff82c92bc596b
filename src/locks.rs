// Named, time-bounded mutual exclusion for index writers
use crate::constants;
use crate::error::IndexingError;
use fs2::FileExt as _;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

/// A lock service keyed by name. Holding the returned guard holds the lock;
/// dropping it releases the lock.
pub trait LockService: Send + Sync {
    type Guard: Send;

    /// Take the lock `name` for at most `duration` without waiting
    fn try_acquire(&self, name: &str, duration: Duration) -> Option<Self::Guard>;
}

/// Retry `try_acquire` with exponential backoff until `timeout` elapses.
pub fn blocking_acquire<L: LockService + ?Sized>(
    locks: &L,
    name: &str,
    duration: Duration,
    initial_delay: Duration,
    timeout: Duration,
) -> Result<L::Guard, IndexingError> {
    let start = Instant::now();
    let mut delay = initial_delay.max(Duration::from_millis(1));
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(guard) = locks.try_acquire(name, duration) {
            if attempts > 1 {
                log::debug!("Acquired {} after {} attempts", name, attempts);
            }
            return Ok(guard);
        }

        let waited = start.elapsed();
        if waited >= timeout {
            return Err(IndexingError::LockTimeout {
                name: name.to_string(),
                waited,
            });
        }

        std::thread::sleep(delay.min(timeout - waited));
        delay = (delay * 2).min(constants::MAX_LOCK_RETRY_DELAY);
    }
}

// ============================================================================
// LocalLocks - in-process lock registry
// ============================================================================

#[derive(Debug)]
struct Hold {
    token: u64,
    expires_at: Instant,
}

type Holds = Arc<Mutex<HashMap<String, Hold>>>;

fn lock_holds(holds: &Mutex<HashMap<String, Hold>>) -> MutexGuard<'_, HashMap<String, Hold>> {
    // the map is consistent after every operation, so a poisoned guard is usable
    holds.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lock registry shared by every clone.
///
/// A hold that outlives its duration is expired and can be taken by the next
/// writer; the expired guard then no longer releases anything.
#[derive(Debug, Clone, Default)]
pub struct LocalLocks {
    holds: Holds,
    next_token: Arc<AtomicU64>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, name: &str) -> bool {
        lock_holds(&self.holds)
            .get(name)
            .is_some_and(|hold| hold.expires_at > Instant::now())
    }
}

impl LockService for LocalLocks {
    type Guard = LocalLockGuard;

    fn try_acquire(&self, name: &str, duration: Duration) -> Option<LocalLockGuard> {
        let mut holds = lock_holds(&self.holds);
        let now = Instant::now();

        if let Some(hold) = holds.get(name)
            && hold.expires_at > now
        {
            return None;
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        holds.insert(
            name.to_string(),
            Hold {
                token,
                expires_at: now + duration,
            },
        );

        Some(LocalLockGuard {
            holds: Arc::clone(&self.holds),
            name: name.to_string(),
            token,
        })
    }
}

#[derive(Debug)]
pub struct LocalLockGuard {
    holds: Holds,
    name: String,
    token: u64,
}

impl LocalLockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LocalLockGuard {
    fn drop(&mut self) {
        let mut holds = lock_holds(&self.holds);
        if holds.get(&self.name).is_some_and(|hold| hold.token == self.token) {
            holds.remove(&self.name);
        }
    }
}

// ============================================================================
// FileLocks - lock files shared by every process using a store directory
// ============================================================================

type Claims = (Mutex<HashSet<PathBuf>>, Condvar);

fn claims() -> &'static Claims {
    static CLAIMS: OnceLock<Claims> = OnceLock::new();
    CLAIMS.get_or_init(|| (Mutex::new(HashSet::new()), Condvar::new()))
}

/// In-process claim on a lock file path.
///
/// `fs2` locks do not exclude threads of one process on every platform, so
/// threads first contend for the path here.
#[derive(Debug)]
struct PathClaim {
    path: PathBuf,
}

impl PathClaim {
    fn wait(path: &Path) -> Self {
        let (held, released) = claims();
        let mut held = held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(path) {
            held = released.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(path.to_path_buf());
        Self {
            path: path.to_path_buf(),
        }
    }

    fn try_take(path: &Path) -> Option<Self> {
        let (held, _) = claims();
        let mut held = held.lock().unwrap_or_else(PoisonError::into_inner);
        held.insert(path.to_path_buf()).then(|| Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        let (held, released) = claims();
        held.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
        released.notify_all();
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// An exclusive lock on a file, released when dropped or when the owning
/// process exits.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    claim: PathClaim,
}

impl FileLock {
    /// Block until the lock on `path` is free, creating the file if needed
    pub fn lock_exclusive(path: &Path) -> io::Result<Self> {
        let claim = PathClaim::wait(path);
        let file = open_lock_file(path)?;
        file.lock_exclusive()?;
        Ok(Self { file, claim })
    }

    /// Take the lock on `path` if nobody holds it
    pub fn try_lock_exclusive(path: &Path) -> io::Result<Option<Self>> {
        let Some(claim) = PathClaim::try_take(path) else {
            return Ok(None);
        };
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, claim })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.claim.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Named locks backed by lock files in a directory.
///
/// Every process pointing at the same directory contends for the same files.
/// A hold lasts until its guard is dropped or its process exits, so the
/// requested duration is not enforced.
#[derive(Debug, Clone)]
pub struct FileLocks {
    directory: PathBuf,
}

impl FileLocks {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn lock_path(&self, name: &str) -> PathBuf {
        constants::lock_path(&self.directory, name)
    }
}

impl LockService for FileLocks {
    type Guard = FileLock;

    fn try_acquire(&self, name: &str, _duration: Duration) -> Option<FileLock> {
        let path = self.lock_path(name);
        match FileLock::try_lock_exclusive(&path) {
            Ok(lock) => lock,
            Err(e) => {
                log::warn!("Failed to take lock file {}: {}", path.display(), e);
                None
            }
        }
    }
}
