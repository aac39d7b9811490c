//! Per-path access coordination.
//!
//! The update path mutates header fields, scratch state, and rows in
//! place, with no multi-version concurrency: one writer at a time per
//! database file, readers only while no writer is active. An in-process
//! registry hands out one `RwLock` per resolved path, scoping
//! exclusivity to the file, so distinct databases proceed concurrently.
//!
//! Cross-process coordination is out of scope; an embedder sharing files
//! between processes must add its own advisory locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};

/// Shared lock for one database path.
///
/// Clones refer to the same underlying lock as long as they resolve to
/// the same file.
#[derive(Debug, Clone)]
pub(crate) struct PathLock(pub(crate) Arc<RwLock<()>>);

/// Registry of live path locks. Weak entries let locks die with their
/// last `Database`; dead entries are swept on each lookup.
static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Weak<RwLock<()>>>>> = OnceLock::new();

impl PathLock {
    /// Returns the lock shared by every `Database` for `path` in this
    /// process.
    pub(crate) fn for_path(path: &Path) -> Self {
        let key = resolve(path);
        let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let mut map = registry.lock().unwrap_or_else(PoisonError::into_inner);

        map.retain(|_, weak| weak.strong_count() > 0);

        if let Some(lock) = map.get(&key).and_then(Weak::upgrade) {
            return Self(lock);
        }

        let lock = Arc::new(RwLock::new(()));
        map.insert(key, Arc::downgrade(&lock));
        Self(lock)
    }
}

/// Resolves a path to a stable registry key.
///
/// The file itself may not exist yet (create), so the parent directory is
/// canonicalized and the file name appended; a path that resolves nowhere
/// keys on its literal form.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}
