use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum CacheError<E> {
    #[error("failed to read source metadata: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build cached artifact: {0}")]
    Build(E),
}

/// Identity of a compiled artifact: what it was built from, and when that source last changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    identity: Arc<str>,
    modified: Option<SystemTime>,
}

impl CacheKey {
    /// Key for sources without a backing file (inline script text, generated code).
    pub fn inline(identity: impl Into<Arc<str>>) -> Self {
        Self {
            identity: identity.into(),
            modified: None,
        }
    }

    /// Key for a file on disk: canonical path plus modification time.
    pub fn file(path: &Path) -> std::io::Result<Self> {
        let canonical = std::fs::canonicalize(path)?;
        let modified = std::fs::metadata(&canonical)?.modified().ok();
        Ok(Self {
            identity: Arc::from(canonical.to_string_lossy().as_ref()),
            modified,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

/// Process-wide memo of compiled artifacts.
///
/// Each key is built at most once: concurrent callers for the same key serialize on that key's
/// slot while callers for other keys proceed. Failed builds are not cached, and builders must not
/// re-enter the cache for the key they are building.
#[derive(Debug)]
pub struct CompileCache<V> {
    slots: DashMap<CacheKey, Slot<V>>,
}

impl<V> Default for CompileCache<V> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<V> CompileCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the artifact for `key`, running `build` if no caller has built it yet.
    ///
    /// `build` runs while this key's slot is locked, so it must not call back into the cache for
    /// the same key: that call would deadlock. Other keys are fine. A failed build leaves no entry
    /// behind.
    pub fn get_or_build<E, F>(&self, key: CacheKey, build: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        // Clone the slot out so the shard lock is released before building.
        let slot: Slot<V> = Arc::clone(&self.slots.entry(key.clone()).or_default());

        let mut guard = slot.lock();
        if let Some(built) = guard.as_ref() {
            return Ok(built.clone());
        }

        match build() {
            Ok(value) => {
                let built = Arc::new(value);
                *guard = Some(built.clone());
                drop(guard);
                // A failed builder ahead of us may have dropped the slot from the map.
                self.slots.entry(key).or_insert_with(|| slot.clone());
                Ok(built)
            }
            Err(err) => {
                drop(guard);
                // Leave the slot alone while another caller holds it: it will fill or drop it.
                self.slots.remove_if(&key, |_, current| {
                    Arc::ptr_eq(current, &slot)
                        && current.try_lock().is_some_and(|built| built.is_none())
                });
                Err(err)
            }
        }
    }

    /// Builds (or reuses) the artifact for `path`. Touching the file invalidates the old entry.
    pub fn get_or_build_file<E, F>(&self, path: &Path, build: F) -> Result<Arc<V>, CacheError<E>>
    where
        F: FnOnce(&Path) -> Result<V, E>,
    {
        let key = CacheKey::file(path)?;

        // Entries for older versions of the same file can never be hit again.
        self.slots
            .retain(|k, _| k.identity != key.identity || k.modified == key.modified);

        let source = PathBuf::from(key.identity());
        self.get_or_build(key, || build(&source))
            .map_err(CacheError::Build)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.lock().is_some())
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}
