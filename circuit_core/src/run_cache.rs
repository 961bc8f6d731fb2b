//! Persistent run cache.
//!
//! Remembers, per exercise, the resolved set count and any chosen timed-set
//! duration for one `(date, workout)` pair. The entry lives in a host-supplied
//! [`KeyValueStore`] rather than in engine memory so a remounted engine can
//! rebuild the same plan. Durability is best-effort: every store failure is
//! logged and treated as a cache miss.

use crate::{Error, Result};
use chrono::NaiveDate;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::NamedTempFile;

/// Storage key for the single run cache document
pub const RUN_CACHE_KEY: &str = "circuit_run_cache";

/// String key-value store supplied by the host
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

// ============================================================================
// Stores
// ============================================================================

/// In-process store; clones share the same map
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.borrow_mut().remove(key);
        Ok(())
    }
}

/// One file per key inside a directory
///
/// Reads take a shared lock. Writes go to a locked temp file in the same
/// directory which is synced and renamed over the original.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        let read = reader.read_to_string(&mut contents);
        let _ = file.unlock();
        read?;

        Ok(Some(contents))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);

        let temp = NamedTempFile::new_in(&self.dir)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            writer.write_all(value.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Wrote store key '{}' to {:?}", key, path);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Run cache
// ============================================================================

/// Cached per-exercise decisions for one `(date, workout)` run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunCacheEntry {
    pub date: NaiveDate,
    pub workout_id: String,
    #[serde(default)]
    pub sets_by_exercise_id: HashMap<String, usize>,
    #[serde(default)]
    pub durations_by_exercise_id: HashMap<String, u32>,
}

impl RunCacheEntry {
    fn new(date: NaiveDate, workout_id: &str) -> Self {
        Self {
            date,
            workout_id: workout_id.to_string(),
            sets_by_exercise_id: HashMap::new(),
            durations_by_exercise_id: HashMap::new(),
        }
    }

    fn matches(&self, date: NaiveDate, workout_id: &str) -> bool {
        self.date == date && self.workout_id == workout_id
    }
}

/// Fields to merge into one exercise's cached values
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CachePatch {
    pub sets: Option<usize>,
    pub duration: Option<u32>,
}

pub struct RunCache {
    store: Box<dyn KeyValueStore>,
}

impl RunCache {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Entry for `(date, workout_id)`, discarding any entry for another key
    pub fn load(&mut self, date: NaiveDate, workout_id: &str) -> Option<RunCacheEntry> {
        let raw = match self.store.get(RUN_CACHE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Unable to read run cache: {}. Continuing without it.", e);
                return None;
            }
        };

        let entry = match serde_json::from_str::<RunCacheEntry>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Discarding unreadable run cache: {}", e);
                self.discard();
                return None;
            }
        };

        if !entry.matches(date, workout_id) {
            tracing::info!(
                "Run cache is for {} / {}, discarding for {} / {}",
                entry.date,
                entry.workout_id,
                date,
                workout_id
            );
            self.discard();
            return None;
        }

        Some(entry)
    }

    /// Merge `patch` into one exercise without touching the others
    pub fn update(&mut self, date: NaiveDate, workout_id: &str, exercise_id: &str, patch: CachePatch) {
        let mut entry = self
            .load(date, workout_id)
            .unwrap_or_else(|| RunCacheEntry::new(date, workout_id));

        if let Some(sets) = patch.sets {
            entry
                .sets_by_exercise_id
                .insert(exercise_id.to_string(), sets);
        }
        if let Some(duration) = patch.duration {
            entry
                .durations_by_exercise_id
                .insert(exercise_id.to_string(), duration);
        }

        let result = serde_json::to_string(&entry)
            .map_err(Error::from)
            .and_then(|json| self.store.set(RUN_CACHE_KEY, &json));
        if let Err(e) = result {
            tracing::warn!(
                "Unable to persist run cache for '{}': {}. Keeping in-memory values only.",
                exercise_id,
                e
            );
        }
    }

    fn discard(&mut self) {
        if let Err(e) = self.store.remove(RUN_CACHE_KEY) {
            tracing::warn!("Unable to discard stale run cache: {}", e);
        }
    }
}

/// File path used by [`FileStore`] for the run cache inside `dir`
pub fn run_cache_path(dir: &Path) -> PathBuf {
    FileStore::new(dir).path_for(RUN_CACHE_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Store("storage unavailable".into()))
        }
        fn set(&mut self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Store("storage unavailable".into()))
        }
        fn remove(&mut self, _key: &str) -> Result<()> {
            Err(Error::Store("storage unavailable".into()))
        }
    }

    #[test]
    fn test_update_merges_per_exercise() {
        let store = MemoryStore::new();
        let mut cache = RunCache::new(Box::new(store.clone()));
        let today = date("2026-02-07");

        cache.update(today, "w1", "squat", CachePatch { sets: Some(4), duration: None });
        cache.update(today, "w1", "plank", CachePatch { sets: Some(2), duration: Some(45) });
        cache.update(today, "w1", "squat", CachePatch { sets: None, duration: Some(30) });

        let entry = cache.load(today, "w1").unwrap();
        assert_eq!(entry.sets_by_exercise_id["squat"], 4);
        assert_eq!(entry.sets_by_exercise_id["plank"], 2);
        assert_eq!(entry.durations_by_exercise_id["plank"], 45);
        assert_eq!(entry.durations_by_exercise_id["squat"], 30);
    }

    #[test]
    fn test_stale_date_is_discarded() {
        let store = MemoryStore::new();
        let mut cache = RunCache::new(Box::new(store.clone()));

        cache.update(date("2026-02-06"), "w1", "squat", CachePatch { sets: Some(3), duration: None });
        assert!(store.get(RUN_CACHE_KEY).unwrap().is_some());

        assert!(cache.load(date("2026-02-07"), "w1").is_none());
        assert!(store.get(RUN_CACHE_KEY).unwrap().is_none());
        // The old day's values are gone for good
        assert!(cache.load(date("2026-02-06"), "w1").is_none());
    }

    #[test]
    fn test_other_workout_starts_fresh_entry() {
        let mut cache = RunCache::new(Box::new(MemoryStore::new()));
        let today = date("2026-02-07");

        cache.update(today, "w1", "squat", CachePatch { sets: Some(3), duration: None });
        cache.update(today, "w2", "row", CachePatch { sets: Some(5), duration: None });

        let entry = cache.load(today, "w2").unwrap();
        assert_eq!(entry.sets_by_exercise_id.len(), 1);
        assert!(cache.load(today, "w1").is_none());
    }

    #[test]
    fn test_corrupt_cache_is_a_miss() {
        let mut store = MemoryStore::new();
        store.set(RUN_CACHE_KEY, "{ not json").unwrap();
        let mut cache = RunCache::new(Box::new(store.clone()));

        assert!(cache.load(date("2026-02-07"), "w1").is_none());
        assert!(store.get(RUN_CACHE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_broken_store_is_swallowed() {
        let mut cache = RunCache::new(Box::new(BrokenStore));
        let today = date("2026-02-07");
        cache.update(today, "w1", "squat", CachePatch { sets: Some(3), duration: None });
        assert!(cache.load(today, "w1").is_none());
    }

    #[test]
    fn test_file_store_roundtrip_and_atomic_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        let mut cache = RunCache::new(Box::new(store.clone()));
        let today = date("2026-02-07");

        cache.update(today, "w1", "squat", CachePatch { sets: Some(3), duration: None });

        // A fresh handle over the same directory sees the entry
        let mut reopened = RunCache::new(Box::new(FileStore::new(temp_dir.path())));
        let entry = reopened.load(today, "w1").unwrap();
        assert_eq!(entry.sets_by_exercise_id["squat"], 3);

        let files: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        assert_eq!(files, vec![run_cache_path(temp_dir.path())]);
    }

    #[test]
    fn test_file_store_remove_missing_is_ok() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(temp_dir.path().join("nested"));
        assert!(store.get("absent").unwrap().is_none());
        store.remove("absent").unwrap();
    }
}
