//! # Persistent Registries
//!
//! A registry is a named collection of one entity type, mirrored on disk by
//! a JSON state file and a content folder:
//!
//! ```text
//! {data_dir}/{name}.json   snapshot of the collection
//! {data_dir}/{name}/...    one subfolder per key
//! ```
//!
//! ## Structure:
//! - [`PersistentRegistry`]: implemented by each registry's in-memory state
//!   (serialize, load_state, reset).
//! - [`RegistryStore`]: generic helper that owns the state behind a mutex and
//!   handles opening, saving and resetting for any `PersistentRegistry`.
//! - [`RegistryStore::commit`]: the only way to mutate state. The mutation
//!   runs under the lock and the snapshot is written once afterwards, on every
//!   exit path of the mutation.
//!
//! ## Names:
//! Every key that becomes a path segment goes through [`validate_name`]
//! first, so no entry can address a folder outside its registry.
//!
//! ## Thread Safety:
//! There is one store per registry kind, shared through `Arc` by the
//! [`Interface`](crate::interface::Interface). Check-and-set operations such
//! as claiming a job for a run happen inside a single `commit`, so they are
//! atomic with respect to other callers.

pub mod dataset;
pub mod error;
pub mod pipeline_cache;
pub mod training;
pub mod transcription;

pub use dataset::{DatasetRegistry, FolderKind};
pub use error::{RegistryError, RegistryResult};
pub use pipeline_cache::PipelineCache;
pub use training::TrainingRegistry;
pub use transcription::TranscriptionRegistry;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The three collections managed by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    Datasets,
    Models,
    Transcriptions,
}

impl RegistryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::Datasets => "datasets",
            RegistryKind::Models => "models",
            RegistryKind::Transcriptions => "transcriptions",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory side of a registry.
///
/// `load_state(serialize())` must reproduce an equivalent collection.
pub trait PersistentRegistry: Default + Send {
    type Snapshot: Serialize + DeserializeOwned;

    fn serialize(&self) -> Self::Snapshot;

    fn load_state(&mut self, snapshot: Self::Snapshot);

    /// Drop every entry from memory.
    fn reset(&mut self);
}

/// Generic open/commit/save/reset lifecycle over a [`PersistentRegistry`].
pub struct RegistryStore<S> {
    data_dir: PathBuf,
    kind: RegistryKind,
    state: Mutex<S>,
}

impl<S: PersistentRegistry> RegistryStore<S> {
    /// Open the registry rooted at `data_dir`.
    ///
    /// With `reset` set the collection starts empty and the empty state is
    /// saved straight away. Without it, the last saved snapshot is loaded if
    /// there is one.
    pub fn open(data_dir: &Path, kind: RegistryKind, reset: bool) -> RegistryResult<Self> {
        fs::create_dir_all(data_dir)?;

        let store = Self {
            data_dir: data_dir.to_path_buf(),
            kind,
            state: Mutex::new(S::default()),
        };

        let state_file = store.state_file();
        if reset {
            store.save()?;
            info!(registry = %kind, "Registry state reset on open");
        } else if state_file.exists() {
            let contents = fs::read_to_string(&state_file)?;
            let snapshot: S::Snapshot = serde_json::from_str(&contents)?;
            store.state.lock().load_state(snapshot);
            info!(registry = %kind, path = %state_file.display(), "Loaded registry state");
        } else {
            debug!(registry = %kind, "Starting with an empty registry");
        }

        Ok(store)
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.kind.as_str()))
    }

    /// Content folder holding one subfolder per key.
    pub fn folder(&self) -> PathBuf {
        self.data_dir.join(self.kind.as_str())
    }

    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let state = self.state.lock();
        f(&state)
    }

    /// Run `mutate` under the lock, then persist the resulting snapshot.
    ///
    /// The snapshot is written whatever `mutate` returns, so partial changes
    /// made before an early return are flushed too. A failed write is
    /// returned to the caller.
    pub fn commit<R>(&self, mutate: impl FnOnce(&mut S) -> R) -> RegistryResult<R> {
        let mut state = self.state.lock();
        let result = mutate(&mut state);
        self.write_snapshot(&state)?;
        Ok(result)
    }

    /// Persist the current state without changing it.
    pub fn save(&self) -> RegistryResult<()> {
        let state = self.state.lock();
        self.write_snapshot(&state)
    }

    /// Delete the content folder, clear memory and persist the empty state.
    pub fn reset(&self) -> RegistryResult<()> {
        let mut state = self.state.lock();
        remove_dir_if_exists(&self.folder())?;
        state.reset();
        self.write_snapshot(&state)?;
        info!(registry = %self.kind, "Registry reset");
        Ok(())
    }

    fn write_snapshot(&self, state: &S) -> RegistryResult<()> {
        write_json_atomic(&self.state_file(), &state.serialize())
    }
}

/// Reject names that are not a single plain path component: empty, `.`,
/// `..`, or containing `/`, `\` or NUL.
pub fn validate_name(kind: RegistryKind, name: &str) -> RegistryResult<()> {
    let malformed = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if malformed {
        return Err(RegistryError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Write JSON by staging to a sibling temp file and renaming it over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> RegistryResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(json.as_bytes())?;
    temp_file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// `remove_dir_all` that treats a missing directory as success.
pub(crate) fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sorted file listing of `dir`; a missing directory lists as empty.
pub(crate) fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Notes {
        entries: BTreeMap<String, String>,
    }

    impl PersistentRegistry for Notes {
        type Snapshot = BTreeMap<String, String>;

        fn serialize(&self) -> Self::Snapshot {
            self.entries.clone()
        }

        fn load_state(&mut self, snapshot: Self::Snapshot) {
            self.entries = snapshot;
        }

        fn reset(&mut self) {
            self.entries.clear();
        }
    }

    fn open(dir: &TempDir) -> RegistryStore<Notes> {
        RegistryStore::open(dir.path(), RegistryKind::Datasets, false).unwrap()
    }

    #[test]
    fn test_paths() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert_eq!(store.state_file(), dir.path().join("datasets.json"));
        assert_eq!(store.folder(), dir.path().join("datasets"));
    }

    #[test]
    fn test_commit_persists_and_reopen_loads() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store
            .commit(|notes| notes.entries.insert("a".into(), "1".into()))
            .unwrap();
        assert!(store.state_file().exists());

        let reopened = open(&dir);
        assert_eq!(reopened.read(|n| n.entries.clone()), store.read(|n| n.entries.clone()));
    }

    #[test]
    fn test_commit_saves_on_early_return() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let outcome: Result<(), &str> = store
            .commit(|notes| {
                notes.entries.insert("partial".into(), "x".into());
                Err("stopped halfway")
            })
            .unwrap();
        assert!(outcome.is_err());

        let reopened = open(&dir);
        assert!(reopened.read(|n| n.entries.contains_key("partial")));
    }

    #[test]
    fn test_save_writes_current_state() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert!(!store.state_file().exists());

        store.save().unwrap();
        let saved: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(store.state_file()).unwrap()).unwrap();
        assert!(saved.is_empty());
    }

    #[test]
    fn test_reset_flag_ignores_existing_state() {
        let dir = TempDir::new().unwrap();
        open(&dir).commit(|n| n.entries.insert("a".into(), "1".into())).unwrap();

        let fresh: RegistryStore<Notes> =
            RegistryStore::open(dir.path(), RegistryKind::Datasets, true).unwrap();
        assert!(fresh.read(|n| n.entries.is_empty()));

        // The empty state is what a later plain open sees.
        assert!(open(&dir).read(|n| n.entries.is_empty()));
    }

    #[test]
    fn test_validate_name() {
        for name in ["d1", "my model", "a.b", "...", "wav2vec2-base"] {
            assert!(validate_name(RegistryKind::Datasets, name).is_ok(), "{name}");
        }
        for name in ["", ".", "..", "../x", "a/b", "a\\b", "nul\0byte"] {
            assert!(
                matches!(
                    validate_name(RegistryKind::Models, name),
                    Err(RegistryError::InvalidName { .. })
                ),
                "{name:?}"
            );
        }
    }

    #[test]
    fn test_reset_clears_memory_and_folder() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        fs::create_dir_all(store.folder().join("a")).unwrap();
        store.commit(|n| n.entries.insert("a".into(), "1".into())).unwrap();

        store.reset().unwrap();
        assert!(store.read(|n| n.entries.is_empty()));
        assert!(!store.folder().exists());
        assert!(open(&dir).read(|n| n.entries.is_empty()));

        // A second reset on an absent folder is fine.
        store.reset().unwrap();
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("state.json.tmp").exists());
        let back: Vec<i32> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn test_list_files_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(list_files(&dir.path().join("nope")).unwrap().is_empty());
    }
}
