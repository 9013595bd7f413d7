//! # Dataset Registry
//!
//! Keeps every dataset under `{data_dir}/datasets/{name}` with two folders:
//!
//! ```text
//! {name}/raw/        copies of the uploaded audio and transcription files
//! {name}/processed/  engine output, one set of files per batch
//! ```
//!
//! Adding a dataset copies its files into `raw/`, rewrites the dataset's
//! file list to point at those copies and runs preprocessing for each batch.
//!
//! ## Locking:
//! Copying and preprocessing can take minutes, so they run without the
//! registry lock. The name is claimed first in a separate in-progress set;
//! a second addition or a deletion of the same name is refused as busy until
//! the first one has committed its result.

use super::{
    list_files, remove_dir_if_exists, validate_name, PersistentRegistry, RegistryError, RegistryKind, RegistryResult,
    RegistryStore,
};
use crate::archive;
use crate::engine::Engine;
use crate::entities::Dataset;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The two content folders of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Raw,
    Processed,
}

impl FolderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderKind::Raw => "raw",
            FolderKind::Processed => "processed",
        }
    }
}

#[derive(Default)]
pub struct DatasetState {
    datasets: BTreeMap<String, Dataset>,
}

impl PersistentRegistry for DatasetState {
    type Snapshot = BTreeMap<String, Dataset>;

    fn serialize(&self) -> Self::Snapshot {
        self.datasets.clone()
    }

    fn load_state(&mut self, snapshot: Self::Snapshot) {
        self.datasets = snapshot;
    }

    fn reset(&mut self) {
        self.datasets.clear();
    }
}

pub struct DatasetRegistry {
    store: RegistryStore<DatasetState>,
    engine: Arc<dyn Engine>,
    /// Names whose files are being copied and preprocessed.
    populating: Mutex<HashSet<String>>,
}

/// Holds a name in the in-progress set until dropped.
struct PopulateClaim<'a> {
    populating: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for PopulateClaim<'_> {
    fn drop(&mut self) {
        self.populating.lock().remove(&self.name);
    }
}

impl DatasetRegistry {
    pub fn open(data_dir: &Path, reset: bool, engine: Arc<dyn Engine>) -> RegistryResult<Self> {
        Ok(Self {
            store: RegistryStore::open(data_dir, RegistryKind::Datasets, reset)?,
            engine,
            populating: Mutex::new(HashSet::new()),
        })
    }

    pub fn folder(&self) -> PathBuf {
        self.store.folder()
    }

    pub fn dataset_folder(&self, name: &str, kind: FolderKind) -> PathBuf {
        self.folder().join(name).join(kind.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store.read(|s| s.datasets.contains_key(name))
    }

    pub fn get(&self, name: &str) -> Option<Dataset> {
        self.store.read(|s| s.datasets.get(name).cloned())
    }

    pub fn list(&self) -> Vec<Dataset> {
        self.store.read(|s| s.datasets.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.store.read(|s| s.datasets.len())
    }

    /// Register `dataset` and preprocess it.
    ///
    /// With `keep_existing` set and the name already registered, nothing
    /// changes and `Ok(false)` is returned. Otherwise the entry is inserted
    /// or overwritten and `Ok(true)` is returned. A new dataset whose files
    /// cannot be copied or preprocessed leaves no folder and no entry behind.
    pub fn add_dataset(&self, dataset: Dataset, keep_existing: bool) -> RegistryResult<bool> {
        validate_name(RegistryKind::Datasets, &dataset.name)?;
        let name = dataset.name.clone();
        let _claim = self.claim(&name)?;

        let exists = self.contains(&name);
        if keep_existing && exists {
            info!(dataset = %name, "Dataset already registered, keeping it");
            return Ok(false);
        }

        let populated = match self.populate(dataset) {
            Ok(populated) => populated,
            Err(e) => {
                error!(dataset = %name, error = %e, "Failed to add dataset");
                if !exists {
                    remove_dir_if_exists(&self.folder().join(&name))?;
                }
                return Err(e);
            }
        };

        self.store.commit(|state| {
            state.datasets.insert(name.clone(), populated);
        })?;
        info!(dataset = %name, "Dataset added");
        Ok(true)
    }

    fn claim(&self, name: &str) -> RegistryResult<PopulateClaim<'_>> {
        if !self.populating.lock().insert(name.to_string()) {
            warn!(dataset = %name, "Dataset is already being added");
            return Err(RegistryError::busy(RegistryKind::Datasets, name));
        }
        Ok(PopulateClaim {
            populating: &self.populating,
            name: name.to_string(),
        })
    }

    /// Copy files into `raw/`, point the dataset at the copies and run
    /// preprocessing into `processed/`.
    fn populate(&self, mut dataset: Dataset) -> RegistryResult<Dataset> {
        let raw = self.dataset_folder(&dataset.name, FolderKind::Raw);
        let processed = self.dataset_folder(&dataset.name, FolderKind::Processed);
        fs::create_dir_all(&raw)?;
        fs::create_dir_all(&processed)?;

        let mut copies = Vec::with_capacity(dataset.files.len());
        for file in &dataset.files {
            if file.parent() == Some(raw.as_path()) {
                copies.push(file.clone());
                continue;
            }
            let file_name = file.file_name().ok_or_else(|| RegistryError::Preprocessing {
                dataset: dataset.name.clone(),
                message: format!("{} is not a file", file.display()),
            })?;
            let copy = raw.join(file_name);
            fs::copy(file, &copy)?;
            copies.push(copy);
        }
        dataset.files = copies;

        for batch in dataset.to_batches() {
            self.engine
                .preprocess(&batch, &processed)
                .map_err(|e| RegistryError::Preprocessing {
                    dataset: dataset.name.clone(),
                    message: format!("{:#}", e),
                })?;
        }
        Ok(dataset)
    }

    /// Remove the dataset and its folders. Returns whether it was registered.
    pub fn delete_dataset(&self, name: &str) -> RegistryResult<bool> {
        validate_name(RegistryKind::Datasets, name)?;
        let populating = self.populating.lock();
        if populating.contains(name) {
            return Err(RegistryError::busy(RegistryKind::Datasets, name));
        }

        self.store.commit(|state| -> RegistryResult<bool> {
            remove_dir_if_exists(&self.folder().join(name))?;
            let removed = state.datasets.remove(name).is_some();
            if removed {
                info!(dataset = %name, "Dataset deleted");
            } else {
                warn!(dataset = %name, "Deleted folder of unregistered dataset");
            }
            Ok(removed)
        })?
    }

    /// Whether both folders exist and the engine considers the processed
    /// output complete for the raw files.
    pub fn is_dataset_processed(&self, name: &str) -> RegistryResult<bool> {
        validate_name(RegistryKind::Datasets, name)?;
        let raw = self.dataset_folder(name, FolderKind::Raw);
        let processed = self.dataset_folder(name, FolderKind::Processed);
        if !raw.is_dir() || !processed.is_dir() {
            return Ok(false);
        }

        let raw_files = list_files(&raw)?;
        let processed_files = list_files(&processed)?;
        Ok(self.engine.has_finished_processing(&raw_files, &processed_files))
    }

    /// Zip the dataset folder into a temporary archive and return its path.
    pub fn export(&self, name: &str) -> RegistryResult<PathBuf> {
        validate_name(RegistryKind::Datasets, name)?;
        if !self.contains(name) {
            return Err(RegistryError::not_found(RegistryKind::Datasets, name));
        }

        let archive_path = archive::temp_archive_path(name);
        archive::pack_dir(&self.folder().join(name), &archive_path)?;
        Ok(archive_path)
    }

    pub fn reset(&self) -> RegistryResult<()> {
        self.store.reset()
    }
}
