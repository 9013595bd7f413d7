//! # Training Registry
//!
//! Named training jobs, one model folder each at `{data_dir}/models/{name}`.
//!
//! ## Training Runs:
//! [`TrainingRegistry::train`] claims the job (status `training`) in one
//! commit, runs the engine with the lock released, then records the outcome
//! in a second commit. A job that is already training is never started a
//! second time; the caller just gets its current status back. While a run is
//! in flight the job cannot be replaced, deleted or overwritten by an import.
//!
//! ## Packaged Models:
//! Models move in and out of the service as zip archives of the model
//! folder. Exported archives carry a `training_job.json` describing the job
//! so that importing them elsewhere restores the same options.

use super::{
    remove_dir_if_exists, validate_name, write_json_atomic, PersistentRegistry, RegistryError, RegistryKind,
    RegistryResult, RegistryStore,
};
use crate::archive;
use crate::engine::Engine;
use crate::entities::{TrainingJob, TrainingStatus};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const JOB_METADATA_FILE: &str = "training_job.json";
pub const LOG_FILE: &str = "logs.txt";

/// Dataset reference given to imported models that carry no metadata.
pub const UPLOADED_DATASET: &str = "uploaded";

pub(crate) const INTERRUPTED: &str = "interrupted by restart";

#[derive(Default)]
pub struct TrainingState {
    jobs: BTreeMap<String, TrainingJob>,
}

impl PersistentRegistry for TrainingState {
    type Snapshot = BTreeMap<String, TrainingJob>;

    fn serialize(&self) -> Self::Snapshot {
        self.jobs.clone()
    }

    fn load_state(&mut self, snapshot: Self::Snapshot) {
        self.jobs = snapshot;
    }

    fn reset(&mut self) {
        self.jobs.clear();
    }
}

pub struct TrainingRegistry {
    store: RegistryStore<TrainingState>,
    engine: Arc<dyn Engine>,
}

impl TrainingRegistry {
    /// Open the registry. Jobs saved mid-training can no longer be running,
    /// so they are moved to `error` and the result is saved.
    pub fn open(data_dir: &Path, reset: bool, engine: Arc<dyn Engine>) -> RegistryResult<Self> {
        let registry = Self {
            store: RegistryStore::open(data_dir, RegistryKind::Models, reset)?,
            engine,
        };

        let interrupted = registry
            .store
            .read(|s| s.jobs.values().filter(|j| j.status.is_running()).count());
        if interrupted > 0 {
            registry.store.commit(|state| {
                for job in state.jobs.values_mut() {
                    if let Ok(next) = job.status.fail() {
                        warn!(model = %job.model_name, "Training was interrupted by a restart");
                        job.status = next;
                        job.last_error = Some(INTERRUPTED.to_string());
                    }
                }
            })?;
        }

        Ok(registry)
    }

    pub fn folder(&self) -> PathBuf {
        self.store.folder()
    }

    pub fn model_folder(&self, name: &str) -> PathBuf {
        self.folder().join(name)
    }

    pub fn logs_path(&self, name: &str) -> PathBuf {
        self.model_folder(name).join(LOG_FILE)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store.read(|s| s.jobs.contains_key(name))
    }

    pub fn get(&self, name: &str) -> Option<TrainingJob> {
        self.store.read(|s| s.jobs.get(name).cloned())
    }

    pub fn list(&self) -> Vec<TrainingJob> {
        self.store.read(|s| s.jobs.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.store.read(|s| s.jobs.len())
    }

    pub fn status(&self, name: &str) -> Option<TrainingStatus> {
        self.store.read(|s| s.jobs.get(name).map(|j| j.status))
    }

    /// Register `job`. With `keep_existing` set and the name already taken,
    /// nothing changes and `Ok(false)` is returned. A job that is training
    /// right now is never replaced.
    pub fn add_job(&self, job: TrainingJob, keep_existing: bool) -> RegistryResult<bool> {
        validate_name(RegistryKind::Models, &job.model_name)?;

        self.store.commit(|state| -> RegistryResult<bool> {
            if let Some(existing) = state.jobs.get(&job.model_name) {
                if keep_existing {
                    info!(model = %job.model_name, "Training job already registered, keeping it");
                    return Ok(false);
                }
                if existing.status.is_running() {
                    warn!(model = %job.model_name, "Refusing to replace a job that is training");
                    return Err(RegistryError::busy(RegistryKind::Models, &job.model_name));
                }
            }

            fs::create_dir_all(self.model_folder(&job.model_name))?;
            info!(model = %job.model_name, dataset = %job.dataset_name, "Training job added");
            state.jobs.insert(job.model_name.clone(), job);
            Ok(true)
        })?
    }

    /// Remove the model folder and the job. Returns whether it was registered.
    pub fn delete_model(&self, name: &str) -> RegistryResult<bool> {
        validate_name(RegistryKind::Models, name)?;

        self.store.commit(|state| -> RegistryResult<bool> {
            if state.jobs.get(name).is_some_and(|job| job.status.is_running()) {
                return Err(RegistryError::busy(RegistryKind::Models, name));
            }
            remove_dir_if_exists(&self.model_folder(name))?;
            let removed = state.jobs.remove(name).is_some();
            if removed {
                info!(model = %name, "Model deleted");
            }
            Ok(removed)
        })?
    }

    /// Train the named model on the processed dataset at `dataset_dir`.
    ///
    /// Returns `None` for an unknown model. Engine failures are not errors
    /// here: they leave the job in `error` with the cause in `last_error`.
    pub fn train(&self, name: &str, dataset_dir: &Path) -> RegistryResult<Option<TrainingStatus>> {
        validate_name(RegistryKind::Models, name)?;
        if !self.contains(name) {
            warn!(model = %name, "Training requested for unknown model");
            return Ok(None);
        }

        let claim = self.store.commit(|state| {
            let job = state.jobs.get_mut(name)?;
            match job.status.begin() {
                Ok(next) => {
                    job.status = next;
                    job.last_error = None;
                    Some(Ok(job.clone()))
                }
                Err(_) => Some(Err(job.status)),
            }
        })?;

        let job = match claim {
            None => return Ok(None),
            Some(Err(current)) => {
                info!(model = %name, "Model is already training");
                return Ok(Some(current));
            }
            Some(Ok(job)) => job,
        };

        info!(model = %name, dataset = %dataset_dir.display(), "Begin training model");
        let output_dir = self.model_folder(name);
        let outcome = fs::create_dir_all(&output_dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| self.engine.train(&job, &output_dir, dataset_dir, &self.logs_path(name)));

        let finished = self.store.commit(|state| {
            let job = state.jobs.get_mut(name)?;
            let transition = match &outcome {
                Ok(()) => job.status.complete(),
                Err(_) => job.status.fail(),
            };
            match transition {
                Ok(next) => job.status = next,
                Err(e) => warn!(model = %name, error = %e, "Job changed while training"),
            }
            if let Err(cause) = &outcome {
                job.last_error = Some(format!("{:#}", cause));
            }
            Some(job.status)
        })?;

        match &outcome {
            Ok(()) => info!(model = %name, "Finished training model"),
            Err(e) => error!(model = %name, error = %format!("{:#}", e), "Error in training model"),
        }
        Ok(finished)
    }

    /// Contents of the job's training log; empty until training has written one.
    pub fn logs(&self, name: &str) -> RegistryResult<String> {
        validate_name(RegistryKind::Models, name)?;
        if !self.contains(name) {
            return Err(RegistryError::not_found(RegistryKind::Models, name));
        }
        match fs::read_to_string(self.logs_path(name)) {
            Ok(logs) => Ok(logs),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Install a packaged model from a zip archive as a finished job called
    /// `name`, replacing any idle model of that name.
    pub fn import_model(&self, name: &str, archive_path: &Path) -> RegistryResult<TrainingJob> {
        validate_name(RegistryKind::Models, name)?;
        let folder = self.model_folder(name);

        self.store.commit(|state| -> RegistryResult<TrainingJob> {
            let current = state.jobs.get(name).map(|job| job.status).unwrap_or_default();
            let installed = current.install().map_err(|e| {
                warn!(model = %name, error = %e, "Refusing to import over a job that is training");
                RegistryError::busy(RegistryKind::Models, name)
            })?;

            remove_dir_if_exists(&folder)?;
            match Self::install(name, archive_path, &folder) {
                Ok(mut job) => {
                    job.status = installed;
                    info!(model = %name, "Imported model");
                    state.jobs.insert(name.to_string(), job.clone());
                    Ok(job)
                }
                Err(e) => {
                    error!(model = %name, error = %e, "Failed to import model");
                    remove_dir_if_exists(&folder)?;
                    state.jobs.remove(name);
                    Err(e)
                }
            }
        })?
    }

    /// Unpack the archive into `folder` and build the job it describes.
    fn install(name: &str, archive_path: &Path, folder: &Path) -> RegistryResult<TrainingJob> {
        archive::unpack(archive_path, folder)?;

        let metadata = folder.join(JOB_METADATA_FILE);
        let mut job = if metadata.exists() {
            let contents = fs::read_to_string(&metadata)?;
            serde_json::from_str::<TrainingJob>(&contents)
                .map_err(|e| RegistryError::InvalidArchive(format!("bad {}: {}", JOB_METADATA_FILE, e)))?
        } else {
            TrainingJob::new(name, UPLOADED_DATASET)
        };
        job.model_name = name.to_string();
        job.last_error = None;
        Ok(job)
    }

    /// Zip the model folder, with a fresh `training_job.json`, into a
    /// temporary archive and return its path.
    pub fn export_model(&self, name: &str) -> RegistryResult<PathBuf> {
        validate_name(RegistryKind::Models, name)?;
        let job = self
            .get(name)
            .ok_or_else(|| RegistryError::not_found(RegistryKind::Models, name))?;

        let folder = self.model_folder(name);
        fs::create_dir_all(&folder)?;
        write_json_atomic(&folder.join(JOB_METADATA_FILE), &job)?;

        let archive_path = archive::temp_archive_path(name);
        archive::pack_dir(&folder, &archive_path)?;
        Ok(archive_path)
    }

    pub fn reset(&self) -> RegistryResult<()> {
        self.store.reset()
    }
}
