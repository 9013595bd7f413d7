//! # Transcription Registry
//!
//! Jobs are keyed by [`TranscriptionKey`] (model location, audio name). Each
//! job owns a folder holding the audio and, once transcribed, its outputs:
//!
//! ```text
//! {data_dir}/transcriptions/{location}/{audio}/{audio}.wav
//!                                             /{audio}.txt
//!                                             /{audio}.eaf
//! ```
//!
//! Hub model identifiers contain `/`, so non-local locations are encoded with
//! URL-safe base64 before they become a path segment. Local locations and
//! audio names must be plain names (see [`validate_name`]).
//!
//! Re-adding a key starts the job over: outputs of the previous run are
//! deleted, and so is the previous folder when the locality flag changed.
//! Jobs that are transcribing right now cannot be replaced or removed.
//!
//! ## Pipelines:
//! Transcribing needs a loaded pipeline for the job's model. Pipelines are
//! kept in a bounded [`PipelineCache`] keyed by the location string as given
//! by the client; local locations are resolved to the absolute path of the
//! training job's model folder only when a pipeline has to be built.

use super::training::INTERRUPTED;
use super::{
    list_files, remove_dir_if_exists, validate_name, PersistentRegistry, PipelineCache, RegistryError, RegistryKind,
    RegistryResult, RegistryStore,
};
use crate::archive;
use crate::engine::{render_elan, render_text, Engine};
use crate::entities::{TranscriptionJob, TranscriptionKey, TranscriptionStatus};
use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Default)]
pub struct TranscriptionState {
    jobs: BTreeMap<TranscriptionKey, TranscriptionJob>,
}

impl PersistentRegistry for TranscriptionState {
    type Snapshot = Vec<TranscriptionJob>;

    fn serialize(&self) -> Self::Snapshot {
        self.jobs.values().cloned().collect()
    }

    fn load_state(&mut self, snapshot: Self::Snapshot) {
        self.jobs = snapshot.into_iter().map(|job| (job.key(), job)).collect();
    }

    fn reset(&mut self) {
        self.jobs.clear();
    }
}

pub struct TranscriptionRegistry {
    store: RegistryStore<TranscriptionState>,
    engine: Arc<dyn Engine>,
    /// Folder of the training registry, where local models live.
    models_folder: PathBuf,
    cache_dir: PathBuf,
    pipelines: PipelineCache,
}

impl TranscriptionRegistry {
    pub fn open(
        data_dir: &Path,
        reset: bool,
        engine: Arc<dyn Engine>,
        models_folder: PathBuf,
        cache_dir: PathBuf,
        max_pipelines: usize,
    ) -> RegistryResult<Self> {
        let registry = Self {
            store: RegistryStore::open(data_dir, RegistryKind::Transcriptions, reset)?,
            engine,
            models_folder,
            cache_dir,
            pipelines: PipelineCache::new(max_pipelines),
        };

        let interrupted = registry
            .store
            .read(|s| s.jobs.values().filter(|j| j.status.is_running()).count());
        if interrupted > 0 {
            registry.store.commit(|state| {
                for job in state.jobs.values_mut() {
                    if let Ok(next) = job.status.fail() {
                        warn!(job = %job.key(), "Transcription was interrupted by a restart");
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

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    /// Audio names and local locations become folder names as they are;
    /// remote locations only need to be non-empty.
    fn validate(job: &TranscriptionJob) -> RegistryResult<()> {
        validate_name(RegistryKind::Transcriptions, &job.audio_name)?;
        if job.is_local {
            validate_name(RegistryKind::Transcriptions, &job.model_location)
        } else if job.model_location.is_empty() || job.model_location.contains('\0') {
            Err(RegistryError::InvalidName {
                kind: RegistryKind::Transcriptions,
                name: job.model_location.clone(),
            })
        } else {
            Ok(())
        }
    }

    pub fn transcription_folder(&self, job: &TranscriptionJob) -> PathBuf {
        let location = if job.is_local {
            job.model_location.clone()
        } else {
            URL_SAFE.encode(job.model_location.as_bytes())
        };
        self.folder().join(location).join(&job.audio_name)
    }

    fn file_path(&self, job: &TranscriptionJob, extension: &str) -> PathBuf {
        self.transcription_folder(job)
            .join(format!("{}.{}", job.audio_name, extension))
    }

    pub fn audio_path(&self, job: &TranscriptionJob) -> PathBuf {
        self.file_path(job, "wav")
    }

    pub fn text_path(&self, job: &TranscriptionJob) -> PathBuf {
        self.file_path(job, "txt")
    }

    pub fn annotation_path(&self, job: &TranscriptionJob) -> PathBuf {
        self.file_path(job, "eaf")
    }

    pub fn get(&self, key: &TranscriptionKey) -> Option<TranscriptionJob> {
        self.store.read(|s| s.jobs.get(key).cloned())
    }

    pub fn list(&self) -> Vec<TranscriptionJob> {
        self.store.read(|s| s.jobs.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.store.read(|s| s.jobs.len())
    }

    pub fn status(&self, key: &TranscriptionKey) -> Option<TranscriptionStatus> {
        self.store.read(|s| s.jobs.get(key).map(|j| j.status))
    }

    /// Register `job`, replacing any idle job with the same key, and copy
    /// `audio_file` into the job folder when given.
    pub fn add_transcription_job(&self, job: TranscriptionJob, audio_file: Option<&Path>) -> RegistryResult<()> {
        Self::validate(&job)?;

        self.store.commit(|state| -> RegistryResult<()> {
            let key = job.key();
            let previous = state.jobs.get(&key);
            if previous.is_some_and(|p| p.status.is_running()) {
                warn!(job = %key, "Refusing to replace a job that is transcribing");
                return Err(RegistryError::busy(RegistryKind::Transcriptions, key.to_string()));
            }
            let previous_folder = previous
                .map(|p| self.transcription_folder(p))
                .filter(|folder| *folder != self.transcription_folder(&job));
            let previous_audio = previous.map(|p| self.audio_path(p));

            fs::create_dir_all(self.transcription_folder(&job))?;
            let destination = self.audio_path(&job);
            let source = audio_file
                .map(Path::to_path_buf)
                .or_else(|| previous_folder.as_ref().and(previous_audio).filter(|a| a.exists()));
            if let Some(source) = source {
                if source != destination {
                    fs::copy(&source, &destination)?;
                }
            }

            // The job starts over, so earlier outputs must not count as completed.
            for stale in [self.text_path(&job), self.annotation_path(&job)] {
                if let Err(e) = fs::remove_file(&stale) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
            }
            if let Some(folder) = previous_folder {
                remove_dir_if_exists(&folder)?;
            }

            info!(job = %key, local = job.is_local, "Transcription job added");
            state.jobs.insert(key, job);
            Ok(())
        })?
    }

    /// Remove the job and its folder. Returns whether it was registered.
    pub fn remove_job(&self, key: &TranscriptionKey) -> RegistryResult<bool> {
        self.store.commit(|state| -> RegistryResult<bool> {
            let Some(job) = state.jobs.get(key) else {
                return Ok(false);
            };
            if job.status.is_running() {
                return Err(RegistryError::busy(RegistryKind::Transcriptions, key.to_string()));
            }
            Self::validate(job)?;

            remove_dir_if_exists(&self.transcription_folder(job))?;
            state.jobs.remove(key);
            info!(job = %key, "Transcription job removed");
            Ok(true)
        })?
    }

    /// Whether both the transcript and the annotation file exist.
    pub fn has_completed(&self, model_location: &str, audio_name: &str) -> bool {
        self.get(&TranscriptionKey::new(model_location, audio_name))
            .is_some_and(|job| self.text_path(&job).exists() && self.annotation_path(&job).exists())
    }

    /// Transcribe the job's audio with its model.
    ///
    /// Returns `None` when no such job exists. Failures leave the job in
    /// `error` with the cause in `last_error` rather than being returned.
    pub fn transcribe(&self, model_location: &str, audio_name: &str) -> RegistryResult<Option<TranscriptionStatus>> {
        let key = TranscriptionKey::new(model_location, audio_name);
        let Some(job) = self.get(&key) else {
            error!(job = %key, "Transcription job not found");
            return Ok(None);
        };
        Self::validate(&job)?;

        let claim = self.store.commit(|state| {
            let job = state.jobs.get_mut(&key)?;
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
                error!(job = %key, "Job is already being transcribed");
                return Ok(Some(current));
            }
            Some(Ok(job)) => job,
        };

        let outcome = self.run(&job);

        let finished = self.store.commit(|state| {
            let job = state.jobs.get_mut(&key)?;
            let transition = match &outcome {
                Ok(()) => job.status.complete(),
                Err(_) => job.status.fail(),
            };
            match transition {
                Ok(next) => job.status = next,
                Err(e) => warn!(job = %key, error = %e, "Job changed while transcribing"),
            }
            if let Err(cause) = &outcome {
                job.last_error = Some(format!("{:#}", cause));
            }
            Some(job.status)
        })?;

        match &outcome {
            Ok(()) => info!(job = %key, "Finished transcription"),
            Err(e) => error!(job = %key, error = %format!("{:#}", e), "Error transcribing audio"),
        }
        Ok(finished)
    }

    fn run(&self, job: &TranscriptionJob) -> anyhow::Result<()> {
        let pipeline = self.pipelines.get_or_build(&job.model_location, || {
            let location = self.resolve_model_location(job)?;
            self.engine.build_pipeline(&location, &self.cache_dir)
        })?;

        let annotations = pipeline.run_inference(&self.audio_path(job))?;

        let text_path = self.text_path(job);
        fs::write(&text_path, render_text(&annotations))
            .with_context(|| format!("failed to write {}", text_path.display()))?;

        let media_file = format!("{}.wav", job.audio_name);
        let annotation_path = self.annotation_path(job);
        fs::write(&annotation_path, render_elan(&annotations, &media_file))
            .with_context(|| format!("failed to write {}", annotation_path.display()))?;
        Ok(())
    }

    /// Location handed to the engine: local models become the absolute path
    /// of their model folder, anything else is passed through.
    fn resolve_model_location(&self, job: &TranscriptionJob) -> anyhow::Result<String> {
        if !job.is_local {
            return Ok(job.model_location.clone());
        }

        let folder = self.models_folder.join(&job.model_location);
        let folder = if folder.is_absolute() {
            folder
        } else {
            std::env::current_dir()?.join(folder)
        };
        Ok(folder.to_string_lossy().into_owned())
    }

    fn completed_job(&self, key: &TranscriptionKey) -> RegistryResult<TranscriptionJob> {
        let job = self
            .get(key)
            .ok_or_else(|| RegistryError::not_found(RegistryKind::Transcriptions, key.to_string()))?;
        if !self.has_completed(&key.model_location, &key.audio_name) {
            return Err(RegistryError::NotCompleted(key.to_string()));
        }
        Ok(job)
    }

    /// The plain-text transcript of a completed job.
    pub fn text(&self, key: &TranscriptionKey) -> RegistryResult<String> {
        let job = self.completed_job(key)?;
        Ok(fs::read_to_string(self.text_path(&job))?)
    }

    /// Path of the ELAN file of a completed job.
    pub fn annotation_file(&self, key: &TranscriptionKey) -> RegistryResult<PathBuf> {
        let job = self.completed_job(key)?;
        Ok(self.annotation_path(&job))
    }

    /// Zip the outputs of every completed job into a temporary archive.
    pub fn export_all(&self) -> RegistryResult<PathBuf> {
        let folder = self.folder();
        let mut entries = Vec::new();
        for job in self.list() {
            if !self.has_completed(&job.model_location, &job.audio_name) {
                continue;
            }
            for file in list_files(&self.transcription_folder(&job))? {
                let is_output = file
                    .extension()
                    .is_some_and(|e| e == "txt" || e == "eaf");
                if !is_output {
                    continue;
                }
                if let Ok(name) = file.strip_prefix(&folder) {
                    let name = name.to_path_buf();
                    entries.push((file, name));
                }
            }
        }

        let archive_path = archive::temp_archive_path(RegistryKind::Transcriptions.as_str());
        archive::pack_files(&entries, &archive_path)?;
        Ok(archive_path)
    }

    /// Clear every job, their folders and all cached pipelines.
    pub fn reset(&self) -> RegistryResult<()> {
        self.store.reset()?;
        self.pipelines.clear();
        Ok(())
    }
}
