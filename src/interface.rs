//! # Interface
//!
//! Composition root for the registries. One `Interface` is built at startup
//! and shared with every handler through [`AppState`](crate::state::AppState).
//!
//! Registries never call each other. Lookups that span two of them, such as
//! finding the processed folder of the dataset a model trains on, happen here.

use crate::config::AppConfig;
use crate::engine::{CommandEngine, Engine};
use crate::entities::TrainingStatus;
use crate::registry::{DatasetRegistry, FolderKind, RegistryResult, TrainingRegistry, TranscriptionRegistry};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct Interface {
    pub datasets: DatasetRegistry,
    pub models: TrainingRegistry,
    pub transcriptions: TranscriptionRegistry,
}

impl Interface {
    /// Open every registry under the configured data directory, driving the
    /// engine commands from the config.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let engine = Arc::new(CommandEngine::from_config(&config.engine)?);
        let interface = Self::with_engine(
            &config.data_dir(),
            config.storage.reset_on_start,
            config.cache_dir(),
            config.engine.max_cached_pipelines,
            engine,
        )?;

        info!(
            data_dir = %config.storage.data_dir,
            datasets = interface.datasets.len(),
            models = interface.models.len(),
            transcriptions = interface.transcriptions.len(),
            "Registries opened"
        );
        Ok(interface)
    }

    pub fn with_engine(
        data_dir: &Path,
        reset: bool,
        cache_dir: PathBuf,
        max_pipelines: usize,
        engine: Arc<dyn Engine>,
    ) -> RegistryResult<Self> {
        let datasets = DatasetRegistry::open(data_dir, reset, engine.clone())?;
        let models = TrainingRegistry::open(data_dir, reset, engine.clone())?;
        let transcriptions = TranscriptionRegistry::open(
            data_dir,
            reset,
            engine,
            models.folder(),
            cache_dir,
            max_pipelines,
        )?;

        Ok(Self { datasets, models, transcriptions })
    }

    /// Folder a training job reads from: the processed folder of a registered
    /// dataset, or the reference itself taken as a path.
    pub fn dataset_dir(&self, dataset: &str) -> PathBuf {
        if self.datasets.contains(dataset) {
            self.datasets.dataset_folder(dataset, FolderKind::Processed)
        } else {
            PathBuf::from(dataset)
        }
    }

    /// Train a registered model on its dataset. `None` for unknown models.
    pub fn train_model(&self, name: &str) -> RegistryResult<Option<TrainingStatus>> {
        let Some(job) = self.models.get(name) else {
            return Ok(None);
        };
        let dataset_dir = self.dataset_dir(&job.dataset_name);
        self.models.train(name, &dataset_dir)
    }

    /// Empty all three registries along with their folders.
    pub fn reset(&self) -> RegistryResult<()> {
        self.datasets.reset()?;
        self.models.reset()?;
        self.transcriptions.reset()?;
        info!("All registries reset");
        Ok(())
    }
}
