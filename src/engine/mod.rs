//! # ML Engine Boundary
//!
//! Corpus preprocessing, model training and speech recognition are performed
//! by an external engine. The registries only see the narrow surface below:
//!
//! - [`Engine::preprocess`]: clean one dataset batch into an output folder
//! - [`Engine::has_finished_processing`]: whether a processed folder is complete
//! - [`Engine::train`]: blocking training run, failure reported as `Err`
//! - [`Engine::build_pipeline`]: load an inference pipeline for a model
//! - [`Pipeline::run_inference`]: transcribe one audio file into annotations
//!
//! Rendering annotations to plain text and ELAN files lives in
//! [`annotations`] since it needs no engine.

pub mod annotations;
pub mod command;

pub use annotations::{render_elan, render_text, Annotation};
pub use command::CommandEngine;

use crate::entities::{FileKind, ProcessingBatch, TrainingJob};
use anyhow::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded, reusable speech recognition pipeline bound to one model.
pub trait Pipeline: Send + Sync {
    fn run_inference(&self, audio_file: &Path) -> Result<Vec<Annotation>>;
}

pub trait Engine: Send + Sync {
    fn preprocess(&self, batch: &ProcessingBatch, output_dir: &Path) -> Result<()>;

    /// A processed folder is complete when every raw transcription file has a
    /// `{stem}.json` counterpart in it.
    fn has_finished_processing(&self, raw_files: &[PathBuf], processed_files: &[PathBuf]) -> bool {
        let processed: HashSet<String> = processed_files
            .iter()
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();

        let mut expected = raw_files
            .iter()
            .filter(|p| FileKind::of(p) == FileKind::Transcription)
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()))
            .peekable();

        expected.peek().is_some() && expected.all(|stem| processed.contains(stem))
    }

    fn train(&self, job: &TrainingJob, output_dir: &Path, dataset_dir: &Path, log_file: &Path) -> Result<()>;

    fn build_pipeline(&self, model_location: &str, cache_dir: &Path) -> Result<Arc<dyn Pipeline>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubEngine;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_has_finished_processing() {
        let engine = StubEngine::new();
        let raw = paths(&["raw/a.wav", "raw/a.eaf", "raw/b.wav", "raw/b.txt"]);

        assert!(!engine.has_finished_processing(&raw, &paths(&["out/a.json", "out/a.wav"])));
        assert!(engine.has_finished_processing(&raw, &paths(&["out/a.json", "out/b.json"])));
    }

    #[test]
    fn test_nothing_to_process_is_not_finished() {
        let engine = StubEngine::new();
        assert!(!engine.has_finished_processing(&paths(&["raw/a.wav"]), &paths(&["out/a.json"])));
    }
}
