//! In-memory engine used by the registry and handler tests.

use crate::engine::{Annotation, Engine, Pipeline};
use crate::entities::{ProcessingBatch, TrainingJob};
use anyhow::{anyhow, Result};
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Blocks engine work while closed. Starts open.
pub struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            open: Mutex::new(true),
            signal: Condvar::new(),
        }
    }
}

impl Gate {
    pub fn close(&self) {
        *self.open.lock() = false;
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.signal.notify_all();
    }

    fn pass(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.signal.wait(&mut open);
        }
    }
}

/// Spin until `counter` reaches `count`.
fn wait_for(counter: &AtomicUsize, count: usize, what: &str) {
    for _ in 0..500 {
        if counter.load(Ordering::SeqCst) >= count {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("{what} was never started");
}

#[derive(Default)]
pub struct StubEngine {
    pub preprocess_calls: AtomicUsize,
    pub train_calls: AtomicUsize,
    pub build_calls: AtomicUsize,
    inference_calls: Arc<AtomicUsize>,
    fail_preprocess: AtomicBool,
    fail_training: AtomicBool,
    fail_inference: AtomicBool,
    training_gate: Gate,
    inference_gate: Arc<Gate>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_preprocess(self) -> Self {
        self.fail_preprocess.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_training(self) -> Self {
        self.fail_training.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_inference(self) -> Self {
        self.fail_inference.store(true, Ordering::SeqCst);
        self
    }

    pub fn hold_training(&self) {
        self.training_gate.close();
    }

    pub fn release_training(&self) {
        self.training_gate.open();
    }

    pub fn hold_inference(&self) {
        self.inference_gate.close();
    }

    pub fn release_inference(&self) {
        self.inference_gate.open();
    }

    pub fn train_calls(&self) -> usize {
        self.train_calls.load(Ordering::SeqCst)
    }

    pub fn inference_calls(&self) -> usize {
        self.inference_calls.load(Ordering::SeqCst)
    }

    pub fn wait_for_train_calls(&self, count: usize) {
        wait_for(&self.train_calls, count, "training");
    }

    pub fn wait_for_inference_calls(&self, count: usize) {
        wait_for(&self.inference_calls, count, "inference");
    }
}

impl Engine for StubEngine {
    /// Copies the pair into `output_dir` and writes a `{stem}.json` manifest.
    fn preprocess(&self, batch: &ProcessingBatch, output_dir: &Path) -> Result<()> {
        self.preprocess_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_preprocess.load(Ordering::SeqCst) {
            return Err(anyhow!("stub preprocessing failure"));
        }

        for file in [&batch.audio_file, &batch.transcription_file] {
            let name = file.file_name().ok_or_else(|| anyhow!("batch file has no name"))?;
            fs::copy(file, output_dir.join(name))?;
        }
        let stem = batch
            .transcription_file
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("batch file has no stem"))?;
        fs::write(output_dir.join(format!("{stem}.json")), serde_json::to_vec(batch)?)?;
        Ok(())
    }

    fn train(&self, job: &TrainingJob, output_dir: &Path, dataset_dir: &Path, log_file: &Path) -> Result<()> {
        self.train_calls.fetch_add(1, Ordering::SeqCst);
        fs::write(
            log_file,
            format!("training {} on {}\n", job.model_name, dataset_dir.display()),
        )?;

        self.training_gate.pass();

        if self.fail_training.load(Ordering::SeqCst) {
            return Err(anyhow!("stub training failure"));
        }
        fs::write(output_dir.join("model.bin"), b"weights")?;
        Ok(())
    }

    fn build_pipeline(&self, _model_location: &str, _cache_dir: &Path) -> Result<Arc<dyn Pipeline>> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubPipeline {
            fail: self.fail_inference.load(Ordering::SeqCst),
            calls: self.inference_calls.clone(),
            gate: self.inference_gate.clone(),
        }))
    }
}

#[derive(Default)]
pub struct StubPipeline {
    fail: bool,
    calls: Arc<AtomicUsize>,
    gate: Arc<Gate>,
}

impl Pipeline for StubPipeline {
    fn run_inference(&self, audio_file: &Path) -> Result<Vec<Annotation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass();

        if self.fail {
            return Err(anyhow!("stub inference failure"));
        }
        if !audio_file.exists() {
            return Err(anyhow!("audio file {} is missing", audio_file.display()));
        }
        Ok(vec![
            Annotation::new("hello", 0, 800),
            Annotation::new("world", 800, 1600),
        ])
    }
}

/// Write small placeholder files named `names` into `dir`.
pub fn write_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, format!("contents of {name}")).unwrap();
            path
        })
        .collect()
}
