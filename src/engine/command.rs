//! # Command Engine
//!
//! [`Engine`] implementation that drives the ML toolkit through its command
//! line entry points. Each operation spawns one process and blocks until it
//! exits; a non-zero exit status is reported as an error.
//!
//! ## Invocation contract:
//! - preprocess: `<cmd> --output-dir <dir>`, batch as JSON on stdin
//! - train: `<cmd> --output-dir <dir> --dataset-dir <dir>`, job as JSON on
//!   stdin, stdout and stderr appended to the job's log file
//! - transcribe: `<cmd> --model <location> --cache-dir <dir> --audio <file>`,
//!   annotations as a JSON array on stdout

use super::{Annotation, Engine, Pipeline};
use crate::config::EngineConfig;
use crate::entities::{ProcessingBatch, TrainingJob};
use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use tracing::{debug, info};

/// A program plus its fixed leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| anyhow!("engine command cannot be empty"))?;
        Ok(Self { program, args: words.collect() })
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Spawn `command`, feed `input` on stdin and collect its output.
fn run_with_input(mut command: Command, input: &[u8]) -> Result<Output> {
    let mut child = command
        .stdin(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {:?}", command.get_program()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input)?;
    }

    Ok(child.wait_with_output()?)
}

fn check_status(what: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!("{} exited with {}: {}", what, output.status, stderr.trim()))
}

pub struct CommandEngine {
    preprocess: CommandSpec,
    train: CommandSpec,
    transcribe: CommandSpec,
}

impl CommandEngine {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            preprocess: CommandSpec::parse(&config.preprocess_command)?,
            train: CommandSpec::parse(&config.train_command)?,
            transcribe: CommandSpec::parse(&config.transcribe_command)?,
        })
    }
}

impl Engine for CommandEngine {
    fn preprocess(&self, batch: &ProcessingBatch, output_dir: &Path) -> Result<()> {
        debug!(audio = %batch.audio_file.display(), "Preprocessing batch");

        let mut command = self.preprocess.command();
        command
            .arg("--output-dir")
            .arg(output_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = run_with_input(command, &serde_json::to_vec(batch)?)?;
        check_status("preprocessing", &output)
    }

    fn train(&self, job: &TrainingJob, output_dir: &Path, dataset_dir: &Path, log_file: &Path) -> Result<()> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("failed to open log file {}", log_file.display()))?;

        let mut command = self.train.command();
        command
            .arg("--output-dir")
            .arg(output_dir)
            .arg("--dataset-dir")
            .arg(dataset_dir)
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));

        info!(model = %job.model_name, "Spawning training process");
        let output = run_with_input(command, &serde_json::to_vec(job)?)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "training exited with {}; see {}",
                output.status,
                log_file.display()
            ))
        }
    }

    fn build_pipeline(&self, model_location: &str, cache_dir: &Path) -> Result<Arc<dyn Pipeline>> {
        let location = Path::new(model_location);
        if location.is_absolute() && !location.exists() {
            return Err(anyhow!("model folder {} does not exist", location.display()));
        }

        std::fs::create_dir_all(cache_dir)?;
        Ok(Arc::new(CommandPipeline {
            spec: self.transcribe.clone(),
            model_location: model_location.to_string(),
            cache_dir: cache_dir.to_path_buf(),
        }))
    }
}

/// Pipeline handle for a command-line recognizer: the resolved model and
/// cache folder the command is invoked with.
pub struct CommandPipeline {
    spec: CommandSpec,
    model_location: String,
    cache_dir: PathBuf,
}

impl Pipeline for CommandPipeline {
    fn run_inference(&self, audio_file: &Path) -> Result<Vec<Annotation>> {
        let output = self
            .spec
            .command()
            .arg("--model")
            .arg(&self.model_location)
            .arg("--cache-dir")
            .arg(&self.cache_dir)
            .arg("--audio")
            .arg(audio_file)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn {}", self.spec.program))?;

        check_status("transcription", &output)?;
        serde_json::from_slice(&output.stdout).context("transcriber produced invalid annotations")
    }
}
