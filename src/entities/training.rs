//! # Training Job
//!
//! A named request to fine-tune a base model on a dataset. The job's output
//! folder is derived from its name by the training registry, so it is not
//! stored on the job itself.

use super::status::TrainingStatus;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_MODEL: &str = "facebook/wav2vec2-base-960h";
pub const DEFAULT_SAMPLING_RATE: u32 = 16_000;

/// Hyper-parameters forwarded to the training engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    pub batch_size: u32,
    pub epochs: u32,
    pub learning_rate: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub word_delimiter_token: String,
    pub test_size: f64,
    pub freeze_feature_extractor: bool,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            batch_size: 4,
            epochs: 2,
            learning_rate: 1e-4,
            min_duration: 0.0,
            max_duration: 60.0,
            word_delimiter_token: " ".to_string(),
            test_size: 0.2,
            freeze_feature_extractor: true,
        }
    }
}

impl TrainingOptions {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be greater than 0"));
        }
        if self.epochs == 0 {
            return Err(anyhow!("epochs must be greater than 0"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(anyhow!("learning_rate must be greater than 0"));
        }
        if self.min_duration < 0.0 || self.max_duration < self.min_duration {
            return Err(anyhow!("duration bounds must satisfy 0 <= min_duration <= max_duration"));
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(anyhow!("test_size must be between 0 and 1"));
        }
        if self.word_delimiter_token.is_empty() {
            return Err(anyhow!("word_delimiter_token cannot be empty"));
        }
        Ok(())
    }
}

fn default_base_model() -> String {
    DEFAULT_BASE_MODEL.to_string()
}

fn default_sampling_rate() -> u32 {
    DEFAULT_SAMPLING_RATE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub model_name: String,
    /// Name of a registered dataset, or a path to an already processed one.
    pub dataset_name: String,
    #[serde(default)]
    pub options: TrainingOptions,
    #[serde(default = "default_base_model")]
    pub base_model: String,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
    #[serde(default)]
    pub status: TrainingStatus,
    /// Cause of the most recent failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TrainingJob {
    pub fn new(model_name: impl Into<String>, dataset_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            dataset_name: dataset_name.into(),
            options: TrainingOptions::default(),
            base_model: default_base_model(),
            sampling_rate: default_sampling_rate(),
            status: TrainingStatus::Waiting,
            last_error: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(anyhow!("model_name is required"));
        }
        if self.dataset_name.trim().is_empty() {
            return Err(anyhow!("dataset_name is required"));
        }
        if self.sampling_rate == 0 {
            return Err(anyhow!("sampling_rate must be greater than 0"));
        }
        self.options.validate()
    }
}
