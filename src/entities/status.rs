//! # Job Status State Machines
//!
//! Training and transcription jobs share the same lifecycle shape:
//!
//! ```text
//! Waiting ──begin──▶ Running ──complete──▶ Finished
//!                      │  ▲                    │
//!                    fail │ begin              │ begin (re-run)
//!                      ▼  │                    │
//!                     Error ◀──────────────────┘
//! ```
//!
//! A job enters a registry as `Waiting`. From then on the registries change
//! its status only through the transition functions below, so an illegal
//! move (for example starting a second run while one is in flight) is
//! rejected. That includes jobs found running after a restart: they are
//! moved to `Error` with `fail`.
//!
//! Training jobs have one extra edge, `install`, taken when a packaged model
//! is imported over an idle job: it lands directly in `Finished`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A status change that the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move job from '{from}' via '{transition}'")]
pub struct TransitionError {
    pub from: &'static str,
    pub transition: &'static str,
}

/// Lifecycle of a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    #[default]
    Waiting,
    Training,
    Finished,
    Error,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Waiting => "waiting",
            TrainingStatus::Training => "training",
            TrainingStatus::Finished => "finished",
            TrainingStatus::Error => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TrainingStatus::Training)
    }

    /// Claim the job for a training run.
    ///
    /// Allowed from `Waiting`, `Error` (retry) and `Finished` (re-run).
    pub fn begin(self) -> Result<Self, TransitionError> {
        match self {
            TrainingStatus::Training => Err(self.refuse("begin")),
            _ => Ok(TrainingStatus::Training),
        }
    }

    pub fn complete(self) -> Result<Self, TransitionError> {
        match self {
            TrainingStatus::Training => Ok(TrainingStatus::Finished),
            _ => Err(self.refuse("complete")),
        }
    }

    pub fn fail(self) -> Result<Self, TransitionError> {
        match self {
            TrainingStatus::Training => Ok(TrainingStatus::Error),
            _ => Err(self.refuse("fail")),
        }
    }

    /// Replace the job with an already-trained model. Refused while a
    /// training run is in flight.
    pub fn install(self) -> Result<Self, TransitionError> {
        match self {
            TrainingStatus::Training => Err(self.refuse("install")),
            _ => Ok(TrainingStatus::Finished),
        }
    }

    fn refuse(self, transition: &'static str) -> TransitionError {
        TransitionError { from: self.as_str(), transition }
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    #[default]
    Waiting,
    Transcribing,
    Finished,
    Error,
}

impl TranscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::Waiting => "waiting",
            TranscriptionStatus::Transcribing => "transcribing",
            TranscriptionStatus::Finished => "finished",
            TranscriptionStatus::Error => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TranscriptionStatus::Transcribing)
    }

    /// Claim the job for a transcription run.
    ///
    /// Allowed from `Waiting`, `Error` (retry) and `Finished` (re-run).
    pub fn begin(self) -> Result<Self, TransitionError> {
        match self {
            TranscriptionStatus::Transcribing => Err(self.refuse("begin")),
            _ => Ok(TranscriptionStatus::Transcribing),
        }
    }

    pub fn complete(self) -> Result<Self, TransitionError> {
        match self {
            TranscriptionStatus::Transcribing => Ok(TranscriptionStatus::Finished),
            _ => Err(self.refuse("complete")),
        }
    }

    pub fn fail(self) -> Result<Self, TransitionError> {
        match self {
            TranscriptionStatus::Transcribing => Ok(TranscriptionStatus::Error),
            _ => Err(self.refuse("fail")),
        }
    }

    fn refuse(self, transition: &'static str) -> TransitionError {
        TransitionError { from: self.as_str(), transition }
    }
}

impl fmt::Display for TranscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_happy_path() {
        let status = TrainingStatus::default();
        assert_eq!(status, TrainingStatus::Waiting);

        let status = status.begin().unwrap();
        assert!(status.is_running());
        assert_eq!(status.complete().unwrap(), TrainingStatus::Finished);
    }

    #[test]
    fn test_training_cannot_begin_twice() {
        let running = TrainingStatus::Training;
        let err = running.begin().unwrap_err();
        assert_eq!(err.from, "training");
        assert_eq!(err.transition, "begin");
    }

    #[test]
    fn test_training_retry_and_rerun() {
        assert_eq!(TrainingStatus::Error.begin().unwrap(), TrainingStatus::Training);
        assert_eq!(TrainingStatus::Finished.begin().unwrap(), TrainingStatus::Training);
        assert!(TrainingStatus::Waiting.complete().is_err());
        assert!(TrainingStatus::Finished.fail().is_err());
    }

    #[test]
    fn test_install_only_over_idle_jobs() {
        assert_eq!(TrainingStatus::Waiting.install().unwrap(), TrainingStatus::Finished);
        assert_eq!(TrainingStatus::Error.install().unwrap(), TrainingStatus::Finished);
        assert_eq!(TrainingStatus::Training.install().unwrap_err().transition, "install");
    }

    #[test]
    fn test_transcription_transitions() {
        let status = TranscriptionStatus::Waiting.begin().unwrap();
        assert_eq!(status, TranscriptionStatus::Transcribing);
        assert!(status.begin().is_err());
        assert_eq!(status.fail().unwrap(), TranscriptionStatus::Error);
        assert_eq!(
            TranscriptionStatus::Error.begin().unwrap(),
            TranscriptionStatus::Transcribing
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&TranscriptionStatus::Transcribing).unwrap();
        assert_eq!(json, "\"transcribing\"");

        let status: TrainingStatus = serde_json::from_str("\"finished\"").unwrap();
        assert_eq!(status, TrainingStatus::Finished);
    }
}
