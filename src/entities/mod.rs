//! # Entities
//!
//! Plain data types tracked by the registries: datasets, training jobs and
//! transcription jobs, plus the status state machines they share.

pub mod dataset;
pub mod status;
pub mod training;
pub mod transcription;

pub use dataset::{CleaningOptions, Dataset, ElanOptions, FileKind, ProcessingBatch};
pub use status::{TrainingStatus, TranscriptionStatus};
pub use training::TrainingJob;
pub use transcription::{TranscriptionJob, TranscriptionKey};
