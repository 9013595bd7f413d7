//! # Transcription Job
//!
//! Jobs are addressed by the pair (model location, audio name). The pair is
//! kept as a struct key rather than a joined string so `("ab", "c")` and
//! `("a", "bc")` stay distinct.

use super::status::TranscriptionStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TranscriptionKey {
    /// A local training-job name, or an external model identifier.
    pub model_location: String,
    pub audio_name: String,
}

impl TranscriptionKey {
    pub fn new(model_location: impl Into<String>, audio_name: impl Into<String>) -> Self {
        Self {
            model_location: model_location.into(),
            audio_name: audio_name.into(),
        }
    }
}

impl fmt::Display for TranscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.model_location, self.audio_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub model_location: String,
    pub audio_name: String,
    #[serde(default = "default_is_local")]
    pub is_local: bool,
    #[serde(default)]
    pub status: TranscriptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn default_is_local() -> bool {
    true
}

impl TranscriptionJob {
    pub fn new(model_location: impl Into<String>, audio_name: impl Into<String>, is_local: bool) -> Self {
        Self {
            model_location: model_location.into(),
            audio_name: audio_name.into(),
            is_local,
            status: TranscriptionStatus::Waiting,
            last_error: None,
        }
    }

    pub fn key(&self) -> TranscriptionKey {
        TranscriptionKey::new(&self.model_location, &self.audio_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_do_not_collide_on_concatenation() {
        let a = TranscriptionKey::new("ab", "c");
        let b = TranscriptionKey::new("a", "bc");
        assert_ne!(a, b);

        let keys: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_job_defaults_when_deserializing() {
        let job: TranscriptionJob =
            serde_json::from_str(r#"{"model_location": "m1", "audio_name": "a1"}"#).unwrap();
        assert!(job.is_local);
        assert_eq!(job.status, TranscriptionStatus::Waiting);
        assert_eq!(job.key(), TranscriptionKey::new("m1", "a1"));
    }
}
