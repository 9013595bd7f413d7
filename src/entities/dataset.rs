//! # Dataset
//!
//! A dataset is a named set of audio recordings paired with their
//! transcription files. Pairing is by file stem: `story.wav` belongs with
//! `story.eaf` (or `story.txt`). Each matched pair becomes one
//! [`ProcessingBatch`] handed to the preprocessing engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Extensions recognised as audio.
pub const AUDIO_EXTENSIONS: &[&str] = &["wav"];

/// Extensions recognised as transcriptions.
pub const TRANSCRIPTION_EXTENSIONS: &[&str] = &["eaf", "txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Audio,
    Transcription,
    Unsupported,
}

impl FileKind {
    pub fn of(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            FileKind::Audio
        } else if TRANSCRIPTION_EXTENSIONS.contains(&ext.as_str()) {
            FileKind::Transcription
        } else {
            FileKind::Unsupported
        }
    }
}

/// Text cleaning applied to transcriptions during preprocessing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningOptions {
    pub punctuation_to_remove: String,
    pub punctuation_to_explode: String,
    pub words_to_remove: Vec<String>,
}

/// How an ELAN tier is picked from `.eaf` files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElanTierSelector {
    #[serde(rename = "tier_order")]
    Order,
    #[serde(rename = "tier_name")]
    Name,
    #[serde(rename = "tier_type")]
    Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElanOptions {
    pub selection_mechanism: ElanTierSelector,
    pub selection_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub cleaning_options: CleaningOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elan_options: Option<ElanOptions>,
}

/// One unit of preprocessing work: a transcription and its recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingBatch {
    pub transcription_file: PathBuf,
    pub audio_file: PathBuf,
    pub cleaning_options: CleaningOptions,
    pub elan_options: Option<ElanOptions>,
}

#[derive(Default)]
struct Pair<'a> {
    audio: Option<&'a PathBuf>,
    transcription: Option<&'a PathBuf>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            files,
            cleaning_options: CleaningOptions::default(),
            elan_options: None,
        }
    }

    fn pairs(&self) -> BTreeMap<String, Pair<'_>> {
        let mut pairs: BTreeMap<String, Pair<'_>> = BTreeMap::new();
        for file in &self.files {
            let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let pair = pairs.entry(stem.to_string()).or_default();
            match FileKind::of(file) {
                FileKind::Audio => pair.audio = Some(file),
                FileKind::Transcription => pair.transcription = Some(file),
                FileKind::Unsupported => {}
            }
        }
        pairs
    }

    /// Files that have no partner (audio without transcription or the
    /// reverse) or that are not a supported format.
    pub fn mismatched_files(&self) -> Vec<PathBuf> {
        let mut mismatched: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|f| FileKind::of(f) == FileKind::Unsupported)
            .cloned()
            .collect();

        for pair in self.pairs().values() {
            match (pair.audio, pair.transcription) {
                (Some(audio), None) => mismatched.push(audio.clone()),
                (None, Some(transcription)) => mismatched.push(transcription.clone()),
                _ => {}
            }
        }
        mismatched
    }

    pub fn is_valid(&self) -> bool {
        !self.files.is_empty() && self.mismatched_files().is_empty()
    }

    /// Split the dataset into processing batches, one per matched pair.
    /// Unpaired files are skipped.
    pub fn to_batches(&self) -> Vec<ProcessingBatch> {
        self.pairs()
            .into_values()
            .filter_map(|pair| match (pair.audio, pair.transcription) {
                (Some(audio), Some(transcription)) => Some(ProcessingBatch {
                    transcription_file: transcription.clone(),
                    audio_file: audio.clone(),
                    cleaning_options: self.cleaning_options.clone(),
                    elan_options: self.elan_options.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}
