//! Annotation output formats: a plain-text transcript and an ELAN (`.eaf`)
//! document with one time-aligned tier.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

pub const ELAN_TIER_ID: &str = "default";

/// One recognised utterance. Times are in milliseconds from the start of
/// the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub transcript: String,
    #[serde(default)]
    pub start_ms: Option<u64>,
    #[serde(default)]
    pub stop_ms: Option<u64>,
}

#[cfg(test)]
impl Annotation {
    pub fn new(transcript: impl Into<String>, start_ms: u64, stop_ms: u64) -> Self {
        Self {
            transcript: transcript.into(),
            start_ms: Some(start_ms),
            stop_ms: Some(stop_ms),
        }
    }
}

pub fn render_text(annotations: &[Annotation]) -> String {
    annotations
        .iter()
        .map(|a| a.transcript.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render an ELAN 3.0 document for `media_file`.
///
/// Annotations missing a start reuse the previous stop time; missing stops
/// collapse to the start.
pub fn render_elan(annotations: &[Annotation], media_file: &str) -> String {
    let media = escape_xml(media_file);
    let mut time_slots = String::new();
    let mut tier = String::new();
    let mut cursor = 0u64;

    for (index, annotation) in annotations.iter().enumerate() {
        let start = annotation.start_ms.unwrap_or(cursor);
        let stop = annotation.stop_ms.unwrap_or(start).max(start);
        cursor = stop;

        let (slot_start, slot_stop) = (index * 2 + 1, index * 2 + 2);
        // Writing into a String cannot fail.
        let _ = writeln!(
            time_slots,
            "        <TIME_SLOT TIME_SLOT_ID=\"ts{slot_start}\" TIME_VALUE=\"{start}\"/>\n        <TIME_SLOT TIME_SLOT_ID=\"ts{slot_stop}\" TIME_VALUE=\"{stop}\"/>"
        );
        let _ = writeln!(
            tier,
            "        <ANNOTATION>\n            <ALIGNABLE_ANNOTATION ANNOTATION_ID=\"a{id}\" TIME_SLOT_REF1=\"ts{slot_start}\" TIME_SLOT_REF2=\"ts{slot_stop}\">\n                <ANNOTATION_VALUE>{value}</ANNOTATION_VALUE>\n            </ALIGNABLE_ANNOTATION>\n        </ANNOTATION>",
            id = index + 1,
            value = escape_xml(annotation.transcript.trim()),
        );
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ANNOTATION_DOCUMENT AUTHOR="speech-workbench" DATE="{date}" FORMAT="3.0" VERSION="3.0" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="http://www.mpi.nl/tools/elan/EAFv3.0.xsd">
    <HEADER MEDIA_FILE="" TIME_UNITS="milliseconds">
        <MEDIA_DESCRIPTOR MEDIA_URL="file:///{media}" MIME_TYPE="audio/x-wav" RELATIVE_MEDIA_URL="./{media}"/>
    </HEADER>
    <TIME_ORDER>
{time_slots}    </TIME_ORDER>
    <TIER LINGUISTIC_TYPE_REF="default-lt" TIER_ID="{tier_id}">
{tier}    </TIER>
    <LINGUISTIC_TYPE GRAPHIC_REFERENCES="false" LINGUISTIC_TYPE_ID="default-lt" TIME_ALIGNABLE="true"/>
</ANNOTATION_DOCUMENT>
"#,
        date = chrono::Utc::now().to_rfc3339(),
        tier_id = ELAN_TIER_ID,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_text_joins_transcripts() {
        let annotations = vec![
            Annotation::new(" hello ", 0, 500),
            Annotation::new("", 500, 600),
            Annotation::new("world", 600, 1200),
        ];
        assert_eq!(render_text(&annotations), "hello world");
        assert_eq!(render_text(&[]), "");
    }

    #[test]
    fn test_render_elan_slots_and_values() {
        let annotations = vec![
            Annotation::new("fish & chips", 0, 1500),
            Annotation { transcript: "<done>".into(), start_ms: None, stop_ms: None },
        ];
        let eaf = render_elan(&annotations, "a1.wav");

        assert!(eaf.contains(r#"TIME_SLOT_ID="ts2" TIME_VALUE="1500""#));
        assert!(eaf.contains(r#"TIME_SLOT_ID="ts3" TIME_VALUE="1500""#));
        assert!(eaf.contains("<ANNOTATION_VALUE>fish &amp; chips</ANNOTATION_VALUE>"));
        assert!(eaf.contains("<ANNOTATION_VALUE>&lt;done&gt;</ANNOTATION_VALUE>"));
        assert!(eaf.contains(r#"RELATIVE_MEDIA_URL="./a1.wav""#));
        assert!(eaf.contains(r#"TIER_ID="default""#));
    }
}
