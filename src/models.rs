//! Data models shared by the fetch pipeline and the shard/condense stages.
//!
//! This module defines the core data structures used throughout the crate:
//! - [`Source`]: the supported fragrance sites
//! - [`FetchTask`] / [`FetchOutcome`]: one URL's journey through the fetch engine
//! - [`FragranceRecord`]: the extracted domain record, with its [`Note`]s
//! - [`Shard`]: the on-disk envelope for a batch of records
//!
//! Records use `BTreeSet`/`BTreeMap` for their set- and map-valued fields so
//! that serialization order is stable and shard files diff cleanly.

use crate::utils::normalize_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Current shard file schema. Bump when [`Shard`] or [`FragranceRecord`]
/// change shape incompatibly.
pub const SHARD_SCHEMA_VERSION: u32 = 1;

/// A fragrance site the pipeline knows how to list and extract.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Fragrantica,
    Basenotes,
    Parfumo,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Fragrantica, Source::Basenotes, Source::Parfumo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Fragrantica => "fragrantica",
            Source::Basenotes => "basenotes",
            Source::Parfumo => "parfumo",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fragrantica" => Ok(Source::Fragrantica),
            "basenotes" => Ok(Source::Basenotes),
            "parfumo" => Ok(Source::Parfumo),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// One URL to fetch, owned by the coordinator and mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub url: String,
    pub source: Source,
    /// Attempts made so far, including the one in progress.
    pub attempts: u32,
    /// Proxy assigned to the most recent attempt, if any.
    pub proxy: Option<String>,
}

impl FetchTask {
    pub fn new(source: Source, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source,
            attempts: 0,
            proxy: None,
        }
    }
}

/// Result of one fetch attempt.
///
/// [`crate::net::FetchEngine::fetch`] folds attempts together and only hands
/// `Success` or `PermanentFailure` back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success { payload: String, status: u16 },
    RateLimited { retry_after: Duration },
    TransientFailure { cause: String },
    PermanentFailure { cause: String },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

/// Position of a note in the scent pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteCategory {
    Top,
    Heart,
    Base,
}

impl NoteCategory {
    pub const ALL: [NoteCategory; 3] = [NoteCategory::Top, NoteCategory::Heart, NoteCategory::Base];

    pub fn as_str(&self) -> &'static str {
        match self {
            NoteCategory::Top => "top",
            NoteCategory::Heart => "heart",
            NoteCategory::Base => "base",
        }
    }
}

/// A single scent note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub name: String,
    pub category: NoteCategory,
    #[serde(default)]
    pub intensity: Option<f64>,
}

impl Note {
    pub fn new(name: impl Into<String>, category: NoteCategory) -> Self {
        Self {
            name: name.into(),
            category,
            intensity: None,
        }
    }

    /// Notes are deduplicated on category plus case-folded name.
    pub fn merge_key(&self) -> (NoteCategory, String) {
        (self.category, normalize_key(&self.name))
    }
}

/// Deduplication key for fragrance records: normalized (brand, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub brand: String,
    pub name: String,
}

/// A fragrance as extracted from one or more source pages.
///
/// Optional scalars are `None` when the page didn't carry them; set and map
/// fields are simply empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FragranceRecord {
    pub name: String,
    pub brand: String,
    #[serde(default)]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub longevity: Option<f64>,
    #[serde(default)]
    pub sillage: Option<f64>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub seasons: BTreeSet<String>,
    #[serde(default)]
    pub occasions: BTreeSet<String>,
    #[serde(default)]
    pub ratings: BTreeMap<String, f64>,
    #[serde(default)]
    pub accords: BTreeMap<String, f64>,
    #[serde(default)]
    pub weather_suitability: BTreeMap<String, f64>,
    #[serde(default)]
    pub source_urls: BTreeSet<String>,
}

impl FragranceRecord {
    pub fn new(brand: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            brand: normalize_key(&self.brand),
            name: normalize_key(&self.name),
        }
    }

    /// Notes belonging to one pyramid level, in stored order.
    pub fn notes_in(&self, category: NoteCategory) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(move |n| n.category == category)
    }
}

/// On-disk envelope of one closed shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    pub schema_version: u32,
    pub run_timestamp: DateTime<Utc>,
    pub source: Source,
    pub records: Vec<FragranceRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_is_case_and_space_insensitive() {
        let a = FragranceRecord::new("Dior", "Sauvage");
        let b = FragranceRecord::new("  DIOR ", "sauvage");
        assert_eq!(a.identity_key(), b.identity_key());

        let c = FragranceRecord::new("Christian  Dior", "Fahrenheit");
        let d = FragranceRecord::new("christian dior", "FAHRENHEIT");
        assert_eq!(c.identity_key(), d.identity_key());
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!("Fragrantica".parse::<Source>(), Ok(Source::Fragrantica));
        assert_eq!(" basenotes ".parse::<Source>(), Ok(Source::Basenotes));
        assert!("sephora".parse::<Source>().is_err());
        assert_eq!(Source::Parfumo.to_string(), "parfumo");
    }

    #[test]
    fn test_record_deserializes_with_missing_optional_sections() {
        let json = r#"{"name": "Aventus", "brand": "Creed"}"#;
        let record: FragranceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.name, "Aventus");
        assert!(record.release_year.is_none());
        assert!(record.notes.is_empty());
        assert!(record.ratings.is_empty());
        assert!(record.source_urls.is_empty());
    }

    #[test]
    fn test_note_category_serialization() {
        let note = Note {
            name: "Bergamot".into(),
            category: NoteCategory::Top,
            intensity: Some(0.8),
        };
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains(r#""category":"top""#));
    }

    #[test]
    fn test_notes_in_filters_by_category() {
        let mut record = FragranceRecord::new("Dior", "Sauvage");
        record.notes = vec![
            Note::new("Bergamot", NoteCategory::Top),
            Note::new("Ambroxan", NoteCategory::Base),
            Note::new("Pepper", NoteCategory::Top),
        ];
        let top: Vec<_> = record.notes_in(NoteCategory::Top).map(|n| n.name.as_str()).collect();
        assert_eq!(top, vec!["Bergamot", "Pepper"]);
    }

    #[test]
    fn test_fetch_task_starts_fresh() {
        let task = FetchTask::new(Source::Basenotes, "https://basenotes.com/x");
        assert_eq!(task.attempts, 0);
        assert!(task.proxy.is_none());
    }
}
