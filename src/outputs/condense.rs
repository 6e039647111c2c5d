//! Merge shard files into the final deduplicated dataset.
//!
//! Condensing is a pure function of the shard files it is given: the same set
//! of shards, in any order and with any duplicates, produces the same
//! [`AggregateDataset`]. File names play no part: shards are visited by
//! `run_timestamp`, then source, then contents, and a shard whose contents
//! match one already visited is skipped. Records are grouped by
//! [`IdentityKey`]. Within a group the earliest value of every scalar wins
//! and later records only fill gaps; sets are unioned and map entries are
//! added only for missing keys.

use super::shards::read_shard;
use crate::models::{FragranceRecord, IdentityKey};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{info, instrument, warn};

pub const DATA_VERSION: &str = "1.0";

/// One row per fragrance, sorted by brand then name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDataset {
    /// Latest `run_timestamp` among the merged shards.
    pub scrape_date: Option<DateTime<Utc>>,
    pub data_version: String,
    pub records: Vec<FragranceRecord>,
}

impl Default for AggregateDataset {
    fn default() -> Self {
        Self {
            scrape_date: None,
            data_version: DATA_VERSION.to_string(),
            records: Vec::new(),
        }
    }
}

impl AggregateDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn unique_brands(&self) -> usize {
        self.records.iter().map(|r| r.identity_key().brand).unique().count()
    }

    pub fn year_range(&self) -> Option<(i32, i32)> {
        match self.records.iter().filter_map(|r| r.release_year).minmax() {
            itertools::MinMaxResult::NoElements => None,
            itertools::MinMaxResult::OneElement(y) => Some((y, y)),
            itertools::MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
        }
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.records.iter().any(|r| r.source_urls.contains(url))
    }
}

/// Read every shard in `paths` and merge their records.
///
/// Unreadable or incompatible shards are skipped with a warning.
#[instrument(level = "info", skip_all, fields(shards = paths.len()))]
pub async fn condense(paths: &[PathBuf]) -> AggregateDataset {
    let mut loaded = Vec::new();
    let mut skipped = 0usize;
    for path in paths.iter().unique() {
        let shard = match read_shard(path).await {
            Ok(shard) => shard,
            Err(e) => {
                skipped += 1;
                warn!(path = %path.display(), error = %e, "Skipping unreadable shard");
                continue;
            }
        };
        // BTree-backed fields keep this encoding canonical.
        match serde_json::to_string(&shard.records) {
            Ok(contents) => loaded.push((shard.run_timestamp, shard.source, contents, shard)),
            Err(e) => {
                skipped += 1;
                warn!(path = %path.display(), error = %e, "Skipping unencodable shard");
            }
        }
    }
    loaded.sort_by(|a, b| (a.0, a.1, &a.2).cmp(&(b.0, b.1, &b.2)));

    let before = loaded.len();
    loaded.dedup_by(|a, b| (a.0, a.1, &a.2) == (b.0, b.1, &b.2));
    let duplicates = before - loaded.len();

    let mut merger = Merger::default();
    for (_, _, _, shard) in loaded {
        merger.latest = merger.latest.max(Some(shard.run_timestamp));
        for record in shard.records {
            merger.add(record);
        }
    }

    let dataset = merger.finish();
    info!(records = dataset.len(), skipped, duplicates, "Condensed shards");
    dataset
}

#[derive(Default)]
struct Merger {
    rows: BTreeMap<IdentityKey, FragranceRecord>,
    latest: Option<DateTime<Utc>>,
}

impl Merger {
    fn add(&mut self, record: FragranceRecord) {
        let key = record.identity_key();
        if key.brand.is_empty() || key.name.is_empty() {
            warn!(url = ?record.source_urls.iter().next(), "Dropping record without identity");
            return;
        }
        let row = self
            .rows
            .entry(key)
            .or_insert_with(|| FragranceRecord::new(record.brand.trim(), record.name.trim()));
        merge_into(row, record);
    }

    fn finish(self) -> AggregateDataset {
        AggregateDataset {
            scrape_date: self.latest,
            data_version: DATA_VERSION.to_string(),
            records: self.rows.into_values().collect(),
        }
    }
}

/// Fold `other` into `row`: existing values stay, gaps are filled.
pub fn merge_into(row: &mut FragranceRecord, other: FragranceRecord) {
    row.release_year = row.release_year.or(other.release_year);
    row.longevity = row.longevity.or(other.longevity);
    row.sillage = row.sillage.or(other.sillage);

    let mut seen: HashMap<_, usize> = row
        .notes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.merge_key(), i))
        .collect();
    for note in other.notes {
        match seen.get(&note.merge_key()) {
            Some(&i) => {
                let existing = &mut row.notes[i];
                existing.intensity = existing.intensity.or(note.intensity);
            }
            None => {
                seen.insert(note.merge_key(), row.notes.len());
                row.notes.push(note);
            }
        }
    }

    row.seasons.extend(other.seasons);
    row.occasions.extend(other.occasions);
    row.source_urls.extend(other.source_urls);
    fill_missing(&mut row.ratings, other.ratings);
    fill_missing(&mut row.accords, other.accords);
    fill_missing(&mut row.weather_suitability, other.weather_suitability);
}

fn fill_missing(into: &mut BTreeMap<String, f64>, from: BTreeMap<String, f64>) {
    for (k, v) in from {
        into.entry(k).or_insert(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Note, NoteCategory, SHARD_SCHEMA_VERSION, Shard, Source};
    use chrono::TimeZone;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, source: Source, ts: i64, records: Vec<FragranceRecord>) -> PathBuf {
        let shard = Shard {
            schema_version: SHARD_SCHEMA_VERSION,
            run_timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            source,
            records,
        };
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec(&shard).unwrap()).unwrap();
        path
    }

    fn sauvage(url: &str, notes: &[(&str, NoteCategory)]) -> FragranceRecord {
        let mut r = FragranceRecord::new("Dior", "Sauvage");
        r.notes = notes.iter().map(|(n, c)| Note::new(*n, *c)).collect();
        r.source_urls.insert(url.to_string());
        r
    }

    #[tokio::test]
    async fn test_same_fragrance_from_two_sources_is_one_row() {
        let tmp = TempDir::new().unwrap();
        let a = write(
            tmp.path(),
            "00000000000000000001-fragrantica.json",
            Source::Fragrantica,
            100,
            vec![sauvage("https://f/sauvage", &[("Bergamot", NoteCategory::Top), ("Ambroxan", NoteCategory::Base)])],
        );
        let mut other = sauvage("https://b/sauvage", &[("bergamot", NoteCategory::Top), ("Lavender", NoteCategory::Heart)]);
        other.brand = "DIOR".into();
        other.release_year = Some(2015);
        let b = write(tmp.path(), "00000000000000000002-basenotes.json", Source::Basenotes, 200, vec![other]);

        let dataset = condense(&[a, b]).await;
        assert_eq!(dataset.len(), 1);
        let row = &dataset.records[0];
        assert_eq!(row.brand, "Dior");
        assert_eq!(row.release_year, Some(2015));
        let notes: Vec<_> = row.notes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(notes, vec!["Bergamot", "Ambroxan", "Lavender"]);
        assert_eq!(row.source_urls.len(), 2);
        assert_eq!(dataset.scrape_date, Some(Utc.timestamp_opt(200, 0).unwrap()));
        assert_eq!(dataset.data_version, "1.0");
    }

    #[tokio::test]
    async fn test_condense_ignores_order_and_duplicates() {
        let tmp = TempDir::new().unwrap();
        let mut first = FragranceRecord::new("Creed", "Aventus");
        first.ratings.insert("overall".into(), 4.3);
        first.seasons.insert("spring".into());
        let mut second = FragranceRecord::new("Creed", "Aventus");
        second.ratings.insert("overall".into(), 3.9);
        second.ratings.insert("longevity".into(), 4.0);
        second.seasons.insert("summer".into());

        let a = write(tmp.path(), "00000000000000000010-parfumo.json", Source::Parfumo, 10, vec![first]);
        let b = write(
            tmp.path(),
            "00000000000000000020-fragrantica.json",
            Source::Fragrantica,
            20,
            vec![second, FragranceRecord::new("Chanel", "Bleu de Chanel")],
        );

        let forward = condense(&[a.clone(), b.clone()]).await;
        let backward = condense(&[b.clone(), a.clone()]).await;
        let doubled = condense(&[b.clone(), a.clone(), a, b]).await;
        assert_eq!(forward, backward);
        assert_eq!(forward, doubled);

        assert_eq!(forward.len(), 2);
        assert_eq!(forward.records[0].brand, "Chanel");
        let aventus = &forward.records[1];
        assert_eq!(aventus.ratings.get("overall"), Some(&4.3));
        assert_eq!(aventus.ratings.get("longevity"), Some(&4.0));
        assert_eq!(aventus.seasons.len(), 2);
    }

    #[tokio::test]
    async fn test_renamed_copy_of_a_shard_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut early = FragranceRecord::new("Creed", "Aventus");
        early.release_year = Some(2010);
        let mut late = FragranceRecord::new("Creed", "Aventus");
        late.release_year = Some(1999);
        let a = write(tmp.path(), "00000000000000000010-parfumo.json", Source::Parfumo, 10, vec![early]);
        let b = write(tmp.path(), "00000000000000000020-basenotes.json", Source::Basenotes, 20, vec![late]);
        let copy = tmp.path().join("00000000000000000005-basenotes.json");
        std::fs::copy(&b, &copy).unwrap();

        let plain = condense(&[a.clone(), b.clone()]).await;
        let with_copy = condense(&[a, b, copy]).await;
        assert_eq!(plain.records[0].release_year, Some(2010));
        assert_eq!(plain, with_copy);
    }

    #[tokio::test]
    async fn test_condense_is_idempotent_across_runs() {
        let tmp = TempDir::new().unwrap();
        let a = write(
            tmp.path(),
            "00000000000000000001-fragrantica.json",
            Source::Fragrantica,
            1,
            vec![sauvage("https://f/1", &[("Pepper", NoteCategory::Top), ("Pepper", NoteCategory::Top)])],
        );
        let once = condense(std::slice::from_ref(&a)).await;
        let twice = condense(std::slice::from_ref(&a)).await;
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
        assert_eq!(once.records[0].notes.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_shard_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let good = write(
            tmp.path(),
            "00000000000000000001-basenotes.json",
            Source::Basenotes,
            1,
            vec![FragranceRecord::new("Guerlain", "Shalimar")],
        );
        let bad = tmp.path().join("00000000000000000002-basenotes.json");
        std::fs::write(&bad, "truncated{").unwrap();
        let missing = tmp.path().join("00000000000000000003-basenotes.json");

        let dataset = condense(&[bad, good, missing]).await;
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.scrape_date, Some(Utc.timestamp_opt(1, 0).unwrap()));
    }

    #[test]
    fn test_merge_fills_note_intensity_gaps() {
        let mut row = FragranceRecord::new("Dior", "Sauvage");
        row.notes.push(Note::new("Bergamot", NoteCategory::Top));
        let mut other = FragranceRecord::new("Dior", "Sauvage");
        other.notes.push(Note {
            name: "BERGAMOT".into(),
            category: NoteCategory::Top,
            intensity: Some(0.9),
        });
        other.notes.push(Note::new("Bergamot", NoteCategory::Base));

        merge_into(&mut row, other);
        assert_eq!(row.notes.len(), 2);
        assert_eq!(row.notes[0].name, "Bergamot");
        assert_eq!(row.notes[0].intensity, Some(0.9));
        assert_eq!(row.notes[1].category, NoteCategory::Base);
    }

    #[test]
    fn test_summary_helpers() {
        let mut dataset = AggregateDataset::default();
        assert_eq!(dataset.year_range(), None);

        let mut a = FragranceRecord::new("Dior", "Sauvage");
        a.release_year = Some(2015);
        let mut b = FragranceRecord::new("dior", "Fahrenheit");
        b.release_year = Some(1988);
        dataset.records = vec![a, b, FragranceRecord::new("Creed", "Aventus")];

        assert_eq!(dataset.unique_brands(), 2);
        assert_eq!(dataset.year_range(), Some((1988, 2015)));
    }
}
