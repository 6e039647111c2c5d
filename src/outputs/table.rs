//! Flattened CSV rendition of the aggregate dataset.
//!
//! One row per fragrance. Fixed columns come first; rating, accord and
//! weather columns are derived from the keys present across the whole
//! dataset and sorted, so the header is stable for a given dataset. List
//! values are joined with `,` (and therefore quoted).

use super::condense::AggregateDataset;
use crate::models::{FragranceRecord, NoteCategory};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

const LEADING: [&str; 8] = [
    "name",
    "brand",
    "release_year",
    "longevity",
    "sillage",
    "seasons",
    "occasions",
    "sources",
];

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write one CSV row to any writer.
pub fn write_row<W: Write>(mut w: W, row: &[String]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, ",")?;
        } else {
            first = false;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn dynamic_keys<'a>(
    dataset: &'a AggregateDataset,
    field: impl Fn(&'a FragranceRecord) -> &'a BTreeMap<String, f64>,
) -> BTreeSet<&'a str> {
    dataset
        .records
        .iter()
        .flat_map(|r| field(r).keys().map(String::as_str))
        .collect()
}

pub fn header(dataset: &AggregateDataset) -> Vec<String> {
    let mut cols: Vec<String> = LEADING.iter().map(|c| c.to_string()).collect();
    for category in NoteCategory::ALL {
        cols.push(format!("{}_notes", category.as_str()));
        cols.push(format!("{}_intensities", category.as_str()));
    }
    cols.extend(dynamic_keys(dataset, |r| &r.ratings).into_iter().map(|k| format!("rating_{k}")));
    cols.extend(dynamic_keys(dataset, |r| &r.accords).into_iter().map(|k| format!("accord_{k}")));
    cols.extend(dynamic_keys(dataset, |r| &r.weather_suitability).into_iter().map(|k| format!("weather_{k}")));
    cols.push("scrape_date".into());
    cols.push("data_version".into());
    cols
}

/// Render the whole dataset, header included.
pub fn to_csv_string(dataset: &AggregateDataset) -> String {
    let ratings = dynamic_keys(dataset, |r| &r.ratings);
    let accords = dynamic_keys(dataset, |r| &r.accords);
    let weather = dynamic_keys(dataset, |r| &r.weather_suitability);
    let scrape_date = dataset.scrape_date.map(|d| d.to_rfc3339()).unwrap_or_default();

    let mut buf: Vec<u8> = Vec::new();
    // Writes into a Vec cannot fail.
    let _ = write_row(&mut buf, &header(dataset));
    for r in &dataset.records {
        let mut row = vec![
            r.name.clone(),
            r.brand.clone(),
            opt(r.release_year),
            opt(r.longevity),
            opt(r.sillage),
            r.seasons.iter().join(","),
            r.occasions.iter().join(","),
            r.source_urls.iter().join(","),
        ];
        for category in NoteCategory::ALL {
            row.push(r.notes_in(category).map(|n| &n.name).join(","));
            row.push(r.notes_in(category).filter_map(|n| n.intensity).join(","));
        }
        row.extend(ratings.iter().map(|k| opt(r.ratings.get(*k))));
        row.extend(accords.iter().map(|k| opt(r.accords.get(*k))));
        row.extend(weather.iter().map(|k| opt(r.weather_suitability.get(*k))));
        row.push(scrape_date.clone());
        row.push(dataset.data_version.clone());
        let _ = write_row(&mut buf, &row);
    }

    match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(&e.into_bytes()).into_owned(),
    }
}

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_csv(dataset: &AggregateDataset, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, to_csv_string(dataset)).await?;
    info!(rows = dataset.len(), "Wrote CSV dataset");
    Ok(())
}
