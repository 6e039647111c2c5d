//! Parfumo scraper.
//!
//! The top list at `/Perfumes/Tops/Men` links to up to 100 fragrance pages.
//! A fragrance page has labelled rating rows (scent, longevity, sillage,
//! bottle, value for money) and embeds its season and occasion pie charts
//! as JSON assigned to `seasonData` / `occasionData` in an inline script.

use super::{category_from_label, first_text, require, resolve_links, selector, strip_title_suffixes, text_of};
use crate::error::ExtractionError;
use crate::models::{FragranceRecord, Note};
use crate::utils::parse_number;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

static TITLE: Lazy<Selector> = Lazy::new(|| selector(r#"h1[itemprop="name"]"#));
static BRAND: Lazy<Selector> = Lazy::new(|| selector(r#"[itemprop="brand"] [itemprop="name"]"#));
static YEAR: Lazy<Selector> = Lazy::new(|| selector(".release-year"));
static ACCORD: Lazy<Selector> = Lazy::new(|| selector(".accord"));
static NOTE_GROUP: Lazy<Selector> = Lazy::new(|| selector(".pyramid-level[data-level]"));
static NOTE: Lazy<Selector> = Lazy::new(|| selector(".note"));
static RATING_ROW: Lazy<Selector> = Lazy::new(|| selector(".rating-row"));
static RATING_LABEL: Lazy<Selector> = Lazy::new(|| selector(".rating-label"));
static RATING_VALUE: Lazy<Selector> = Lazy::new(|| selector(".rating-value"));
static DETAIL_LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static CHART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(seasonData|occasionData)\s*=\s*(\[[^;]*\])").expect("valid regex"));

const TOP_LIST_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct ChartSlice {
    label: String,
    #[serde(default)]
    percentage: f64,
}

pub fn index_urls(base: &Url) -> Vec<String> {
    base.join("/Perfumes/Tops/Men")
        .map(|u| vec![u.to_string()])
        .unwrap_or_default()
}

pub fn detail_links(base: &Url, document: &Html) -> Vec<String> {
    let mut links = resolve_links(base, document, &DETAIL_LINK, |u| {
        let path = u.path();
        path.starts_with("/Perfumes/") && !path.starts_with("/Perfumes/Tops")
    });
    links.truncate(TOP_LIST_LIMIT);
    links
}

pub fn extract(url: &str, document: &Html, raw: &str) -> Result<FragranceRecord, ExtractionError> {
    let root = document.root_element();
    let brand = require(first_text(root, &BRAND), || ExtractionError::MissingBrand { url: url.into() })?;
    let title = require(first_text(root, &TITLE), || ExtractionError::MissingName { url: url.into() })?;
    let name = strip_title_suffixes(&title, &brand);

    let mut record = FragranceRecord::new(brand, name);
    record.release_year = first_text(root, &YEAR).and_then(|y| parse_number(&y)).map(|y| y as i32);

    for accord in root.select(&ACCORD).map(text_of).filter(|a| !a.is_empty()) {
        // Parfumo lists accords by rank without strengths.
        let rank = record.accords.len() as f64;
        record.accords.entry(accord.to_lowercase()).or_insert(1.0 / (rank + 1.0));
    }

    for group in root.select(&NOTE_GROUP) {
        let Some(category) = group.value().attr("data-level").and_then(category_from_label) else {
            continue;
        };
        record.notes.extend(
            group
                .select(&NOTE)
                .map(text_of)
                .filter(|n| !n.is_empty())
                .map(|n| Note::new(n, category)),
        );
    }

    for row in root.select(&RATING_ROW) {
        let (Some(label), Some(value)) = (first_text(row, &RATING_LABEL), first_text(row, &RATING_VALUE)) else {
            continue;
        };
        let Some(value) = parse_number(&value) else { continue };
        match label.to_lowercase().as_str() {
            "longevity" => record.longevity = Some(value),
            "sillage" => record.sillage = Some(value),
            other => {
                record.ratings.insert(other.replace(' ', "_"), value);
            }
        }
    }

    for (chart, slices) in charts(raw) {
        let Some(top) = slices
            .iter()
            .max_by(|a, b| a.percentage.total_cmp(&b.percentage))
            .map(|s| s.label.to_lowercase())
        else {
            continue;
        };
        match chart.as_str() {
            "seasonData" => {
                record.seasons.insert(top);
                record.weather_suitability.extend(
                    slices
                        .iter()
                        .map(|s| (s.label.to_lowercase(), (s.percentage / 100.0).clamp(0.0, 1.0))),
                );
            }
            _ => {
                record.occasions.insert(top);
            }
        }
    }

    Ok(record)
}

/// Pull the embedded chart arrays out of the raw page source.
fn charts(raw: &str) -> BTreeMap<String, Vec<ChartSlice>> {
    let mut out = BTreeMap::new();
    for caps in CHART.captures_iter(raw) {
        match serde_json::from_str::<Vec<ChartSlice>>(&caps[2]) {
            Ok(slices) => {
                out.insert(caps[1].to_string(), slices);
            }
            Err(e) => debug!(chart = &caps[1], error = %e, "Unreadable chart data"),
        }
    }
    out
}
