//! Fragrantica scraper.
//!
//! Fragrance pages carry schema.org microdata for the name, brand and
//! aggregate rating. Accords, seasons and time of day are rendered as
//! percentage-width bars; the note pyramid is a sequence of `h4` headings
//! each followed by a block of note links.

use super::{category_from_label, first_text, require, resolve_links, selector, strip_title_suffixes, text_of, width_fraction};
use crate::error::ExtractionError;
use crate::models::{FragranceRecord, Note};
use crate::utils::parse_number;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static TITLE: Lazy<Selector> = Lazy::new(|| selector(r#"h1[itemprop="name"]"#));
static BRAND: Lazy<Selector> = Lazy::new(|| selector(r#"[itemprop="brand"] [itemprop="name"]"#));
static RATING: Lazy<Selector> = Lazy::new(|| selector(r#"[itemprop="ratingValue"]"#));
static ACCORD_BAR: Lazy<Selector> = Lazy::new(|| selector(".accord-bar"));
static SEASON_BAR: Lazy<Selector> = Lazy::new(|| selector(".season-bar[data-kind]"));
static PYRAMID_HEADING: Lazy<Selector> = Lazy::new(|| selector("#pyramid h4"));
static NOTE_LINK: Lazy<Selector> = Lazy::new(|| selector("a"));
static VOTE_ROW: Lazy<Selector> = Lazy::new(|| selector(".vote-row"));
static VOTE_LABEL: Lazy<Selector> = Lazy::new(|| selector(".vote-label"));
static VOTE_VALUE: Lazy<Selector> = Lazy::new(|| selector(".vote-value"));
static DETAIL_LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static LAUNCHED: Lazy<Regex> = Lazy::new(|| Regex::new(r"launched in (\d{4})").expect("valid regex"));

const SEASONS: [&str; 4] = ["winter", "spring", "summer", "fall"];
const TIMES_OF_DAY: [&str; 2] = ["day", "night"];

/// Bars at or above this share mark a season/occasion as recommended.
const RECOMMENDED: f64 = 0.5;

pub fn index_urls(base: &Url) -> Vec<String> {
    vec![base.to_string()]
}

pub fn detail_links(base: &Url, document: &Html) -> Vec<String> {
    resolve_links(base, document, &DETAIL_LINK, |u| {
        u.host_str() == base.host_str() && u.path().starts_with("/perfume/")
    })
}

pub fn extract(url: &str, document: &Html) -> Result<FragranceRecord, ExtractionError> {
    let root = document.root_element();
    let brand = require(first_text(root, &BRAND), || ExtractionError::MissingBrand { url: url.into() })?;
    let title = require(first_text(root, &TITLE), || ExtractionError::MissingName { url: url.into() })?;
    let name = strip_title_suffixes(&title, &brand);

    let mut record = FragranceRecord::new(brand, name);
    record.release_year = LAUNCHED
        .captures(&text_of(root))
        .and_then(|c| c[1].parse().ok());

    if let Some(rating) = root
        .select(&RATING)
        .find_map(|el| el.value().attr("content").map(str::to_owned).or_else(|| Some(text_of(el))))
        .and_then(|t| parse_number(&t))
    {
        record.ratings.insert("overall".into(), rating);
    }

    for bar in root.select(&ACCORD_BAR) {
        let accord = text_of(bar).to_lowercase();
        if let (false, Some(strength)) = (accord.is_empty(), width_fraction(bar)) {
            record.accords.insert(accord, strength);
        }
    }

    for bar in root.select(&SEASON_BAR) {
        let Some(kind) = bar.value().attr("data-kind").map(str::to_lowercase) else {
            continue;
        };
        let Some(score) = width_fraction(bar) else {
            continue;
        };
        if SEASONS.contains(&kind.as_str()) && score >= RECOMMENDED {
            record.seasons.insert(kind.clone());
        }
        if TIMES_OF_DAY.contains(&kind.as_str()) && score >= RECOMMENDED {
            record.occasions.insert(kind.clone());
        }
        record.weather_suitability.insert(kind, score);
    }

    record.notes = pyramid(root);

    for row in root.select(&VOTE_ROW) {
        let (Some(label), Some(value)) = (first_text(row, &VOTE_LABEL), first_text(row, &VOTE_VALUE)) else {
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

    Ok(record)
}

/// Walk `#pyramid h4` headings; the next element sibling holds the notes.
fn pyramid(root: ElementRef<'_>) -> Vec<Note> {
    let mut notes = Vec::new();
    for heading in root.select(&PYRAMID_HEADING) {
        let Some(category) = category_from_label(&text_of(heading)) else {
            continue;
        };
        let Some(block) = heading.next_siblings().find_map(ElementRef::wrap) else {
            continue;
        };
        notes.extend(
            block
                .select(&NOTE_LINK)
                .map(text_of)
                .filter(|n| !n.is_empty())
                .map(|n| Note::new(n, category)),
        );
    }
    notes
}
