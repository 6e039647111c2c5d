//! Basenotes scraper.
//!
//! Reviews are listed 30 to a page under `/fragrancereviews/page/{n}`, each
//! blurb linking to the fragrance page. Fragrance pages title themselves
//! "Name by Brand" and keep launch year, gender and availability in an info
//! table.

use super::{category_from_label, first_text, require, resolve_links, selector, text_of};
use crate::error::ExtractionError;
use crate::models::{FragranceRecord, Note};
use crate::utils::parse_number;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

static TITLE: Lazy<Selector> = Lazy::new(|| selector("h1"));
static RATING_META: Lazy<Selector> = Lazy::new(|| selector(r#"meta[itemprop="ratingValue"]"#));
static INFO_TABLE: Lazy<Selector> = Lazy::new(|| selector(".peoplelist"));
static PYRAMID_SECTION: Lazy<Selector> = Lazy::new(|| selector(".notespyramid section"));
static SECTION_HEADING: Lazy<Selector> = Lazy::new(|| selector("h3"));
static SECTION_NOTE: Lazy<Selector> = Lazy::new(|| selector("li"));
static REVIEW_LINK: Lazy<Selector> = Lazy::new(|| selector(".reviewblurb a[href]"));
static LAUNCH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)year of launch\s*:?\s*(\d{4})").expect("valid regex"));

pub fn index_urls(base: &Url, pages: u32) -> Vec<String> {
    (1..=pages.max(1))
        .filter_map(|page| base.join(&format!("/fragrancereviews/page/{page}")).ok())
        .map(|u| u.to_string())
        .collect()
}

pub fn detail_links(base: &Url, document: &Html) -> Vec<String> {
    resolve_links(base, document, &REVIEW_LINK, |u| u.path().starts_with("/fragrances/"))
}

pub fn extract(url: &str, document: &Html) -> Result<FragranceRecord, ExtractionError> {
    let root = document.root_element();
    let title = require(first_text(root, &TITLE), || ExtractionError::MissingName { url: url.into() })?;

    let (name, brand) = match title.rsplit_once(" by ") {
        Some((name, brand)) => (name.trim().to_string(), brand.trim().to_string()),
        None => (title.clone(), String::new()),
    };
    let name = require(Some(name), || ExtractionError::MissingName { url: url.into() })?;
    let brand = require(Some(brand), || ExtractionError::MissingBrand { url: url.into() })?;

    let mut record = FragranceRecord::new(brand, name);

    if let Some(rating) = root
        .select(&RATING_META)
        .find_map(|m| m.value().attr("content"))
        .and_then(parse_number)
    {
        record.ratings.insert("overall".into(), rating);
    }

    if let Some(info) = root.select(&INFO_TABLE).next().map(text_of) {
        record.release_year = LAUNCH_YEAR.captures(&info).and_then(|c| c[1].parse().ok());
    }

    for section in root.select(&PYRAMID_SECTION) {
        let Some(category) = first_text(section, &SECTION_HEADING).and_then(|h| category_from_label(&h)) else {
            continue;
        };
        record.notes.extend(
            section
                .select(&SECTION_NOTE)
                .map(text_of)
                .filter(|n| !n.is_empty())
                .map(|n| Note::new(n, category)),
        );
    }

    Ok(record)
}
