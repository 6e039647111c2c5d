//! Fragrance site scrapers: URL listing and record extraction.
//!
//! Each supported site follows the same two-phase pattern:
//!
//! 1. **Listing**: walk the site's index page(s) and collect fragrance URLs
//! 2. **Extraction**: turn one fetched fragrance page into a [`FragranceRecord`]
//!
//! # Supported Sources
//!
//! | Source | Module | Index | Notes |
//! |--------|--------|-------|-------|
//! | Fragrantica | [`fragrantica`] | Home page | Microdata + accord/season bars |
//! | Basenotes | [`basenotes`] | Paginated review list | Notes pyramid + info table |
//! | Parfumo | [`parfumo`] | Top men's list | Rating rows + embedded chart JSON |
//!
//! Extraction is lenient: missing sections leave fields empty. Only a page
//! without a recognizable name or brand is rejected.

pub mod basenotes;
pub mod fragrantica;
pub mod parfumo;

use crate::config::SourceConfig;
use crate::error::{ExtractionError, ListingError};
use crate::models::{FragranceRecord, NoteCategory, Source};
use crate::net::{FetchEngine, Transport};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Per-site extraction and listing, selected by [`Source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceExtractor {
    Fragrantica,
    Basenotes,
    Parfumo,
}

impl SourceExtractor {
    pub fn for_source(source: Source) -> Self {
        match source {
            Source::Fragrantica => SourceExtractor::Fragrantica,
            Source::Basenotes => SourceExtractor::Basenotes,
            Source::Parfumo => SourceExtractor::Parfumo,
        }
    }

    /// Parse one fragrance page fetched from `url`.
    pub fn extract(&self, url: &str, payload: &str) -> Result<FragranceRecord, ExtractionError> {
        let document = Html::parse_document(payload);
        let mut record = match self {
            SourceExtractor::Fragrantica => fragrantica::extract(url, &document)?,
            SourceExtractor::Basenotes => basenotes::extract(url, &document)?,
            SourceExtractor::Parfumo => parfumo::extract(url, &document, payload)?,
        };
        record.source_urls.insert(url.to_string());
        Ok(record)
    }

    /// Index pages to walk, in order.
    pub fn index_urls(&self, base: &Url, pages: u32) -> Vec<String> {
        match self {
            SourceExtractor::Fragrantica => fragrantica::index_urls(base),
            SourceExtractor::Basenotes => basenotes::index_urls(base, pages),
            SourceExtractor::Parfumo => parfumo::index_urls(base),
        }
    }

    /// Fragrance page links found on one index page.
    pub fn detail_links(&self, base: &Url, payload: &str) -> Vec<String> {
        let document = Html::parse_document(payload);
        match self {
            SourceExtractor::Fragrantica => fragrantica::detail_links(base, &document),
            SourceExtractor::Basenotes => basenotes::detail_links(base, &document),
            SourceExtractor::Parfumo => parfumo::detail_links(base, &document),
        }
    }
}

/// Produces the ordered list of fragrance URLs for a source.
pub trait UrlLister {
    async fn list_urls<T: Transport>(
        &self,
        source: Source,
        engine: &FetchEngine<T>,
    ) -> Result<Vec<String>, ListingError>;
}

/// Lists URLs by fetching each source's index pages through the engine, so
/// listing obeys the same rate limits, proxies and cache as detail pages.
#[derive(Debug, Clone)]
pub struct IndexLister {
    sources: HashMap<Source, SourceConfig>,
}

impl IndexLister {
    pub fn new(sources: HashMap<Source, SourceConfig>) -> Self {
        Self { sources }
    }
}

impl UrlLister for IndexLister {
    #[instrument(level = "info", skip(self, engine))]
    async fn list_urls<T: Transport>(
        &self,
        source: Source,
        engine: &FetchEngine<T>,
    ) -> Result<Vec<String>, ListingError> {
        let cfg = self
            .sources
            .get(&source)
            .cloned()
            .unwrap_or_else(|| SourceConfig::defaults_for(source));
        let base = Url::parse(&cfg.base_url).map_err(|e| ListingError::BaseUrl {
            url: cfg.base_url.clone(),
            source: e,
        })?;
        let extractor = SourceExtractor::for_source(source);

        let mut links = Vec::new();
        for (page, index_url) in extractor.index_urls(&base, cfg.listing_pages).into_iter().enumerate() {
            match engine.fetch_page(source, &index_url).await {
                Ok(html) => {
                    let found = extractor.detail_links(&base, &html);
                    debug!(%index_url, count = found.len(), "Collected links from index page");
                    links.extend(found);
                }
                Err(cause) if page == 0 => {
                    return Err(ListingError::IndexUnavailable { url: index_url, cause });
                }
                Err(cause) => {
                    warn!(%index_url, %cause, "Index page failed; stopping pagination");
                    break;
                }
            }
        }

        let links: Vec<String> = links.into_iter().unique().collect();
        info!(%source, count = links.len(), "Indexed fragrance URLs");
        Ok(links)
    }
}

// ---- helpers shared by the site modules ----

static WIDTH_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"width:\s*([0-9]+(?:\.[0-9]+)?)%").expect("valid regex"));

pub(crate) fn selector(css: &'static str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css}: {e}"))
}

/// Element text with whitespace runs collapsed.
pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).join(" ")
}

pub(crate) fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .map(text_of)
        .find(|t| !t.is_empty())
}

/// Map a section heading such as "Top Notes" or "Middle Notes" to a level.
pub(crate) fn category_from_label(label: &str) -> Option<NoteCategory> {
    let label = label.to_ascii_lowercase();
    if label.contains("top") || label.contains("head") {
        Some(NoteCategory::Top)
    } else if label.contains("heart") || label.contains("middle") {
        Some(NoteCategory::Heart)
    } else if label.contains("base") {
        Some(NoteCategory::Base)
    } else {
        None
    }
}

/// `style="width: 87.5%"` becomes `0.875`.
pub(crate) fn width_fraction(el: ElementRef<'_>) -> Option<f64> {
    let style = el.value().attr("style")?;
    let pct: f64 = WIDTH_PERCENT.captures(style)?.get(1)?.as_str().parse().ok()?;
    Some((pct / 100.0).clamp(0.0, 1.0))
}

/// Resolve every `href` matched by `sel`, keep those accepted by `keep`, in
/// document order without duplicates.
pub(crate) fn resolve_links(
    base: &Url,
    document: &Html,
    sel: &Selector,
    keep: impl Fn(&Url) -> bool,
) -> Vec<String> {
    document
        .select(sel)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter(|u| keep(u))
        .map(|mut u| {
            u.set_fragment(None);
            u.to_string()
        })
        .unique()
        .collect()
}

/// Drop a trailing brand and gender suffix from a page title, e.g.
/// "Sauvage Dior for men" → "Sauvage".
pub(crate) fn strip_title_suffixes(title: &str, brand: &str) -> String {
    let mut name = title.trim().to_string();
    for suffix in [" for women and men", " for men", " for women"] {
        if name.to_ascii_lowercase().ends_with(suffix) {
            name.truncate(name.len() - suffix.len());
        }
    }
    if !brand.is_empty() {
        if let Some(cut) = suffix_start_ignore_case(&name, &format!(" {brand}")) {
            name.truncate(cut);
        }
    }
    name.trim().to_string()
}

/// Byte offset in `s` where a case-insensitive `suffix` begins. Offsets come
/// from `s` itself since lowercasing can change a string's byte length.
fn suffix_start_ignore_case(s: &str, suffix: &str) -> Option<usize> {
    let folded = |t: &str| t.chars().flat_map(char::to_lowercase).collect::<String>();
    let want = folded(suffix);
    s.char_indices()
        .map(|(i, _)| i)
        .find(|&i| folded(&s[i..]) == want)
}

pub(crate) fn require(value: Option<String>, err: impl FnOnce() -> ExtractionError) -> Result<String, ExtractionError> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(err)
}
