//! Run-scoped response cache with single-flight fetches.
//!
//! Every URL maps to a [`OnceCell`]. The first caller to miss runs the fetch
//! while later callers for the same URL wait on the same cell, so a page is
//! downloaded at most once per run no matter how many tasks ask for it.
//! Failures leave the cell empty; the next caller gets to try again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// A successful response body plus the status it came with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub payload: String,
    pub status: u16,
}

/// Where a page handed back by [`ResponseCache::get_or_try_fetch`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Already cached, or produced by a concurrent caller we waited on.
    Hit,
    /// This caller ran the fetch.
    Fetched,
}

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<CachedPage>>>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, url: &str) -> Arc<OnceCell<CachedPage>> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(entries.entry(url.to_string()).or_default())
    }

    pub fn get(&self, url: &str) -> Option<CachedPage> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(url).and_then(|cell| cell.get().cloned())
    }

    /// Store a page. An existing entry is kept; the first stored page wins.
    pub fn put(&self, url: &str, page: CachedPage) {
        let _ = self.cell(url).set(page);
    }

    /// Return the cached page for `url`, running `fetch` only if nobody has
    /// cached it yet and no other caller is currently fetching it.
    pub async fn get_or_try_fetch<F, Fut, E>(&self, url: &str, fetch: F) -> Result<(CachedPage, Lookup), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedPage, E>>,
    {
        let cell = self.cell(url);
        if let Some(page) = cell.get() {
            return Ok((page.clone(), Lookup::Hit));
        }

        let mut ran = false;
        let page = cell
            .get_or_try_init(|| {
                ran = true;
                fetch()
            })
            .await?;
        let lookup = if ran { Lookup::Fetched } else { Lookup::Hit };
        Ok((page.clone(), lookup))
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
