//! # Scent Harvest
//!
//! A resilient fetch-and-aggregate pipeline for fragrance data. It scrapes
//! fragrance pages from several sites concurrently, persists what it
//! extracts incrementally, and merges everything into one deduplicated
//! dataset.
//!
//! ## Architecture
//!
//! 1. **Listing**: each [`scrapers::UrlLister`] walks a source's index pages
//! 2. **Fetching**: [`net::FetchEngine`] combines the per-source
//!    [`net::RateLimiter`], [`net::ProxyRotator`], [`net::ResponseCache`] and
//!    a bounded retry loop with exponential backoff
//! 3. **Extraction**: [`scrapers::SourceExtractor`] turns a page into a
//!    [`models::FragranceRecord`]
//! 4. **Persistence**: [`outputs::ShardWriter`] writes immutable shard files
//!    as batches complete
//! 5. **Condensing**: [`outputs::condense`] merges all shards by
//!    (brand, name) into an [`outputs::AggregateDataset`]
//!
//! [`coordinator::Coordinator`] drives the whole run under a concurrency
//! bound and a cancellation token.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod net;
pub mod outputs;
pub mod scrapers;
pub mod utils;
