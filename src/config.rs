//! Runtime configuration loaded from an optional YAML file.
//!
//! A missing or broken config file is never fatal: the loader logs a warning
//! and hands back [`ScrapeConfig::default`], which mirrors the limits the
//! sites are known to tolerate.
//!
//! ```yaml
//! max_tries: 3
//! timeout_secs: 30
//! retry_delay_secs: 5
//! shard_size: 25
//! proxies:
//!   - http://10.0.0.2:3128
//! sources:
//!   fragrantica:
//!     max_calls: 10
//!     period_secs: 60
//!     base_url: https://www.fragrantica.com
//! ```

use crate::error::ConfigError;
use crate::models::Source;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Calls-per-period allowance for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_calls: u32,
    pub period: Duration,
}

impl RateLimit {
    /// Used for any source without an explicit limit.
    pub const PERMISSIVE: RateLimit = RateLimit {
        max_calls: 60,
        period: Duration::from_secs(60),
    };

    pub const fn per_minute(max_calls: u32) -> Self {
        Self {
            max_calls,
            period: Duration::from_secs(60),
        }
    }
}

/// Per-source settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub max_calls: u32,
    pub period_secs: u64,
    pub base_url: String,
    /// Number of index pages to walk when listing fragrance URLs.
    pub listing_pages: u32,
}

impl SourceConfig {
    pub fn rate_limit(&self) -> RateLimit {
        RateLimit {
            max_calls: self.max_calls.max(1),
            period: Duration::from_secs(self.period_secs.max(1)),
        }
    }

    pub fn defaults_for(source: Source) -> Self {
        let (limit, base_url) = match source {
            Source::Fragrantica => (RateLimit::per_minute(10), "https://www.fragrantica.com"),
            Source::Basenotes => (RateLimit::per_minute(5), "https://basenotes.com"),
            Source::Parfumo => (RateLimit::per_minute(20), "https://www.parfumo.com"),
        };
        Self {
            max_calls: limit.max_calls,
            period_secs: limit.period.as_secs(),
            base_url: base_url.to_string(),
            listing_pages: 1,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_calls: RateLimit::PERMISSIVE.max_calls,
            period_secs: RateLimit::PERMISSIVE.period.as_secs(),
            base_url: String::new(),
            listing_pages: 1,
        }
    }
}

/// Top-level scrape configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub sources: HashMap<Source, SourceConfig>,
    pub proxies: Vec<String>,
    /// Total attempts per URL, including the first.
    pub max_tries: u32,
    pub timeout_secs: u64,
    /// Base delay of the exponential backoff.
    pub retry_delay_secs: u64,
    /// Records per shard before a batch is flushed early.
    pub shard_size: usize,
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            sources: Source::ALL
                .iter()
                .map(|s| (*s, SourceConfig::defaults_for(*s)))
                .collect(),
            proxies: Vec::new(),
            max_tries: 3,
            timeout_secs: 30,
            retry_delay_secs: 5,
            shard_size: 25,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

impl ScrapeConfig {
    /// Parse a YAML document. Sources the document leaves out keep their
    /// built-in defaults.
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut parsed: ScrapeConfig =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        for source in Source::ALL {
            parsed
                .sources
                .entry(source)
                .or_insert_with(|| SourceConfig::defaults_for(source));
        }
        for (source, cfg) in parsed.sources.iter_mut() {
            if cfg.base_url.is_empty() {
                cfg.base_url = SourceConfig::defaults_for(*source).base_url;
            }
        }
        Ok(parsed)
    }

    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    /// Load the config, falling back to defaults on any error.
    #[instrument(level = "info", skip_all)]
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("No config file given; using default settings");
            return Self::default();
        };
        match Self::try_load(path) {
            Ok(cfg) => {
                info!(path = %path.display(), sources = cfg.sources.len(), proxies = cfg.proxies.len(), "Loaded configuration");
                cfg
            }
            Err(e) => {
                warn!(error = %e, "Config unusable; using default settings");
                Self::default()
            }
        }
    }

    pub fn source(&self, source: Source) -> SourceConfig {
        self.sources
            .get(&source)
            .cloned()
            .unwrap_or_else(|| SourceConfig::defaults_for(source))
    }

    pub fn rate_limits(&self) -> HashMap<Source, RateLimit> {
        self.sources
            .iter()
            .map(|(s, cfg)| (*s, cfg.rate_limit()))
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}
