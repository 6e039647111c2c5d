//! Error taxonomy for the fetch-and-aggregate pipeline.
//!
//! Every failure mode has its own type so that the caller can decide whether
//! it is recoverable. Only [`RunError`] ever aborts a run; everything else is
//! logged and absorbed at the component boundary where it happens.

use std::path::PathBuf;
use thiserror::Error;

/// Problems reading or parsing the YAML configuration file.
///
/// Never fatal: the loader logs the error and falls back to defaults.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Low-level failures from a single HTTP exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server answered but the body could not be read or decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid proxy {proxy}: {reason}")]
    Proxy { proxy: String, reason: String },
}

impl TransportError {
    /// Network-level errors are worth another attempt; a broken body is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Connect(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() || e.is_request() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Malformed(e.to_string())
        }
    }
}

/// A payload that could not be turned into a record at all.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no fragrance name found in {url}")]
    MissingName { url: String },
    #[error("no brand found in {url}")]
    MissingBrand { url: String },
}

/// The URL-listing collaborator could not enumerate a source.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("index page {url} could not be fetched: {cause}")]
    IndexUnavailable { url: String, cause: String },
    #[error("invalid base url {url}: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Shard write or read failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("shard I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("shard {path} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("shard {path} has unsupported schema version {found}")]
    SchemaVersion { path: PathBuf, found: u32 },
}

/// Run-level failures. These are the only errors that abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no shard could be written ({attempted} attempted); last error: {last}")]
    NoShardsWritten {
        attempted: usize,
        #[source]
        last: PersistenceError,
    },
    #[error("shard directory unavailable: {0}")]
    ShardDir(#[source] PersistenceError),
}
