//! Incremental, crash-safe persistence of extracted records.
//!
//! Records are buffered per source and flushed into immutable shard files.
//! A batch is closed when its source finishes, when it reaches the
//! configured `shard_size`, or at the end of the run.
//!
//! # Shard Files
//!
//! ```text
//! output_dir/shards/
//! ├── 00000001760781234567890-fragrantica.json
//! ├── 00000001760781234567891-basenotes.json
//! └── 00000001760781299000000-fragrantica.json
//! ```
//!
//! Names start with the UTC close time in microseconds, zero padded so that
//! lexical order is chronological. Each file is written to a `.tmp` sibling
//! and renamed into place, so a crash never leaves a half-written shard.

use crate::error::{PersistenceError, RunError};
use crate::models::{FragranceRecord, SHARD_SCHEMA_VERSION, Shard, Source};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument, warn};

/// Records buffered before a source's batch is flushed automatically.
pub const DEFAULT_SHARD_SIZE: usize = 25;

pub struct ShardWriter {
    dir: PathBuf,
    shard_size: usize,
    run_timestamp: DateTime<Utc>,
    pending: BTreeMap<Source, Vec<FragranceRecord>>,
    last_micros: i64,
    written: Vec<PathBuf>,
    attempted: usize,
    last_error: Option<PersistenceError>,
}

impl ShardWriter {
    /// Prepare `dir` for shards. Failing here means nothing can be persisted.
    pub async fn create(dir: impl Into<PathBuf>, shard_size: usize) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|source| PersistenceError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            shard_size: shard_size.max(1),
            run_timestamp: Utc::now(),
            pending: BTreeMap::new(),
            last_micros: 0,
            written: Vec::new(),
            attempted: 0,
            last_error: None,
        })
    }

    pub fn pending(&self, source: Source) -> usize {
        self.pending.get(&source).map_or(0, Vec::len)
    }

    /// Buffer a record, flushing the source's batch once it is full.
    pub async fn append(&mut self, source: Source, record: FragranceRecord) -> Option<PathBuf> {
        let batch = self.pending.entry(source).or_default();
        batch.push(record);
        if batch.len() >= self.shard_size {
            self.close(source).await
        } else {
            None
        }
    }

    /// Flush the buffered batch for `source` into a new shard.
    ///
    /// Returns the shard path, or `None` if there was nothing to write or the
    /// write failed. A failed batch is logged with its size and dropped.
    #[instrument(level = "debug", skip(self))]
    pub async fn close(&mut self, source: Source) -> Option<PathBuf> {
        let records = self.pending.remove(&source).filter(|r| !r.is_empty())?;
        let count = records.len();
        let shard = Shard {
            schema_version: SHARD_SCHEMA_VERSION,
            run_timestamp: self.run_timestamp,
            source,
            records,
        };
        let name = self.next_name(source);
        let path = self.dir.join(name);
        self.attempted += 1;

        match write_shard(&path, &shard).await {
            Ok(()) => {
                info!(path = %path.display(), %source, records = count, "Wrote shard");
                self.written.push(path.clone());
                Some(path)
            }
            Err(e) => {
                warn!(%source, records = count, error = %e, "Shard write failed; batch dropped");
                self.last_error = Some(e);
                None
            }
        }
    }

    pub async fn close_all(&mut self) -> Vec<PathBuf> {
        let sources: Vec<Source> = self.pending.keys().copied().collect();
        let mut paths = Vec::new();
        for source in sources {
            paths.extend(self.close(source).await);
        }
        paths
    }

    /// Flush everything and hand back the shard paths of this run.
    ///
    /// Fails only when at least one write was attempted and none succeeded.
    pub async fn finish(mut self) -> Result<Vec<PathBuf>, RunError> {
        self.close_all().await;
        match (self.written.is_empty(), self.last_error) {
            (true, Some(last)) => Err(RunError::NoShardsWritten {
                attempted: self.attempted,
                last,
            }),
            _ => Ok(self.written),
        }
    }

    /// Strictly increasing across the writer's lifetime, even when the clock
    /// doesn't move between two closes.
    fn next_name(&mut self, source: Source) -> String {
        let now = Utc::now().timestamp_micros();
        let micros = now.max(self.last_micros + 1);
        self.last_micros = micros;
        format!("{micros:020}-{source}.json")
    }
}

async fn write_shard(path: &Path, shard: &Shard) -> Result<(), PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(shard).map_err(|source| PersistenceError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await.map_err(io_err)?;
    fs::rename(&tmp, path).await.map_err(io_err)
}

/// Read and validate one shard file.
pub async fn read_shard(path: &Path) -> Result<Shard, PersistenceError> {
    let bytes = fs::read(path).await.map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let shard: Shard = serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    if shard.schema_version != SHARD_SCHEMA_VERSION {
        return Err(PersistenceError::SchemaVersion {
            path: path.to_path_buf(),
            found: shard.schema_version,
        });
    }
    Ok(shard)
}

/// All `*.json` shard files in `dir`, sorted by name. A missing directory
/// simply has no shards.
pub async fn list_shards(dir: &Path) -> Result<Vec<PathBuf>, PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(e)),
    };
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Delete every shard in `dir`, returning how many were removed.
#[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
pub async fn clear_shards(dir: &Path) -> Result<usize, PersistenceError> {
    let shards = list_shards(dir).await?;
    for path in &shards {
        fs::remove_file(path).await.map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;
    }
    info!(removed = shards.len(), "Cleared old shards");
    Ok(shards.len())
}
