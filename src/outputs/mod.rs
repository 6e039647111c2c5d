//! Persistence and output files.
//!
//! # Submodules
//!
//! - [`shards`]: incremental, crash-safe shard files written during a run
//! - [`condense`]: merges shards into the deduplicated [`AggregateDataset`]
//! - [`table`]: flattened CSV rendition of the dataset
//! - [`json`]: structured JSON rendition of the dataset
//! - [`report`]: sorted list of URLs that could not be fetched
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── shards/
//! │   ├── 00000001760781234567890-fragrantica.json
//! │   └── 00000001760781234567891-basenotes.json
//! ├── fragrances.csv
//! ├── fragrances.json
//! └── failed_urls.txt
//! ```

pub mod condense;
pub mod json;
pub mod report;
pub mod shards;
pub mod table;

pub use condense::{AggregateDataset, condense};
pub use shards::ShardWriter;

use std::path::{Path, PathBuf};

pub const SHARD_DIR: &str = "shards";
pub const CSV_FILE: &str = "fragrances.csv";
pub const JSON_FILE: &str = "fragrances.json";
pub const FAILED_URLS_FILE: &str = "failed_urls.txt";

pub fn shard_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(SHARD_DIR)
}
