//! JSON output of the aggregate dataset.
//!
//! The file carries the same rows as the CSV, with notes, ratings and accords
//! kept structured instead of flattened:
//!
//! ```text
//! output_dir/
//! ├── fragrances.csv
//! ├── fragrances.json
//! └── failed_urls.txt
//! ```

use super::condense::AggregateDataset;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `dataset` as pretty-printed JSON to `path`, creating parent
/// directories as needed.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_dataset(dataset: &AggregateDataset, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(dataset)?;

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    fs::write(path, json).await?;
    info!(records = dataset.len(), "Wrote JSON dataset");
    Ok(())
}
