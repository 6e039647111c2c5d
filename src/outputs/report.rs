//! Failed-URL report: one URL per line, sorted.

use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

#[instrument(level = "info", skip_all, fields(path = %path.display(), count = urls.len()))]
pub async fn write_failed_urls(urls: &[String], path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let mut sorted = urls.to_vec();
    sorted.sort();
    sorted.dedup();
    let mut body = sorted.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(path, body).await?;
    info!("Wrote failed URL report");
    Ok(())
}
