//! Command-line interface definitions for Scent Harvest.
//!
//! All arguments can be provided via command-line flags or environment variables.

use crate::models::Source;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for a scrape run.
///
/// # Examples
///
/// ```sh
/// # Scrape every source into ./data
/// scent_harvest -o ./data
///
/// # Two sources, at most 50 fragrances each, with a config file
/// scent_harvest -o ./data -c config.yaml --sources fragrantica,parfumo --max-items 50
///
/// # Rebuild the dataset from existing shards without fetching
/// scent_harvest -o ./data --condense-only
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory for shards, the CSV/JSON dataset and the failed-URL report
    #[arg(short, long, env = "SCENT_OUTPUT_DIR", default_value = "data")]
    pub output_dir: PathBuf,

    /// Optional path to config.yaml file
    #[arg(short, long, env = "SCENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Sources to scrape, comma separated
    #[arg(short, long, value_enum, value_delimiter = ',', default_values_t = Source::ALL)]
    pub sources: Vec<Source>,

    /// Maximum number of fetches in flight at once
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: u16,

    /// Stop after this many fragrance URLs per source
    #[arg(short, long)]
    pub max_items: Option<usize>,

    /// Delete shards left by earlier runs before scraping
    #[arg(long)]
    pub clear_shards: bool,

    /// Only merge existing shards into the dataset; fetch nothing
    #[arg(long, conflicts_with = "clear_shards")]
    pub condense_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["scent_harvest"]);

        assert_eq!(cli.output_dir, PathBuf::from("data"));
        assert_eq!(cli.sources, Source::ALL.to_vec());
        assert_eq!(cli.concurrency, 4);
        assert!(cli.config.is_none());
        assert!(cli.max_items.is_none());
        assert!(!cli.clear_shards);
        assert!(!cli.condense_only);
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "scent_harvest",
            "-o",
            "/tmp/out",
            "--config",
            "scrape.yaml",
            "--sources",
            "parfumo,basenotes",
            "--concurrency",
            "8",
            "--max-items",
            "10",
            "--clear-shards",
        ]);

        assert_eq!(cli.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cli.config, Some(PathBuf::from("scrape.yaml")));
        assert_eq!(cli.sources, vec![Source::Parfumo, Source::Basenotes]);
        assert_eq!(cli.concurrency, 8);
        assert_eq!(cli.max_items, Some(10));
        assert!(cli.clear_shards);
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        assert!(Cli::try_parse_from(["scent_harvest", "--sources", "sephora"]).is_err());
        assert!(Cli::try_parse_from(["scent_harvest", "--concurrency", "0"]).is_err());
        assert!(Cli::try_parse_from(["scent_harvest", "--condense-only", "--clear-shards"]).is_err());
    }
}
