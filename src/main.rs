//! # Scent Harvest
//!
//! Scrapes fragrance pages from Fragrantica, Basenotes and Parfumo, writes
//! incremental shards, and condenses them into a deduplicated dataset.
//!
//! ## Usage
//!
//! ```sh
//! scent_harvest -o ./data -c config.yaml --sources fragrantica,basenotes
//! ```
//!
//! ## Outputs
//!
//! 1. `shards/*.json`: one file per closed batch, kept across runs
//! 2. `fragrances.csv` / `fragrances.json`: the condensed dataset
//! 3. `failed_urls.txt`: URLs that could not be fetched
//!
//! Ctrl-C stops dispatching new fetches; work already extracted is still
//! written out.

use clap::Parser;
use scent_harvest::cli::Cli;
use scent_harvest::config::ScrapeConfig;
use scent_harvest::coordinator::Coordinator;
use scent_harvest::net::{FetchEngine, ProxyRotator, RateLimiter, ReqwestTransport, RetryPolicy};
use scent_harvest::outputs::{
    self, AggregateDataset, CSV_FILE, FAILED_URLS_FILE, JSON_FILE, json, report, shards, table,
};
use scent_harvest::scrapers::IndexLister;
use scent_harvest::utils::ensure_writable_dir;
use std::error::Error;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("scent_harvest starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // Early check: ensure the output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let shard_dir = outputs::shard_dir(&args.output_dir);

    if args.condense_only {
        let paths = shards::list_shards(&shard_dir).await?;
        info!(shards = paths.len(), "Condensing existing shards only");
        let dataset = outputs::condense(&paths).await;
        write_dataset(&dataset, &args.output_dir).await?;
        info!(
            records = dataset.len(),
            unique_brands = dataset.unique_brands(),
            elapsed_s = start_time.elapsed().as_secs_f64(),
            "Condense complete"
        );
        return Ok(());
    }

    let config = ScrapeConfig::load_or_default(args.config.as_deref());

    if args.clear_shards {
        shards::clear_shards(&shard_dir).await?;
    }

    let transport = ReqwestTransport::new(&config.proxies, config.timeout(), &config.user_agent)?;
    let proxies = transport.usable_proxies(&config.proxies);
    if proxies.len() < config.proxies.len() {
        warn!(
            configured = config.proxies.len(),
            usable = proxies.len(),
            "Some proxies were rejected and are left out of rotation"
        );
    }
    let policy = RetryPolicy {
        max_tries: config.max_tries.max(1),
        base_delay: config.retry_delay(),
        request_timeout: config.timeout(),
        ..RetryPolicy::default()
    };
    let engine = FetchEngine::new(
        transport,
        RateLimiter::new(config.rate_limits()),
        ProxyRotator::new(proxies),
        policy,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping dispatch and writing results");
            on_signal.cancel();
        }
    });

    let coordinator = Coordinator::new(
        engine,
        IndexLister::new(config.sources.clone()),
        &shard_dir,
        config.shard_size,
    )
    .with_cancellation(cancel);

    let run = coordinator
        .run(&args.sources, usize::from(args.concurrency), args.max_items)
        .await?;

    write_dataset(&run.dataset, &args.output_dir).await?;
    report::write_failed_urls(&run.failed_urls, &args.output_dir.join(FAILED_URLS_FILE)).await?;

    info!(
        records = run.dataset.len(),
        elapsed_s = start_time.elapsed().as_secs_f64(),
        "scent_harvest completed successfully"
    );
    Ok(())
}

async fn write_dataset(dataset: &AggregateDataset, output_dir: &Path) -> Result<(), Box<dyn Error>> {
    table::write_csv(dataset, &output_dir.join(CSV_FILE)).await?;
    json::write_dataset(dataset, &output_dir.join(JSON_FILE)).await?;
    Ok(())
}
