//! Run orchestration: list, fetch, extract, persist, condense.
//!
//! A run lists every requested source first, then feeds all fragrance URLs
//! through one bounded pool of fetches (`buffer_unordered`). URLs from
//! different sources are interleaved so each source's rate limit is used in
//! parallel. Results are consumed on the coordinating task, which is the
//! only writer to the [`ShardWriter`]; a source's batch is closed as soon as
//! its last URL completes.
//!
//! Failures stay local: a source that can't be listed is skipped, a page
//! that can't be fetched lands in the failed-URL set, and a page that can't
//! be parsed is logged and dropped.
//!
//! Cancelling the run's [`CancellationToken`] stops dispatch immediately and
//! abandons in-flight fetches at their next suspension point. Whatever was
//! extracted before that is still persisted and condensed.

use crate::error::RunError;
use crate::models::{FetchOutcome, FetchTask, Source};
use crate::net::{FetchEngine, Transport};
use crate::outputs::shards::list_shards;
use crate::outputs::{AggregateDataset, ShardWriter, condense};
use crate::scrapers::{SourceExtractor, UrlLister};
use futures::{StreamExt, future, stream};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Completions between progress lines.
const PROGRESS_EVERY: usize = 25;

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub listed: usize,
    pub fetched: usize,
    pub extracted: usize,
    pub extraction_failures: usize,
    pub fetch_failures: usize,
    pub abandoned: usize,
    pub undispatched: usize,
    pub failed_sources: Vec<Source>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct RunReport {
    pub dataset: AggregateDataset,
    /// Sorted, each URL once.
    pub failed_urls: Vec<String>,
    /// Shards written by this run.
    pub shard_paths: Vec<PathBuf>,
    pub stats: RunStats,
}

pub struct Coordinator<T, L> {
    engine: FetchEngine<T>,
    lister: L,
    shard_dir: PathBuf,
    shard_size: usize,
    cancel: CancellationToken,
}

impl<T: Transport, L: UrlLister> Coordinator<T, L> {
    pub fn new(engine: FetchEngine<T>, lister: L, shard_dir: impl Into<PathBuf>, shard_size: usize) -> Self {
        Self {
            engine,
            lister,
            shard_dir: shard_dir.into(),
            shard_size,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn engine(&self) -> &FetchEngine<T> {
        &self.engine
    }

    #[instrument(level = "info", skip(self))]
    pub async fn run(
        &self,
        sources: &[Source],
        concurrency: usize,
        max_items: Option<usize>,
    ) -> Result<RunReport, RunError> {
        let t0 = Instant::now();
        let mut stats = RunStats::default();
        let mut writer = ShardWriter::create(&self.shard_dir, self.shard_size)
            .await
            .map_err(RunError::ShardDir)?;

        // ---- Listing ----
        let mut listed = Vec::new();
        for &source in sources {
            if self.cancel.is_cancelled() {
                warn!(%source, "Run cancelled before listing");
                break;
            }
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(%source, "Run cancelled while listing");
                    break;
                }
                result = self.lister.list_urls(source, &self.engine) => result,
            };
            match result {
                Ok(mut urls) => {
                    if let Some(max) = max_items {
                        urls.truncate(max);
                    }
                    info!(%source, count = urls.len(), "Listed source");
                    listed.push((source, urls));
                }
                Err(e) => {
                    error!(%source, error = %e, "Listing failed; skipping source");
                    stats.failed_sources.push(source);
                }
            }
        }

        let mut remaining: HashMap<Source, usize> = listed.iter().map(|(s, urls)| (*s, urls.len())).collect();
        let tasks = round_robin(listed);
        stats.listed = tasks.len();
        info!(tasks = stats.listed, concurrency, "Dispatching fetches");

        // ---- Fetch + extract ----
        let cancel = &self.cancel;
        let engine = &self.engine;
        let mut results = stream::iter(tasks)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|(source, url)| async move {
                let mut task = FetchTask::new(source, url.clone());
                let (outcome, abandoned) = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        engine.failed_urls().record(&url);
                        (FetchOutcome::PermanentFailure { cause: "cancelled".into() }, true)
                    }
                    outcome = engine.fetch(&mut task) => (outcome, false),
                };
                (source, url, outcome, abandoned)
            })
            .buffer_unordered(concurrency.max(1));

        let mut completed = 0usize;
        while let Some((source, url, outcome, abandoned)) = results.next().await {
            completed += 1;
            match outcome {
                FetchOutcome::Success { payload, .. } => {
                    stats.fetched += 1;
                    match SourceExtractor::for_source(source).extract(&url, &payload) {
                        Ok(record) => {
                            stats.extracted += 1;
                            writer.append(source, record).await;
                        }
                        Err(e) => {
                            stats.extraction_failures += 1;
                            warn!(%url, error = %e, "Extraction failed; skipping page");
                        }
                    }
                }
                _ if abandoned => {
                    stats.abandoned += 1;
                    warn!(%url, "In-flight fetch abandoned");
                }
                FetchOutcome::PermanentFailure { .. } => stats.fetch_failures += 1,
                other => {
                    // The engine folds retries; anything else is a bug upstream.
                    error!(%url, outcome = ?other, "Unexpected non-terminal outcome");
                    engine.failed_urls().record(&url);
                    stats.fetch_failures += 1;
                }
            }

            if let Some(left) = remaining.get_mut(&source) {
                *left -= 1;
                if *left == 0 {
                    writer.close(source).await;
                }
            }
            if completed % PROGRESS_EVERY == 0 {
                let elapsed = t0.elapsed();
                info!(
                    completed,
                    listed = stats.listed,
                    extracted = stats.extracted,
                    elapsed_s = elapsed.as_secs(),
                    remaining_s = estimate_remaining(elapsed, completed, stats.listed).map(|d| d.as_secs()),
                    "Progress"
                );
            }
        }
        drop(results);

        stats.undispatched = stats.listed - completed;
        if stats.undispatched > 0 {
            warn!(undispatched = stats.undispatched, "Run cancelled; tasks never dispatched");
        }

        // ---- Persist + condense ----
        let shard_paths = writer.finish().await?;
        let all_shards = match list_shards(&self.shard_dir).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "Could not list shard directory; condensing this run's shards only");
                shard_paths.clone()
            }
        };
        let dataset = condense(&all_shards).await;

        stats.elapsed = t0.elapsed();
        let report = RunReport {
            dataset,
            failed_urls: self.engine.failed_urls().snapshot(),
            shard_paths,
            stats,
        };
        log_summary(&report);
        Ok(report)
    }
}

/// Time left if the remaining tasks go at the average pace so far.
fn estimate_remaining(elapsed: Duration, completed: usize, total: usize) -> Option<Duration> {
    if completed == 0 {
        return None;
    }
    let left = total.saturating_sub(completed) as u32;
    Some(elapsed / completed as u32 * left)
}

/// Take one URL from each source in turn until all are used up.
fn round_robin(listed: Vec<(Source, Vec<String>)>) -> Vec<(Source, String)> {
    let mut queues: Vec<_> = listed
        .into_iter()
        .map(|(source, urls)| urls.into_iter().map(move |u| (source, u)))
        .collect();
    let mut out = Vec::new();
    loop {
        let before = out.len();
        for queue in queues.iter_mut() {
            out.extend(queue.next());
        }
        if out.len() == before {
            return out;
        }
    }
}

pub fn log_summary(report: &RunReport) {
    let stats = &report.stats;
    let (first_year, last_year) = report.dataset.year_range().unzip();
    info!(
        records = report.dataset.len(),
        unique_brands = report.dataset.unique_brands(),
        first_year,
        last_year,
        failed_urls = report.failed_urls.len(),
        extraction_failures = stats.extraction_failures,
        abandoned = stats.abandoned,
        undispatched = stats.undispatched,
        shards = report.shard_paths.len(),
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "Run complete"
    );
    for source in &stats.failed_sources {
        warn!(%source, "Source produced no data (listing failed)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimit;
    use crate::error::{ListingError, TransportError};
    use crate::net::testing::ScriptedTransport;
    use crate::net::{ProxyRotator, RateLimiter, RawResponse, RetryPolicy};
    use tempfile::TempDir;

    /// Hands back fixed URL lists; a missing source fails to list.
    struct StaticLister(HashMap<Source, Vec<String>>);

    impl UrlLister for StaticLister {
        async fn list_urls<X: Transport>(
            &self,
            source: Source,
            _engine: &FetchEngine<X>,
        ) -> Result<Vec<String>, ListingError> {
            self.0.get(&source).cloned().ok_or_else(|| ListingError::IndexUnavailable {
                url: format!("https://{source}.example/"),
                cause: "HTTP 503".into(),
            })
        }
    }

    /// Cancels the run as soon as a given URL is requested.
    struct CancelOn {
        inner: ScriptedTransport,
        url: String,
        token: CancellationToken,
    }

    impl Transport for CancelOn {
        async fn get(&self, url: &str, proxy: Option<&str>) -> Result<RawResponse, TransportError> {
            if url == self.url {
                self.token.cancel();
            }
            self.inner.get(url, proxy).await
        }
    }

    fn page(brand: &str, name: &str) -> String {
        format!(r#"<h1 itemprop="name">{name}</h1><p itemprop="brand"><span itemprop="name">{brand}</span></p>"#)
    }

    fn urls(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{prefix}/perfume/{i}.html")).collect()
    }

    fn engine<X: Transport>(transport: X, limits: HashMap<Source, RateLimit>) -> FetchEngine<X> {
        FetchEngine::new(
            transport,
            RateLimiter::new(limits),
            ProxyRotator::default(),
            RetryPolicy {
                base_delay: Duration::from_millis(100),
                ..RetryPolicy::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_urls_under_a_rate_limit() {
        let tmp = TempDir::new().unwrap();
        let list = urls("https://www.fragrantica.com", 5);
        let mut transport = ScriptedTransport::new().with_latency(Duration::from_millis(200));
        for (i, url) in list.iter().enumerate() {
            transport = transport.page(url, &page("Brand", &format!("Scent {i}")));
        }
        let limits = HashMap::from([(Source::Fragrantica, RateLimit::per_minute(10))]);
        let coordinator = Coordinator::new(
            engine(transport, limits),
            StaticLister(HashMap::from([(Source::Fragrantica, list.clone())])),
            tmp.path(),
            25,
        );

        let report = coordinator.run(&[Source::Fragrantica], 2, None).await.unwrap();

        assert_eq!(report.dataset.len(), 5);
        assert_eq!(report.stats.extracted, 5);
        assert!(report.failed_urls.is_empty());
        assert_eq!(report.shard_paths.len(), 1);

        let calls = coordinator.engine().transport().calls();
        assert_eq!(calls.len(), 5);
        for call in &calls {
            let in_window = calls
                .iter()
                .filter(|c| c.at >= call.at && c.at < call.at + Duration::from_secs(60))
                .count();
            assert!(in_window <= 10);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_listing_does_not_stop_other_sources() {
        let tmp = TempDir::new().unwrap();
        let frag = urls("https://www.fragrantica.com", 2);
        let parf = urls("https://www.parfumo.com", 1);
        let transport = ScriptedTransport::new()
            .page(&frag[0], &page("Dior", "Sauvage"))
            .page(&frag[1], &page("Creed", "Aventus"))
            .page(&parf[0], r#"<h1 itemprop="name">Bleu</h1><b itemprop="brand"><i itemprop="name">Chanel</i></b>"#);
        let coordinator = Coordinator::new(
            engine(transport, HashMap::new()),
            StaticLister(HashMap::from([(Source::Fragrantica, frag), (Source::Parfumo, parf)])),
            tmp.path(),
            25,
        );

        let report = coordinator
            .run(&[Source::Fragrantica, Source::Basenotes, Source::Parfumo], 4, None)
            .await
            .unwrap();

        assert_eq!(report.stats.failed_sources, vec![Source::Basenotes]);
        assert_eq!(report.dataset.len(), 3);
        assert_eq!(report.shard_paths.len(), 2);
        assert_eq!(report.dataset.unique_brands(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_url_is_reported_and_absent_from_dataset() {
        let tmp = TempDir::new().unwrap();
        let list = urls("https://www.fragrantica.com", 2);
        let refused = || Err(TransportError::Connect("connection refused".into()));
        let transport = ScriptedTransport::new()
            .page(&list[0], &page("Dior", "Sauvage"))
            .script(&list[1], vec![refused(), refused(), refused(), refused()]);
        let coordinator = Coordinator::new(
            engine(transport, HashMap::new()),
            StaticLister(HashMap::from([(Source::Fragrantica, list.clone())])),
            tmp.path(),
            25,
        );

        let report = coordinator.run(&[Source::Fragrantica], 2, None).await.unwrap();

        assert_eq!(report.failed_urls, vec![list[1].clone()]);
        assert_eq!(report.stats.fetch_failures, 1);
        assert_eq!(coordinator.engine().transport().calls_to(&list[1]), 3);
        assert!(report.dataset.contains_url(&list[0]));
        assert!(!report.dataset.contains_url(&list[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_page_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let list = urls("https://www.fragrantica.com", 2);
        let transport = ScriptedTransport::new()
            .page(&list[0], &page("Dior", "Sauvage"))
            .page(&list[1], "<html><body>Access denied</body></html>");
        let coordinator = Coordinator::new(
            engine(transport, HashMap::new()),
            StaticLister(HashMap::from([(Source::Fragrantica, list)])),
            tmp.path(),
            25,
        );

        let report = coordinator.run(&[Source::Fragrantica], 2, None).await.unwrap();

        assert_eq!(report.stats.fetched, 2);
        assert_eq!(report.stats.extraction_failures, 1);
        assert_eq!(report.dataset.len(), 1);
        assert!(report.failed_urls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_items_truncates_each_source() {
        let tmp = TempDir::new().unwrap();
        let list = urls("https://www.fragrantica.com", 5);
        let coordinator = Coordinator::new(
            engine(ScriptedTransport::new(), HashMap::new()),
            StaticLister(HashMap::from([(Source::Fragrantica, list)])),
            tmp.path(),
            25,
        );

        let report = coordinator.run(&[Source::Fragrantica], 4, Some(2)).await.unwrap();
        assert_eq!(report.stats.listed, 2);
        assert_eq!(coordinator.engine().transport().calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_in_flight_and_skips_the_rest() {
        let tmp = TempDir::new().unwrap();
        let list = urls("https://www.fragrantica.com", 3);
        let token = CancellationToken::new();
        let transport = CancelOn {
            inner: ScriptedTransport::new()
                .with_latency(Duration::from_secs(10))
                .page(&list[0], &page("Dior", "Sauvage")),
            url: list[1].clone(),
            token: token.clone(),
        };
        let coordinator = Coordinator::new(
            engine(transport, HashMap::new()),
            StaticLister(HashMap::from([(Source::Fragrantica, list.clone())])),
            tmp.path(),
            25,
        )
        .with_cancellation(token);

        let report = coordinator.run(&[Source::Fragrantica], 1, None).await.unwrap();

        assert_eq!(report.stats.extracted, 1);
        assert_eq!(report.stats.abandoned, 1);
        assert_eq!(report.stats.undispatched, 1);
        assert_eq!(report.failed_urls, vec![list[1].clone()]);
        assert_eq!(report.dataset.len(), 1);
        // The completed record was still persisted.
        assert_eq!(report.shard_paths.len(), 1);
    }

    #[tokio::test]
    async fn test_condense_includes_shards_from_earlier_runs() {
        let tmp = TempDir::new().unwrap();
        let first = urls("https://www.fragrantica.com/a", 1);
        let second = urls("https://www.fragrantica.com/b", 1);
        let transport = || {
            ScriptedTransport::new()
                .page(&first[0], &page("Dior", "Sauvage"))
                .page(&second[0], &page("Creed", "Aventus"))
        };

        Coordinator::new(
            engine(transport(), HashMap::new()),
            StaticLister(HashMap::from([(Source::Fragrantica, first.clone())])),
            tmp.path(),
            25,
        )
        .run(&[Source::Fragrantica], 1, None)
        .await
        .unwrap();

        let report = Coordinator::new(
            engine(transport(), HashMap::new()),
            StaticLister(HashMap::from([(Source::Fragrantica, second.clone())])),
            tmp.path(),
            25,
        )
        .run(&[Source::Fragrantica], 1, None)
        .await
        .unwrap();

        assert_eq!(report.shard_paths.len(), 1);
        assert_eq!(report.dataset.len(), 2);
    }

    #[test]
    fn test_estimate_remaining_uses_average_pace() {
        assert_eq!(estimate_remaining(Duration::from_secs(50), 0, 100), None);
        assert_eq!(
            estimate_remaining(Duration::from_secs(50), 25, 100),
            Some(Duration::from_secs(150))
        );
        assert_eq!(
            estimate_remaining(Duration::from_secs(50), 100, 100),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_round_robin_interleaves_sources() {
        let order = round_robin(vec![
            (Source::Fragrantica, vec!["f1".into(), "f2".into(), "f3".into()]),
            (Source::Basenotes, vec!["b1".into()]),
        ]);
        let urls: Vec<_> = order.iter().map(|(_, u)| u.as_str()).collect();
        assert_eq!(urls, vec!["f1", "b1", "f2", "f3"]);
    }
}
