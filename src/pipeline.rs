//! Run orchestration.
//!
//! For each query, in order, and each configured source, in order: list the
//! candidate URLs, fetch and extract every article, enrich it, and append a
//! row to the query's table.
//!
//! # Error containment
//!
//! | Failure | Effect |
//! |---------|--------|
//! | listing fails softly | source contributes nothing for that query |
//! | article fetch fails softly | URL skipped |
//! | extraction returns nothing | URL skipped |
//! | enrichment error or panic | URL skipped |
//! | browser session lost | run stops; partial table is still returned |
//!
//! Cancellation is cooperative: once the [`CancelToken`] is set, no new
//! query, source or URL is started and the partial table is returned.

use crate::aggregate::{Aggregator, ResultTable};
use crate::enrichment::sentiment::SentimentClassifier;
use crate::enrichment::{Enricher, Summarizer};
use crate::error::{FetchError, PipelineError};
use crate::fetcher::PageFetcher;
use crate::models::{ArticleRef, EnrichedArticle, Query};
use crate::scrapers::{Source, SourceAdapter};
use futures::{FutureExt, StreamExt, future, stream};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Shared stop flag, set from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub queries: usize,
    /// Candidate URLs returned by listings.
    pub listed: usize,
    pub fetch_failures: usize,
    /// Pages that yielded no article: missing fields or outside the date range.
    pub parse_failures: usize,
    pub enriched: usize,
    /// Articles dropped during enrichment, including panics.
    pub skipped: usize,
}

/// Everything a run produced, complete or not.
#[derive(Debug)]
pub struct RunReport {
    pub table: ResultTable,
    pub stats: RunStats,
    pub cancelled: bool,
    /// Set when the run was aborted by a fatal error.
    pub error: Option<PipelineError>,
}

enum Outcome {
    Enriched(EnrichedArticle),
    FetchFailed,
    NoArticle,
    EnrichFailed,
    Fatal(FetchError),
}

pub struct Pipeline<F, S, C> {
    fetcher: F,
    sources: Vec<Source>,
    enricher: Enricher<S, C>,
    cancel: CancelToken,
    concurrency: usize,
}

impl<F, S, C> Pipeline<F, S, C>
where
    F: PageFetcher,
    S: Summarizer,
    C: SentimentClassifier,
{
    pub fn new(
        fetcher: F,
        sources: Vec<Source>,
        enricher: Enricher<S, C>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            fetcher,
            sources,
            enricher,
            cancel,
            concurrency: 1,
        }
    }

    /// Process up to `n` articles of the same listing at once. Row order still
    /// follows listing order.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Hand the fetcher back so its resources can be released.
    pub fn into_fetcher(self) -> F {
        self.fetcher
    }

    #[instrument(
        level = "info",
        skip_all,
        fields(
            queries = queries.len(),
            sources = self.sources.len(),
            summarize = self.enricher.summarizes()
        )
    )]
    pub async fn run(&self, queries: &[Query]) -> RunReport {
        let t0 = Instant::now();
        let mut aggregator = Aggregator::new();
        let mut stats = RunStats::default();
        let mut fatal = None;

        // Every configured query gets a table, even one never started.
        for query in queries {
            aggregator.begin_query(query);
        }

        'queries: for query in queries {
            if self.cancel.is_cancelled() {
                break;
            }
            info!(%query, "Processing query");
            stats.queries += 1;

            for source in &self.sources {
                if self.cancel.is_cancelled() {
                    break 'queries;
                }
                let refs = match source.list_urls(&self.fetcher, query).await {
                    Ok(refs) => refs,
                    Err(e) => {
                        error!(
                            source = source.name(),
                            %query,
                            error = %e,
                            "Fatal error while listing"
                        );
                        fatal = Some(e);
                        break 'queries;
                    }
                };
                stats.listed += refs.len();

                let mut outcomes = stream::iter(refs.iter())
                    .take_while(|_| future::ready(!self.cancel.is_cancelled()))
                    .map(|r| self.process_guarded(source, r))
                    .buffered(self.concurrency);

                while let Some(outcome) = outcomes.next().await {
                    match outcome {
                        Outcome::Enriched(item) => {
                            aggregator.push(query, &item);
                            stats.enriched += 1;
                        }
                        Outcome::FetchFailed => stats.fetch_failures += 1,
                        Outcome::NoArticle => stats.parse_failures += 1,
                        Outcome::EnrichFailed => stats.skipped += 1,
                        Outcome::Fatal(e) => {
                            fatal = Some(e);
                            break 'queries;
                        }
                    }
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!("Run cancelled; returning partial results");
        }
        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            queries = stats.queries,
            listed = stats.listed,
            enriched = stats.enriched,
            fetch_failures = stats.fetch_failures,
            parse_failures = stats.parse_failures,
            skipped = stats.skipped,
            "Run finished"
        );

        RunReport {
            table: aggregator.finish(),
            stats,
            cancelled,
            error: fatal.map(PipelineError::Fatal),
        }
    }

    /// [`Self::process`] with panics contained to the one article.
    async fn process_guarded(&self, source: &Source, r: &ArticleRef) -> Outcome {
        match AssertUnwindSafe(self.process(source, r)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    url = %r.source_url,
                    panic = %panic_message(&*panic),
                    "Article processing panicked; skipping"
                );
                Outcome::EnrichFailed
            }
        }
    }

    #[instrument(
        level = "debug",
        skip_all,
        fields(source = source.name(), query = %r.query, url = %r.source_url)
    )]
    async fn process(&self, source: &Source, r: &ArticleRef) -> Outcome {
        let request = source.article_request(&r.source_url);
        let page = match self.fetcher.fetch(&request).await {
            Ok(page) => page,
            Err(e) if e.is_fatal() => {
                error!(url = %r.source_url, error = %e, "Fatal fetch error");
                return Outcome::Fatal(e);
            }
            Err(e) => {
                warn!(url = %r.source_url, error = %e, "Fetch failed; skipping");
                return Outcome::FetchFailed;
            }
        };

        let Some(article) = source.extract_article(&page) else {
            return Outcome::NoArticle;
        };

        match self.enricher.enrich(article, source.name()).await {
            Ok(item) => {
                info!(url = %r.source_url, title = %item.article.title(), "Article enriched");
                Outcome::Enriched(item)
            }
            Err(e) => {
                warn!(url = %r.source_url, error = %e, "Enrichment failed; skipping");
                Outcome::EnrichFailed
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DateRange;
    use crate::error::EnrichError;
    use crate::fetcher::{FetchRequest, Page};
    use crate::models::{SentimentScore, Summary};
    use crate::scrapers::G1;
    use chrono::{FixedOffset, NaiveDate};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const SEARCH_MUSK: &str =
        "https://g1.globo.com/busca/?q=ELON%20MUSK&ps=on&order=recent&species=not%C3%ADcias";
    const SEARCH_LULA: &str =
        "https://g1.globo.com/busca/?q=LULA&ps=on&order=recent&species=not%C3%ADcias";

    /// Serves canned pages; unknown URLs get a 404.
    #[derive(Default)]
    struct MockFetcher {
        pages: HashMap<String, String>,
        lost_session_at: Option<String>,
        requests: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        fn page(mut self, url: &str, html: impl Into<String>) -> Self {
            self.pages.insert(url.to_string(), html.into());
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl PageFetcher for MockFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Page, FetchError> {
            self.requests.lock().unwrap().push(request.url.clone());
            if self.lost_session_at.as_deref() == Some(request.url.as_str()) {
                return Err(FetchError::SessionLost("invalid session id".into()));
            }
            match self.pages.get(&request.url) {
                Some(html) => Ok(Page::new(&request.url, html.clone())),
                None => Err(FetchError::Status(reqwest::StatusCode::NOT_FOUND)),
            }
        }
    }

    struct NoSummary;

    impl Summarizer for NoSummary {
        async fn summarize(&self, _text: &str) -> Summary {
            unreachable!("summarization is disabled in these tests")
        }
    }

    /// Fixed score; panics on bodies containing `PANIC`, cancels the run on
    /// bodies containing `STOP`.
    #[derive(Default)]
    struct MockClassifier {
        cancel: Option<CancelToken>,
    }

    impl SentimentClassifier for MockClassifier {
        async fn classify(&self, text: &str) -> Result<SentimentScore, EnrichError> {
            if text.contains("PANIC") {
                panic!("classifier exploded");
            }
            if text.contains("FAIL") {
                return Err(EnrichError::Empty);
            }
            if text.contains("STOP") {
                if let Some(cancel) = &self.cancel {
                    cancel.cancel();
                }
            }
            Ok(SentimentScore::from_probabilities(0.75, 0.10, 0.15).unwrap())
        }
    }

    fn brt() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn listing(urls: &[&str]) -> String {
        let items: String = urls
            .iter()
            .map(|u| {
                format!(
                    r#"<li><div class="widget--info__text-container"><a href="{u}">t</a></div></li>"#
                )
            })
            .collect();
        format!(r#"<html><body><div class="results__content"><ul>{items}</ul></div></body></html>"#)
    }

    fn article(title: &str, datetime: &str, body: &str) -> String {
        format!(
            r#"<html><body><main class="mc-body theme">
                <h1 class="content-head__title" itemprop="headline">{title}</h1>
                <time itemprop="datePublished" datetime="{datetime}"></time>
                <p class="content-text__container">{body}</p>
            </main></body></html>"#
        )
    }

    fn pipeline(
        fetcher: MockFetcher,
        range: Option<DateRange>,
        cancel: CancelToken,
    ) -> Pipeline<MockFetcher, NoSummary, MockClassifier> {
        let classifier = MockClassifier {
            cancel: Some(cancel.clone()),
        };
        Pipeline::new(
            fetcher,
            vec![Source::G1(G1::new(range, brt()))],
            Enricher::new(None, classifier),
            cancel,
        )
    }

    #[tokio::test]
    async fn test_end_to_end_single_article() {
        let fetcher = MockFetcher::default()
            .page(SEARCH_MUSK, listing(&["https://g1.globo.com/x.ghtml"]))
            .page(
                "https://g1.globo.com/x.ghtml",
                article("X", "2024-07-01T10:00:00Z", "Hello world."),
            );
        let report = pipeline(fetcher, None, CancelToken::new())
            .run(&[Query::new("ELON MUSK")])
            .await;

        assert!(report.error.is_none());
        assert!(!report.cancelled);
        let table = report.table.get(&Query::new("ELON MUSK")).unwrap();
        let c = table.columns();
        assert_eq!(c.titles, ["X"]);
        assert_eq!(c.dates, ["01/07/2024 07:00"]);
        assert_eq!(c.urls, ["https://g1.globo.com/x.ghtml"]);
        assert_eq!(c.positive, ["75.0%"]);
        assert_eq!(c.negative, ["10.0%"]);
        assert_eq!(c.neutral, ["15.0%"]);
        assert_eq!(c.summaries, vec![None::<String>]);
        assert_eq!(report.stats.enriched, 1);
    }

    #[tokio::test]
    async fn test_zero_results_give_empty_table() {
        let fetcher = MockFetcher::default()
            .page(SEARCH_MUSK, "<html><body>Nenhum resultado</body></html>");
        let report = pipeline(fetcher, None, CancelToken::new())
            .run(&[Query::new("ELON MUSK")])
            .await;
        assert_eq!(report.table.tables.len(), 1);
        assert!(report.table.tables[0].is_empty());
        assert_eq!(report.stats.listed, 0);
    }

    #[tokio::test]
    async fn test_failures_are_contained_and_rows_stay_aligned() {
        let urls = [
            "https://g1.globo.com/a.ghtml",
            "https://g1.globo.com/missing.ghtml",
            "https://g1.globo.com/panic.ghtml",
            "https://g1.globo.com/b.ghtml",
            "https://g1.globo.com/fail.ghtml",
            "https://g1.globo.com/c.ghtml",
        ];
        let fetcher = MockFetcher::default()
            .page(SEARCH_MUSK, listing(&urls))
            .page(urls[0], article("A", "2024-07-01T10:00:00Z", "Primeiro."))
            .page(urls[2], article("P", "2024-07-01T10:00:00Z", "PANIC"))
            .page(urls[3], article("B", "2024-07-02T10:00:00Z", "Segundo."))
            .page(urls[4], article("F", "2024-07-02T10:00:00Z", "FAIL"))
            .page(urls[5], article("C", "2024-07-03T10:00:00Z", "Terceiro."));

        let report = pipeline(fetcher, None, CancelToken::new())
            .with_concurrency(3)
            .run(&[Query::new("ELON MUSK")])
            .await;

        let c = report.table.tables[0].columns();
        assert_eq!(c.titles, ["A", "B", "C"]);
        assert_eq!(c.urls, [urls[0], urls[3], urls[5]]);
        assert_eq!(c.dates, ["01/07/2024 07:00", "02/07/2024 07:00", "03/07/2024 07:00"]);
        assert_eq!(report.stats.fetch_failures, 1);
        assert_eq!(report.stats.skipped, 2);
        assert_eq!(report.stats.enriched, 3);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_date_filter_excludes_articles() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 9, 23).unwrap(),
        };
        let query = Query::new("ELON MUSK");
        // The range is part of the search URL.
        let search = G1::new(Some(range), brt()).search_request(&query).url;
        assert_ne!(search, SEARCH_MUSK);
        let fetcher = MockFetcher::default()
            .page(&search, listing(&["https://g1.globo.com/x.ghtml"]))
            .page(
                "https://g1.globo.com/x.ghtml",
                article("X", "2024-07-01T10:00:00Z", "Hello world."),
            );

        let p = pipeline(fetcher, Some(range), CancelToken::new());
        let report = p.run(&[query]).await;

        assert!(report.table.tables[0].is_empty());
        assert_eq!(report.stats.listed, 1);
        assert_eq!(report.stats.parse_failures, 1);
        assert!(p.into_fetcher().requested().contains(&"https://g1.globo.com/x.ghtml".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_keeps_a_table_per_query() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let p = pipeline(MockFetcher::default(), None, cancel);
        let report = p.run(&[Query::new("ELON MUSK"), Query::new("LULA")]).await;

        assert!(report.cancelled);
        assert_eq!(report.stats.queries, 0);
        let queries: Vec<_> = report.table.tables.iter().map(|t| t.query.to_string()).collect();
        assert_eq!(queries, ["ELON MUSK", "LULA"]);
        assert!(report.table.tables.iter().all(|t| t.is_empty()));
        assert!(p.into_fetcher().requested().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_url_and_query() {
        let urls = ["https://g1.globo.com/a.ghtml", "https://g1.globo.com/b.ghtml"];
        let fetcher = MockFetcher::default()
            .page(SEARCH_MUSK, listing(&urls))
            .page(urls[0], article("A", "2024-07-01T10:00:00Z", "STOP"))
            .page(urls[1], article("B", "2024-07-01T10:00:00Z", "Segundo."))
            .page(SEARCH_LULA, listing(&[]));

        let p = pipeline(fetcher, None, CancelToken::new());
        let report = p.run(&[Query::new("ELON MUSK"), Query::new("LULA")]).await;

        assert!(report.cancelled);
        assert_eq!(report.table.tables.len(), 2);
        assert_eq!(report.table.tables[0].columns().titles, ["A"]);
        assert!(report.table.get(&Query::new("LULA")).unwrap().is_empty());
        let requested = p.into_fetcher().requested();
        assert!(!requested.contains(&urls[1].to_string()));
        assert!(!requested.contains(&SEARCH_LULA.to_string()));
    }

    #[tokio::test]
    async fn test_session_loss_aborts_with_partial_results() {
        let urls = ["https://g1.globo.com/a.ghtml", "https://g1.globo.com/b.ghtml"];
        let mut fetcher = MockFetcher::default()
            .page(SEARCH_MUSK, listing(&urls))
            .page(urls[0], article("A", "2024-07-01T10:00:00Z", "Primeiro."))
            .page(SEARCH_LULA, listing(&[]));
        fetcher.lost_session_at = Some(urls[1].to_string());

        let p = pipeline(fetcher, None, CancelToken::new());
        let report = p.run(&[Query::new("ELON MUSK"), Query::new("LULA")]).await;

        assert!(matches!(report.error, Some(PipelineError::Fatal(FetchError::SessionLost(_)))));
        assert_eq!(report.table.tables.len(), 2);
        assert!(report.table.get(&Query::new("LULA")).unwrap().is_empty());
        assert_eq!(report.table.tables[0].columns().titles, ["A"]);
        assert!(!p.into_fetcher().requested().contains(&SEARCH_LULA.to_string()));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
    }
}
