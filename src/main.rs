//! # News Sentiment
//!
//! Scrapes Brazilian news sites for articles about public figures, summarizes
//! each article with Google Gemini, scores its sentiment with a Portuguese
//! financial-news classifier, and exports one spreadsheet table per query.
//!
//! ## Usage
//!
//! ```sh
//! news_sentiment -c config.yaml
//! ```
//!
//! ## Architecture
//!
//! 1. **Listing**: each source adapter searches its site for every query
//! 2. **Fetching**: article pages are retrieved over HTTP or a headless browser
//! 3. **Enrichment**: optional summary, then sentiment scoring
//! 4. **Output**: SpreadsheetML workbook, plus JSON when enabled
//!
//! Ctrl-C stops the run after the current article; whatever was collected is
//! still exported.

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregate;
mod cli;
mod config;
mod enrichment;
mod error;
mod fetcher;
mod models;
mod outputs;
mod pipeline;
mod scrapers;
mod utils;

use cli::Cli;
use config::{RunConfig, SourceKind};
use enrichment::Enricher;
use enrichment::sentiment::HttpSentimentClassifier;
use enrichment::summarizer::GeminiSummarizer;
use fetcher::SiteFetcher;
use fetcher::browser::BrowserSession;
use fetcher::http::HttpFetcher;
use fetcher::throttle::Throttle;
use outputs::{json, spreadsheet};
use pipeline::{CancelToken, Pipeline};
use scrapers::Source;
use utils::ensure_writable_dir;

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
    info!("news_sentiment starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = RunConfig::load(&args.config)?.with_overrides(
        args.queries,
        args.sources,
        args.output_dir,
        args.no_summary,
    )?;
    let queries = config.query_list();

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&config.output.dir).await {
        error!(
            path = %config.output.dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Enrichment services ----
    let throttle = Arc::new(Throttle::new(Duration::from_millis(config.enrichment.delay_ms)));
    let summarizer = match &config.enrichment.summarizer {
        Some(summarizer_config) => {
            let credentials = summarizer_config.resolve_credentials(|var| std::env::var(var).ok())?;
            info!(
                credentials = credentials.len(),
                fallback_on_error = summarizer_config.fallback_on_error,
                delay_ms = config.enrichment.delay_ms,
                "Summarization enabled"
            );
            Some(GeminiSummarizer::gemini(summarizer_config, credentials, Arc::clone(&throttle))?)
        }
        None => {
            info!("Summarization disabled");
            None
        }
    };
    let classifier = HttpSentimentClassifier::new(&config.enrichment.sentiment)?;
    let enricher = Enricher::new(summarizer, classifier);

    // ---- Fetcher; the browser only when a source needs it ----
    let sources: Vec<Source> = config
        .sources
        .iter()
        .map(|kind| Source::from_config(*kind, &config))
        .collect();
    let http = HttpFetcher::new(
        &config.fetch.user_agent,
        Duration::from_secs(config.fetch.request_timeout_secs),
    )?;
    let browser = if config.sources.contains(&SourceKind::Investing) {
        let browser_config = config.fetch.browser.clone().unwrap_or_default();
        Some(BrowserSession::start(&browser_config).await?)
    } else {
        None
    };
    let fetcher = SiteFetcher::new(
        http,
        browser,
        Duration::from_millis(config.fetch.politeness_delay_ms),
    );

    // ---- Cancellation ----
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current article");
                cancel.cancel();
            }
        });
    }

    // ---- Run ----
    let pipeline = Pipeline::new(fetcher, sources, enricher, cancel)
        .with_concurrency(config.fetch.article_concurrency);
    let report = pipeline.run(&queries).await;
    pipeline.into_fetcher().shutdown().await;

    // ---- Output (also after a fatal error or cancellation) ----
    let workbook_path = Path::new(&config.output.dir).join(&config.output.file_name);
    if let Err(e) = spreadsheet::write_workbook(&report.table, &workbook_path).await {
        error!(path = %workbook_path.display(), error = %e, "Failed to write workbook");
        return Err(e.into());
    }
    if config.output.json {
        let json_path = json::json_path_for(&workbook_path);
        if let Err(e) = json::write_table(&report.table, &json_path).await {
            error!(path = %json_path.display(), error = %e, "Failed to write JSON");
        }
    }

    for table in report.table.tables.iter().filter(|t| t.is_empty()) {
        warn!(query = %table.query, "No articles collected for query");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        rows = report.table.total_rows(),
        cancelled = report.cancelled,
        stats = ?report.stats,
        path = %workbook_path.display(),
        "Execution complete"
    );

    if let Some(e) = report.error {
        error!(error = %e, "Run aborted; partial results were written");
        return Err(e.into());
    }
    Ok(())
}
