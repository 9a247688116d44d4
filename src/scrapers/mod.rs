//! News source adapters.
//!
//! Each adapter knows how to search one site for a query and how to turn one
//! of its article pages into an [`Article`]. Adding a site means adding a
//! module here and a variant to [`Source`].
//!
//! # Supported Sources
//!
//! | Source | Module | Fetch mode | Timestamp |
//! |--------|--------|------------|-----------|
//! | CNN Brasil | [`cnn`] | HTTP | site-local text, best-effort parse |
//! | G1 | [`g1`] | HTTP | ISO-8601 UTC, converted to the reference offset |
//! | Investing.com Brasil | [`investing`] | headless browser | site-local text, best-effort parse |
//!
//! # Failure handling
//!
//! Listing never fails for ordinary reasons: a bad status, missing markup or
//! zero results all yield an empty list. Extraction returns `None` whenever a
//! required field is missing or the article falls outside the configured date
//! range. Only a fatal fetch error (lost browser session) escapes.

pub mod cnn;
pub mod g1;
pub mod investing;

use crate::config::{DateRange, RunConfig, SourceKind};
use crate::error::FetchError;
use crate::fetcher::{FetchRequest, Page, PageFetcher};
use crate::models::{Article, ArticleRef, PublishedAt, Query};
use crate::utils::normalize_whitespace;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use itertools::Itertools;
use scraper::{ElementRef, Node, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use cnn::CnnBrasil;
pub use g1::G1;
pub use investing::Investing;

/// Site-specific search and extraction.
pub trait SourceAdapter {
    /// Short name used in logs and output.
    fn name(&self) -> &'static str;

    /// Request for the search-results page of `query`.
    fn search_request(&self, query: &Query) -> FetchRequest;

    /// Article URLs found on a search-results page, in page order.
    fn parse_listing(&self, page: &Page) -> Vec<String>;

    /// Request for one article page.
    fn article_request(&self, url: &str) -> FetchRequest {
        FetchRequest::http(url)
    }

    /// Structured content of an article page, or `None` if a required field
    /// is missing or the article is outside the configured date range.
    fn extract_article(&self, page: &Page) -> Option<Article>;

    /// Search `query` and return de-duplicated candidate articles.
    ///
    /// Soft failures are logged and produce an empty list; only fatal fetch
    /// errors are returned.
    async fn list_urls<F: PageFetcher>(
        &self,
        fetcher: &F,
        query: &Query,
    ) -> Result<Vec<ArticleRef>, FetchError> {
        let request = self.search_request(query);
        let page = match fetcher.fetch(&request).await {
            Ok(page) => page,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    source = self.name(),
                    %query,
                    error = %e,
                    "Search request failed; skipping query for this source"
                );
                return Ok(Vec::new());
            }
        };

        let refs: Vec<ArticleRef> = self
            .parse_listing(&page)
            .into_iter()
            .unique()
            .map(|source_url| ArticleRef {
                source_url,
                query: query.clone(),
            })
            .collect();

        if refs.is_empty() {
            info!(source = self.name(), %query, "No results found");
        } else {
            info!(source = self.name(), %query, count = refs.len(), "Listed article URLs");
            debug!(urls = ?refs.iter().map(|r| &r.source_url).collect::<Vec<_>>(), "Listed URLs");
        }
        Ok(refs)
    }
}

/// Every configured adapter, dispatched statically.
#[derive(Debug, Clone)]
pub enum Source {
    Cnn(CnnBrasil),
    G1(G1),
    Investing(Investing),
}

impl Source {
    /// Build the adapter for `kind` with its date range and the run's
    /// reference offset.
    pub fn from_config(kind: SourceKind, config: &RunConfig) -> Self {
        let range = config.date_ranges.for_source(kind);
        let offset = config.reference_offset();
        match kind {
            SourceKind::Cnn => Source::Cnn(CnnBrasil::new(range, offset)),
            SourceKind::G1 => Source::G1(G1::new(range, offset)),
            SourceKind::Investing => {
                let timeout = config
                    .fetch
                    .browser
                    .as_ref()
                    .map(|b| Duration::from_secs(b.wait_timeout_secs))
                    .unwrap_or(Duration::from_secs(10));
                Source::Investing(Investing::new(range, offset, timeout))
            }
        }
    }
}

impl SourceAdapter for Source {
    fn name(&self) -> &'static str {
        match self {
            Source::Cnn(s) => s.name(),
            Source::G1(s) => s.name(),
            Source::Investing(s) => s.name(),
        }
    }

    fn search_request(&self, query: &Query) -> FetchRequest {
        match self {
            Source::Cnn(s) => s.search_request(query),
            Source::G1(s) => s.search_request(query),
            Source::Investing(s) => s.search_request(query),
        }
    }

    fn parse_listing(&self, page: &Page) -> Vec<String> {
        match self {
            Source::Cnn(s) => s.parse_listing(page),
            Source::G1(s) => s.parse_listing(page),
            Source::Investing(s) => s.parse_listing(page),
        }
    }

    fn article_request(&self, url: &str) -> FetchRequest {
        match self {
            Source::Cnn(s) => s.article_request(url),
            Source::G1(s) => s.article_request(url),
            Source::Investing(s) => s.article_request(url),
        }
    }

    #[instrument(level = "debug", skip_all, fields(source = self.name(), url = %page.url))]
    fn extract_article(&self, page: &Page) -> Option<Article> {
        match self {
            Source::Cnn(s) => s.extract_article(page),
            Source::G1(s) => s.extract_article(page),
            Source::Investing(s) => s.extract_article(page),
        }
    }
}

/// Text of `element` with inline links padded by spaces and whitespace
/// collapsed.
///
/// Without the padding, link text glues to its neighbours
/// (`"segundo<a>relatório</a>da"` would read `"segundorelatórioda"`).
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(element, &mut out);
    normalize_whitespace(&out)
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                match el.name() {
                    "script" | "style" | "noscript" => {}
                    "br" => out.push(' '),
                    "a" | "p" | "div" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        out.push(' ');
                        push_text(child_el, out);
                        out.push(' ');
                    }
                    _ => push_text(child_el, out),
                }
            }
            _ => {}
        }
    }
}

/// Non-empty paragraph texts joined with newlines.
pub(crate) fn join_paragraphs<'a>(paragraphs: impl IntoIterator<Item = ElementRef<'a>>) -> String {
    paragraphs
        .into_iter()
        .map(element_text)
        .filter(|p| !p.is_empty())
        .join("\n")
}

/// Normalized text of the first match of `selector` under `scope`, if non-empty.
pub(crate) fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Resolve a possibly relative `href` against `base`.
pub(crate) fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

/// Parse an ISO-8601 timestamp, dropping fractional seconds, and convert it
/// to `offset`. A timestamp without a zone is taken as UTC.
pub(crate) fn parse_iso_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let raw = strip_fractional_seconds(raw.trim());
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&offset));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc().with_timezone(&offset))
}

fn strip_fractional_seconds(raw: &str) -> String {
    match raw.find('.') {
        Some(dot) => {
            let rest = &raw[dot + 1..];
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            format!("{}{}", &raw[..dot], &rest[digits..])
        }
        None => raw.to_string(),
    }
}

/// Parse a site-local timestamp with the first matching format, interpreting
/// it in `offset`.
pub(crate) fn parse_local_timestamp(
    raw: &str,
    formats: &[&str],
    offset: FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    formats.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .and_then(|naive| offset.from_local_datetime(&naive).single())
    })
}

/// Whether an article passes the optional date filter. Raw timestamps can't
/// be compared and always pass.
pub(crate) fn within_range(
    published: &PublishedAt,
    range: Option<DateRange>,
    offset: FixedOffset,
) -> bool {
    match (range, published.as_zoned()) {
        (Some(range), Some(instant)) => range.contains(instant, offset),
        _ => true,
    }
}
