//! CNN Brasil article scraper.
//!
//! This module scrapes articles from [CNN Brasil](https://www.cnnbrasil.com.br)
//! through the site's WordPress search, newest first. Pages are server-rendered,
//! so plain HTTP is enough.
//!
//! # Timestamps
//!
//! The article header shows a local string such as
//! `01/07/2024 às 10:00 | Atualizado 01/07/2024 às 12:30`. The first segment is
//! parsed in the reference offset when possible; otherwise it is kept raw and
//! the date filter does not apply.

use super::{
    SourceAdapter, first_text, join_paragraphs, parse_local_timestamp, resolve_href, within_range,
};
use crate::config::DateRange;
use crate::fetcher::{FetchRequest, Page};
use crate::models::{Article, PublishedAt, Query};
use chrono::FixedOffset;
use once_cell::sync::Lazy;
use scraper::Selector;
use tracing::{debug, warn};
use url::Url;

const BASE_URL: &str = "https://www.cnnbrasil.com.br/";

const LOCAL_FORMATS: [&str; 3] = ["%d/%m/%Y às %H:%M", "%d/%m/%Y %H:%M", "%d/%m/%Y às %Hh%M"];

static RESULT_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.home__list__tag[href]").unwrap());
static MAIN: Lazy<Selector> = Lazy::new(|| Selector::parse("main.posts.col__list").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h1.single-header__title").unwrap());
static TIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time.single-header__time").unwrap());
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());

#[derive(Debug, Clone)]
pub struct CnnBrasil {
    date_range: Option<DateRange>,
    offset: FixedOffset,
}

impl CnnBrasil {
    pub fn new(date_range: Option<DateRange>, offset: FixedOffset) -> Self {
        Self { date_range, offset }
    }

    fn parse_published(&self, raw: &str) -> PublishedAt {
        let first = raw.split('|').next().unwrap_or(raw).trim();
        match parse_local_timestamp(first, &LOCAL_FORMATS, self.offset) {
            Some(dt) => PublishedAt::Zoned(dt),
            None => PublishedAt::Raw(raw.to_string()),
        }
    }
}

/// Search result hrefs sometimes carry a stray leading character before the
/// scheme; drop anything before `http` in that case.
fn clean_result_href(href: &str) -> &str {
    let href = href.trim();
    if href.starts_with("http") || href.starts_with('/') {
        return href;
    }
    match href.find("http") {
        Some(pos) => &href[pos..],
        None => href,
    }
}

impl SourceAdapter for CnnBrasil {
    fn name(&self) -> &'static str {
        "cnn"
    }

    fn search_request(&self, query: &Query) -> FetchRequest {
        FetchRequest::http(format!(
            "{BASE_URL}?s={}&orderby=date&order=desc",
            urlencoding::encode(query.as_str())
        ))
    }

    fn parse_listing(&self, page: &Page) -> Vec<String> {
        let Ok(base) = Url::parse(BASE_URL) else {
            return Vec::new();
        };
        let document = page.document();
        document
            .select(&RESULT_LINK)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve_href(&base, clean_result_href(href)))
            .collect()
    }

    fn extract_article(&self, page: &Page) -> Option<Article> {
        let document = page.document();
        let Some(main) = document.select(&MAIN).next() else {
            warn!(url = %page.url, "Main content container not found");
            return None;
        };
        let Some(title) = first_text(main, &TITLE) else {
            warn!(url = %page.url, "Title not found");
            return None;
        };
        let Some(time_text) = first_text(main, &TIME) else {
            warn!(url = %page.url, "Publication date not found");
            return None;
        };

        let published_at = self.parse_published(&time_text);
        if !within_range(&published_at, self.date_range, self.offset) {
            debug!(url = %page.url, %published_at, "Outside date range");
            return None;
        }

        let body = join_paragraphs(main.select(&PARAGRAPH));
        Article::new(title, published_at, body, page.url.clone())
    }
}
