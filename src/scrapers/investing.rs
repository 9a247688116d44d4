//! Investing.com Brasil news scraper.
//!
//! Both the search results and the article pages are rendered client-side, so
//! every request goes through the headless browser and waits for a marker
//! element before the markup is read.
//!
//! The publication line reads like `Publicado 01.07.2024, 10:00`; the leading
//! label is dropped and the rest parsed in the reference offset. Anything else
//! is kept verbatim.

use super::{
    SourceAdapter, first_text, join_paragraphs, parse_local_timestamp, resolve_href, within_range,
};
use crate::config::DateRange;
use crate::fetcher::{FetchRequest, Page};
use crate::models::{Article, PublishedAt, Query};
use chrono::FixedOffset;
use once_cell::sync::Lazy;
use scraper::Selector;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const BASE_URL: &str = "https://br.investing.com";

const RESULT_MARKER: &str = "a.img";
const ARTICLE_MARKER: &str = "div.article_container";

const LOCAL_FORMATS: [&str; 3] = ["%d.%m.%Y, %H:%M", "%d.%m.%Y %H:%M", "%d/%m/%Y, %H:%M"];

static RESULT_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a.img[href]").unwrap());
static CONTAINER: Lazy<Selector> = Lazy::new(|| Selector::parse(ARTICLE_MARKER).unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h1#articleTitle").unwrap());
static DATE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.mt-2.flex.flex-col.gap-2.text-xs div.flex.flex-row.items-center span").unwrap()
});
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());

#[derive(Debug, Clone)]
pub struct Investing {
    date_range: Option<DateRange>,
    offset: FixedOffset,
    wait_timeout: Duration,
}

impl Investing {
    pub fn new(date_range: Option<DateRange>, offset: FixedOffset, wait_timeout: Duration) -> Self {
        Self {
            date_range,
            offset,
            wait_timeout,
        }
    }

    fn parse_published(&self, raw: &str) -> PublishedAt {
        let stamp = raw.trim_start_matches(|c: char| !c.is_ascii_digit()).trim();
        match parse_local_timestamp(stamp, &LOCAL_FORMATS, self.offset) {
            Some(dt) => PublishedAt::Zoned(dt),
            None => PublishedAt::Raw(raw.to_string()),
        }
    }
}

impl SourceAdapter for Investing {
    fn name(&self) -> &'static str {
        "investing"
    }

    fn search_request(&self, query: &Query) -> FetchRequest {
        FetchRequest::browser(
            format!("{BASE_URL}/search/?q={}&tab=news", urlencoding::encode(query.as_str())),
            RESULT_MARKER,
            self.wait_timeout,
        )
    }

    fn parse_listing(&self, page: &Page) -> Vec<String> {
        let Ok(base) = Url::parse(BASE_URL) else {
            return Vec::new();
        };
        page.document()
            .select(&RESULT_LINK)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve_href(&base, href))
            .collect()
    }

    fn article_request(&self, url: &str) -> FetchRequest {
        FetchRequest::browser(url, ARTICLE_MARKER, self.wait_timeout)
    }

    fn extract_article(&self, page: &Page) -> Option<Article> {
        let document = page.document();
        let Some(container) = document.select(&CONTAINER).next() else {
            warn!(url = %page.url, "Article container not found");
            return None;
        };
        let root = document.root_element();
        let Some(date_text) = first_text(root, &DATE) else {
            warn!(url = %page.url, "Publication date not found");
            return None;
        };
        let Some(title) = first_text(root, &TITLE) else {
            warn!(url = %page.url, "Title not found");
            return None;
        };

        let published_at = self.parse_published(&date_text);
        if !within_range(&published_at, self.date_range, self.offset) {
            debug!(url = %page.url, %published_at, "Outside date range");
            return None;
        }

        let body = join_paragraphs(container.select(&PARAGRAPH));
        Article::new(title, published_at, body, page.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchMode;

    fn investing() -> Investing {
        Investing::new(None, FixedOffset::west_opt(3 * 3600).unwrap(), Duration::from_secs(10))
    }

    const LISTING: &str = r#"
        <html><body><div class="searchSectionMain">
          <a class="img" href="/news/stock-market-news/musk-compra-acoes-123"><img></a>
          <a class="title" href="/news/ignored">Ignorada</a>
          <a class="img" href="https://br.investing.com/news/economy/tesla-456"><img></a>
        </div></body></html>"#;

    const ARTICLE: &str = r#"
        <html><body>
          <div class="mx-0 mt-1"><h1 id="articleTitle">Ações da Tesla sobem</h1></div>
          <div class="mt-2 flex flex-col gap-2 text-xs md:mt-2.5 md:gap-2.5">
            <div class="flex flex-row items-center"><span>Publicado 01.07.2024, 10:00</span></div>
          </div>
          <div class="article_container">
            <p>As ações da <a href="/equities/tesla">Tesla</a>subiram.</p>
            <p>Analistas comentam.</p>
          </div>
        </body></html>"#;

    #[test]
    fn test_requests_use_browser() {
        let inv = investing();
        let req = inv.search_request(&Query::new("ELON MUSK"));
        assert_eq!(req.url, "https://br.investing.com/search/?q=ELON%20MUSK&tab=news");
        assert!(matches!(req.mode, FetchMode::Browser { ref marker, .. } if marker == "a.img"));

        let req = inv.article_request("https://br.investing.com/news/x");
        assert!(matches!(
            req.mode,
            FetchMode::Browser { ref marker, .. } if marker == "div.article_container"
        ));
    }

    #[test]
    fn test_parse_listing_resolves_relative_links() {
        let urls = investing().parse_listing(&Page::new("u", LISTING));
        assert_eq!(
            urls,
            vec![
                "https://br.investing.com/news/stock-market-news/musk-compra-acoes-123",
                "https://br.investing.com/news/economy/tesla-456",
            ]
        );
    }

    #[test]
    fn test_extract_article() {
        let article = investing().extract_article(&Page::new("u", ARTICLE)).unwrap();
        assert_eq!(article.title(), "Ações da Tesla sobem");
        assert_eq!(article.published_at().to_string(), "01/07/2024 10:00");
        assert_eq!(article.body(), "As ações da Tesla subiram.\nAnalistas comentam.");
    }

    #[test]
    fn test_unparseable_date_is_kept_raw() {
        let html = ARTICLE.replace("Publicado 01.07.2024, 10:00", "Há 3 horas");
        let article = investing().extract_article(&Page::new("u", html)).unwrap();
        assert_eq!(article.published_at(), &PublishedAt::Raw("Há 3 horas".into()));
    }

    #[test]
    fn test_missing_fields_yield_none() {
        let no_container = ARTICLE.replace("article_container", "x");
        let no_title = ARTICLE.replace("articleTitle", "x");
        let no_date = ARTICLE.replace("items-center", "x");
        for html in [no_container, no_title, no_date] {
            assert!(investing().extract_article(&Page::new("u", html)).is_none());
        }
    }
}
