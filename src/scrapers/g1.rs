//! G1 (Globo) article scraper.
//!
//! Search goes through `g1.globo.com/busca`, restricted to news and sorted by
//! recency. When a date range is configured it is also passed to the search as
//! `from`/`to`, and each article's `datePublished` is checked again after
//! extraction, since the search filter is only approximate.
//!
//! Result links are tracking redirects (`//g1.globo.com/busca/click?...&u=<target>`);
//! the real article URL is the `u` query parameter.

use super::{
    SourceAdapter, element_text, join_paragraphs, parse_iso_timestamp, resolve_href, within_range,
};
use crate::config::DateRange;
use crate::fetcher::{FetchRequest, Page};
use crate::models::{Article, PublishedAt, Query};
use chrono::FixedOffset;
use once_cell::sync::Lazy;
use scraper::Selector;
use tracing::{debug, warn};
use url::Url;

const SITE_URL: &str = "https://g1.globo.com/";
const SEARCH_URL: &str = "https://g1.globo.com/busca/";

static RESULTS: Lazy<Selector> = Lazy::new(|| Selector::parse("div.results__content").unwrap());
static RESULT_TEXT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.widget--info__text-container").unwrap());
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static MAIN: Lazy<Selector> = Lazy::new(|| Selector::parse("main.mc-body.theme").unwrap());
static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"h1.content-head__title[itemprop="headline"]"#).unwrap());
static PUBLISHED: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"time[itemprop="datePublished"][datetime]"#).unwrap());
static PARAGRAPH: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.content-text__container").unwrap());
static PAYWALL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.wall.protected-content").unwrap());

#[derive(Debug, Clone)]
pub struct G1 {
    date_range: Option<DateRange>,
    offset: FixedOffset,
}

impl G1 {
    pub fn new(date_range: Option<DateRange>, offset: FixedOffset) -> Self {
        Self { date_range, offset }
    }
}

/// Turn a search-result href into the article URL. Relative and
/// scheme-relative hrefs resolve against the site root.
fn article_url(href: &str) -> Option<String> {
    let base = Url::parse(SITE_URL).ok()?;
    let absolute = resolve_href(&base, href)?;
    let url = Url::parse(&absolute).ok()?;
    if url.path().contains("click") {
        return url
            .query_pairs()
            .find(|(k, _)| k == "u")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty());
    }
    Some(absolute)
}

impl SourceAdapter for G1 {
    fn name(&self) -> &'static str {
        "g1"
    }

    fn search_request(&self, query: &Query) -> FetchRequest {
        let mut url = format!(
            "{SEARCH_URL}?q={}&ps=on&order=recent&species=not%C3%ADcias",
            urlencoding::encode(query.as_str())
        );
        if let Some(range) = self.date_range {
            let (from, to) = range.bounds(self.offset);
            let fmt = "%Y-%m-%dT%H:%M:%S%z";
            url.push_str(&format!(
                "&from={}&to={}",
                urlencoding::encode(&from.format(fmt).to_string()),
                urlencoding::encode(&to.format(fmt).to_string())
            ));
        }
        FetchRequest::http(url)
    }

    fn parse_listing(&self, page: &Page) -> Vec<String> {
        let document = page.document();
        let Some(results) = document.select(&RESULTS).next() else {
            debug!(url = %page.url, "No results container");
            return Vec::new();
        };
        results
            .select(&RESULT_TEXT)
            .filter_map(|container| container.select(&ANCHOR).next())
            .filter_map(|a| a.value().attr("href"))
            .filter_map(article_url)
            .collect()
    }

    fn extract_article(&self, page: &Page) -> Option<Article> {
        let document = page.document();
        let Some(main) = document.select(&MAIN).next() else {
            warn!(url = %page.url, "Main content container not found");
            return None;
        };
        let Some(title) = main
            .select(&TITLE)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
        else {
            warn!(url = %page.url, "Title not found");
            return None;
        };
        let Some(raw_time) = main
            .select(&PUBLISHED)
            .next()
            .and_then(|t| t.value().attr("datetime"))
        else {
            warn!(url = %page.url, "Publication timestamp not found");
            return None;
        };

        let published_at = match parse_iso_timestamp(raw_time, self.offset) {
            Some(dt) => PublishedAt::Zoned(dt),
            None => PublishedAt::Raw(raw_time.trim().to_string()),
        };
        if !within_range(&published_at, self.date_range, self.offset) {
            debug!(url = %page.url, %published_at, "Outside date range");
            return None;
        }

        // Open paragraphs first, then whatever sits behind the paywall block.
        let body = join_paragraphs(main.select(&PARAGRAPH).chain(main.select(&PAYWALL)));
        Article::new(title, published_at, body, page.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn brt() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn range(start: (i32, u32, u32), end: (i32, u32, u32)) -> DateRange {
        DateRange {
            start: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            end: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
        }
    }

    const LISTING: &str = r#"
        <html><body><div class="results__content"><ul>
          <li><div class="widget--info__text-container">
            <a href="//g1.globo.com/busca/click?q=ELON+MUSK&p=0&u=https%3A%2F%2Fg1.globo.com%2Ftecnologia%2Fnoticia%2Fmusk.ghtml">Musk</a>
          </div></li>
          <li><div class="widget--info__text-container">
            <a href="https://g1.globo.com/economia/noticia/tesla.ghtml">Tesla</a>
            <a href="https://g1.globo.com/ignored.ghtml">segundo link</a>
          </div></li>
        </ul></div></body></html>"#;

    const ARTICLE: &str = r#"
        <html><body><main class="mc-body theme">
          <h1 class="content-head__title" itemprop="headline">X</h1>
          <time itemprop="datePublished" datetime="2024-07-01T10:00:00.000Z">01/07/2024 07h00</time>
          <p class="content-text__container">Hello world.</p>
          <p class="other">Propaganda</p>
        </main></body></html>"#;

    #[test]
    fn test_search_url_without_range() {
        let g1 = G1::new(None, brt());
        let req = g1.search_request(&Query::new("ELON MUSK"));
        assert_eq!(
            req.url,
            "https://g1.globo.com/busca/?q=ELON%20MUSK&ps=on&order=recent&species=not%C3%ADcias"
        );
    }

    #[test]
    fn test_search_url_with_range() {
        let g1 = G1::new(Some(range((2024, 8, 1), (2024, 9, 23))), brt());
        let req = g1.search_request(&Query::new("LULA"));
        assert!(req.url.contains("&from=2024-08-01T00%3A00%3A00-0300"));
        assert!(req.url.contains("&to=2024-09-23T23%3A59%3A59-0300"));
    }

    #[test]
    fn test_parse_listing_unwraps_click_links() {
        let g1 = G1::new(None, brt());
        let urls = g1.parse_listing(&Page::new("u", LISTING));
        assert_eq!(
            urls,
            vec![
                "https://g1.globo.com/tecnologia/noticia/musk.ghtml",
                "https://g1.globo.com/economia/noticia/tesla.ghtml",
            ]
        );
    }

    #[test]
    fn test_parse_listing_without_results() {
        let g1 = G1::new(None, brt());
        assert!(g1.parse_listing(&Page::new("u", "<html><body>Nada</body></html>")).is_empty());
    }

    #[test]
    fn test_extract_article() {
        let g1 = G1::new(None, brt());
        let article = g1
            .extract_article(&Page::new("https://g1.globo.com/a.ghtml", ARTICLE))
            .unwrap();
        assert_eq!(article.title(), "X");
        assert_eq!(article.published_at().to_string(), "01/07/2024 07:00");
        assert_eq!(article.body(), "Hello world.");
    }

    #[test]
    fn test_paywalled_body_is_included() {
        let html = ARTICLE.replace(
            r#"<p class="other">Propaganda</p>"#,
            r#"<div class="wall protected-content"><p>Conteúdo protegido.</p></div>"#,
        );
        let g1 = G1::new(None, brt());
        let article = g1.extract_article(&Page::new("u", html)).unwrap();
        assert_eq!(article.body(), "Hello world.\nConteúdo protegido.");
    }

    #[test]
    fn test_date_filter() {
        let g1 = G1::new(Some(range((2024, 8, 1), (2024, 9, 23))), brt());
        assert!(g1.extract_article(&Page::new("u", ARTICLE)).is_none());

        let g1 = G1::new(Some(range((2024, 7, 1), (2024, 7, 1))), brt());
        assert!(g1.extract_article(&Page::new("u", ARTICLE)).is_some());
    }

    #[test]
    fn test_missing_fields_yield_none() {
        let g1 = G1::new(None, brt());
        let no_title = ARTICLE.replace(r#"itemprop="headline""#, "");
        let no_time = ARTICLE.replace("datePublished", "dateModified");
        let no_body = ARTICLE.replace("Hello world.", " ");
        for html in [no_title, no_time, no_body] {
            assert!(g1.extract_article(&Page::new("u", html)).is_none());
        }
    }

    #[test]
    fn test_article_url() {
        assert_eq!(
            article_url("//g1.globo.com/a.ghtml").as_deref(),
            Some("https://g1.globo.com/a.ghtml")
        );
        assert_eq!(
            article_url("/economia/noticia/2024/08/01/x.ghtml").as_deref(),
            Some("https://g1.globo.com/economia/noticia/2024/08/01/x.ghtml")
        );
        assert_eq!(
            article_url("/busca/click?idx=0&u=https%3A%2F%2Fg1.globo.com%2Fb.ghtml").as_deref(),
            Some("https://g1.globo.com/b.ghtml")
        );
        assert_eq!(article_url("//g1.globo.com/busca/click?q=x"), None);
        assert_eq!(article_url("#topo"), None);
        assert_eq!(article_url(""), None);
    }
}
