//! Outbound page retrieval.
//!
//! Source adapters describe *what* to fetch with a [`FetchRequest`]; a
//! [`PageFetcher`] decides *how*. The production implementation,
//! [`SiteFetcher`], routes plain requests to [`http::HttpFetcher`] and
//! script-rendered pages to a [`browser::BrowserSession`], spacing consecutive
//! fetches with a [`throttle::Throttle`].
//!
//! # Failure classification
//!
//! | Outcome | Error | Caller behaviour |
//! |---------|-------|------------------|
//! | Non-2xx response | [`FetchError::Status`] | skip URL |
//! | Marker never appeared | [`FetchError::NotFound`] | skip URL |
//! | Network / decode error | [`FetchError::Http`] | skip URL |
//! | Browser session gone | [`FetchError::SessionLost`] | abort run |

pub mod browser;
pub mod http;
pub mod throttle;

use crate::error::FetchError;
use browser::BrowserSession;
use http::HttpFetcher;
use scraper::Html;
use std::time::Duration;
use throttle::Throttle;
use tracing::{debug, instrument};

/// Raw markup of a fetched page.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL of the page.
    pub url: String,
    pub html: String,
}

impl Page {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }

    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }
}

/// How a page has to be retrieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMode {
    /// Plain HTTP GET.
    Http,
    /// Headless-browser navigation that waits for `marker` (a CSS selector)
    /// to be present before reading the rendered markup.
    Browser { marker: String, timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub mode: FetchMode,
}

impl FetchRequest {
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: FetchMode::Http,
        }
    }

    pub fn browser(url: impl Into<String>, marker: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            mode: FetchMode::Browser {
                marker: marker.into(),
                timeout,
            },
        }
    }
}

/// Retrieve one page.
pub trait PageFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Page, FetchError>;
}

/// Production fetcher: HTTP client plus an optional browser session.
#[derive(Debug)]
pub struct SiteFetcher {
    http: HttpFetcher,
    browser: Option<BrowserSession>,
    throttle: Throttle,
}

impl SiteFetcher {
    pub fn new(
        http: HttpFetcher,
        browser: Option<BrowserSession>,
        politeness_delay: Duration,
    ) -> Self {
        Self {
            http,
            browser,
            throttle: Throttle::new(politeness_delay),
        }
    }

    /// Release the browser session, if any. Call on every exit path.
    pub async fn shutdown(self) {
        if let Some(browser) = self.browser {
            browser.close().await;
        }
    }
}

impl PageFetcher for SiteFetcher {
    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Page, FetchError> {
        self.throttle.wait().await;
        match &request.mode {
            FetchMode::Http => self.http.get(&request.url).await,
            FetchMode::Browser { marker, timeout } => match &self.browser {
                Some(browser) => browser.load(&request.url, marker, *timeout).await,
                None => {
                    debug!("No browser session configured");
                    Err(FetchError::BrowserUnavailable)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_constructors() {
        let r = FetchRequest::http("https://g1.globo.com");
        assert_eq!(r.mode, FetchMode::Http);

        let r = FetchRequest::browser("https://br.investing.com", "a.img", Duration::from_secs(10));
        assert_eq!(
            r.mode,
            FetchMode::Browser {
                marker: "a.img".into(),
                timeout: Duration::from_secs(10)
            }
        );
    }

    #[tokio::test]
    async fn test_browser_request_without_session_is_soft_failure() {
        let http = HttpFetcher::new("test-agent", Duration::from_secs(1)).unwrap();
        let fetcher = SiteFetcher::new(http, None, Duration::ZERO);
        let request = FetchRequest::browser("http://127.0.0.1:9/", "a.img", Duration::from_secs(1));
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, FetchError::BrowserUnavailable));
        assert!(!err.is_fatal());
        fetcher.shutdown().await;
    }

    #[test]
    fn test_page_document_parses() {
        let page = Page::new("u", "<html><body><h1>X</h1></body></html>");
        let doc = page.document();
        let h1 = scraper::Selector::parse("h1").unwrap();
        assert_eq!(doc.select(&h1).next().unwrap().text().collect::<String>(), "X");
    }
}
