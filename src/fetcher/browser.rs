//! Headless-browser fetches through a W3C WebDriver server.
//!
//! Some sources render their listings client-side, so the markup returned by a
//! plain GET has no article links. For those, a [`BrowserSession`] drives a
//! browser via chromedriver / msedgedriver / geckodriver, waits for a content
//! marker to appear, and returns the rendered page source.
//!
//! One session is opened per run and must be released with
//! [`BrowserSession::close`]. If a session is dropped without being closed, a
//! best-effort delete is sent in the background.
//!
//! # Protocol
//!
//! | Step | Request |
//! |------|---------|
//! | open | `POST /session` |
//! | navigate | `POST /session/{id}/url` |
//! | wait for marker | `POST /session/{id}/element` (polled) |
//! | read markup | `GET /session/{id}/source` |
//! | close | `DELETE /session/{id}` |

use super::Page;
use crate::config::{BrowserConfig, BrowserKind};
use crate::error::FetchError;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, warn};

const HEADLESS_ARGS: [&str; 3] = ["--headless", "--disable-gpu", "--no-sandbox"];

#[derive(Debug, Deserialize)]
struct WireResponse {
    value: Value,
}

/// Error object carried in the `value` of a failed WebDriver command.
#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
pub struct BrowserSession {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
    poll_interval: Duration,
    /// One navigation at a time: the session has a single active tab.
    navigation: Mutex<()>,
    closed: bool,
}

impl BrowserSession {
    /// Open a new headless session.
    #[instrument(level = "info", skip_all, fields(webdriver = %config.webdriver_url))]
    pub async fn start(config: &BrowserConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::new();
        let base_url = config.webdriver_url.trim_end_matches('/').to_string();
        let body = json!({ "capabilities": { "alwaysMatch": capabilities(config.browser) } });

        let response = client
            .post(format!("{base_url}/session"))
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::SessionLost(format!("WebDriver unreachable: {e}")))?;
        let status = response.status();
        let wire: WireResponse = response.json().await?;
        if !status.is_success() {
            return Err(FetchError::SessionLost(format!(
                "could not create session: {}",
                wire.value
            )));
        }
        let session_id = wire
            .value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::WebDriver("session response without sessionId".into()))?
            .to_string();

        info!(%session_id, browser = ?config.browser, "Browser session started");
        Ok(Self {
            client,
            base_url,
            session_id,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            navigation: Mutex::new(()),
            closed: false,
        })
    }

    /// Navigate to `url`, wait up to `timeout` for `marker`, and return the
    /// rendered markup.
    #[instrument(level = "info", skip(self, timeout))]
    pub async fn load(
        &self,
        url: &str,
        marker: &str,
        timeout: Duration,
    ) -> Result<Page, FetchError> {
        let _guard = self.navigation.lock().await;
        self.command(Method::POST, "url", Some(json!({ "url": url }))).await?;
        self.wait_for(marker, timeout).await?;
        let source = self.command(Method::GET, "source", None).await?;
        let html = source
            .as_str()
            .ok_or_else(|| FetchError::WebDriver("page source is not a string".into()))?
            .to_string();
        debug!(bytes = html.len(), "Read rendered page");
        Ok(Page::new(url, html))
    }

    async fn wait_for(&self, marker: &str, timeout: Duration) -> Result<(), FetchError> {
        let deadline = Instant::now() + timeout;
        let locator = json!({ "using": "css selector", "value": marker });
        loop {
            match self.raw_command(Method::POST, "element", Some(locator.clone())).await? {
                Ok(_) => return Ok(()),
                Err(wire) if wire.error == "no such element" => {}
                Err(wire) => return Err(classify(wire)),
            }
            if Instant::now() >= deadline {
                warn!(%marker, ?timeout, "Marker did not appear");
                return Err(FetchError::NotFound(marker.to_string()));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, FetchError> {
        self.raw_command(method, path, body).await?.map_err(classify)
    }

    /// Outer error: transport failure. Inner error: the driver answered with
    /// a WebDriver error object.
    async fn raw_command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Result<Value, WireError>, FetchError> {
        let url = format!("{}/session/{}/{}", self.base_url, self.session_id, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                FetchError::SessionLost(format!("WebDriver connection lost: {e}"))
            } else {
                FetchError::Http(e)
            }
        })?;
        let status = response.status();
        let wire: WireResponse = response.json().await?;
        if status.is_success() {
            Ok(Ok(wire.value))
        } else {
            let err = serde_json::from_value::<WireError>(wire.value.clone()).unwrap_or(WireError {
                error: "unknown error".to_string(),
                message: wire.value.to_string(),
            });
            Ok(Err(err))
        }
    }

    /// End the session and release the browser.
    #[instrument(level = "info", skip_all, fields(session_id = %self.session_id))]
    pub async fn close(mut self) {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        match self.client.delete(&url).send().await {
            Ok(_) => info!("Browser session closed"),
            Err(e) => error!(error = %e, "Failed to close browser session"),
        }
        self.closed = true;
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(
            session_id = %self.session_id,
            "Browser session dropped without close; deleting in background"
        );
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        let client = self.client.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = client.delete(&url).send().await;
            });
        }
    }
}

fn capabilities(browser: BrowserKind) -> Value {
    match browser {
        BrowserKind::Chrome => json!({
            "browserName": "chrome",
            "goog:chromeOptions": { "args": HEADLESS_ARGS },
        }),
        BrowserKind::Edge => json!({
            "browserName": "MicrosoftEdge",
            "ms:edgeOptions": { "args": HEADLESS_ARGS },
        }),
        BrowserKind::Firefox => json!({
            "browserName": "firefox",
            "moz:firefoxOptions": { "args": ["-headless"] },
        }),
    }
}

fn classify(wire: WireError) -> FetchError {
    match wire.error.as_str() {
        "invalid session id" | "session not created" | "no such window" => {
            FetchError::SessionLost(format!("{}: {}", wire.error, wire.message))
        }
        "no such element" => FetchError::NotFound(wire.message),
        _ => FetchError::WebDriver(format!("{}: {}", wire.error, wire.message)),
    }
}
