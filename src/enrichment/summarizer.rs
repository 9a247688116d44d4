//! Article summarization through Google Gemini, with credential rotation and
//! exponential backoff retry.
//!
//! # Architecture
//!
//! - [`AskAsync`]: one request/response round trip with a generative model
//! - [`GeminiClient`]: `generateContent` bound to a single credential
//! - [`Throttled`]: decorator that takes a [`Throttle`] permit before each call
//! - [`RetryAsk`]: decorator that adds retry with backoff to any [`AskAsync`]
//! - [`RotatingSummarizer`]: picks a credential per call and never fails;
//!   errors collapse into [`Summary::unavailable`]
//!
//! # Credential policy
//!
//! Calls are numbered from 0 by an internal counter; call `i` goes to
//! credential `i % n`. With `fallback_on_error`, a failed call is retried on
//! the following credentials in rotation order before giving up.
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! Blocked prompts are not retried: the same input is blocked again.
//!
//! Retries sit outside [`Throttled`], so every outbound attempt, first or
//! retried, waits for its own permit.

use super::Summarizer;
use crate::config::SummarizerConfig;
use crate::error::EnrichError;
use crate::fetcher::throttle::Throttle;
use crate::models::{MAX_SUMMARY_CHARS, Summary};
use crate::utils::{clip_chars, truncate_for_log};
use rand::{Rng, rng};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// One generative-API key and the instruction sent with it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub label: String,
    pub api_key: String,
    pub instruction: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Async request/response with a generative model.
pub trait AskAsync {
    type Response;

    async fn ask(&self, text: &str) -> Result<Self::Response, EnrichError>;
}

/// Waits for a shared [`Throttle`] before every call to the inner [`AskAsync`].
pub struct Throttled<T> {
    inner: T,
    throttle: Arc<Throttle>,
}

impl<T> Throttled<T> {
    pub fn new(inner: T, throttle: Arc<Throttle>) -> Self {
        Self { inner, throttle }
    }
}

impl<T> fmt::Debug for Throttled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttled").field("throttle", &self.throttle).finish()
    }
}

impl<T> AskAsync for Throttled<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    async fn ask(&self, text: &str) -> Result<Self::Response, EnrichError> {
        self.throttle.wait().await;
        self.inner.ask(text).await
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`].
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    #[instrument(level = "debug", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, EnrichError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries || matches!(e, EnrichError::Blocked(_)) {
                        if self.max_retries > 0 {
                            error!(
                                attempt,
                                max = self.max_retries,
                                elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                                elapsed_ms_total = total_dt.as_millis() as u64,
                                error = %e,
                                "ask() giving up"
                            );
                        }
                        return Err(e);
                    }

                    // backoff calc
                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1).min(16));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, or why there is none.
    fn into_text(self) -> Result<String, EnrichError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(EnrichError::Blocked(reason));
        }
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            return Err(EnrichError::Empty);
        }
        Ok(text.to_string())
    }
}

/// `generateContent` client bound to one credential.
pub struct GeminiClient {
    client: reqwest::Client,
    url: String,
    credential: Credential,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("url", &self.url)
            .field("credential", &self.credential)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        model: &str,
        credential: Credential,
    ) -> Self {
        Self {
            client,
            url: format!("{}/models/{}:generateContent", endpoint.trim_end_matches('/'), model),
            credential,
        }
    }
}

impl AskAsync for GeminiClient {
    type Response = String;

    #[instrument(level = "debug", skip_all, fields(credential = %self.credential.label))]
    async fn ask(&self, text: &str) -> Result<String, EnrichError> {
        let prompt = format!("{}\n{}", self.credential.instruction, text);
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.credential.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Api {
                status,
                body: truncate_for_log(&body, 300),
            });
        }
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Malformed(e.to_string()))?;
        parsed.into_text()
    }
}

/// Summarizer that spreads calls over several labelled backends.
#[derive(Debug)]
pub struct RotatingSummarizer<T> {
    backends: Vec<(String, T)>,
    next: AtomicUsize,
    fallback_on_error: bool,
}

/// Production summarizer: one retrying, throttled Gemini client per credential.
pub type GeminiSummarizer = RotatingSummarizer<RetryAsk<Throttled<GeminiClient>>>;

impl<T> RotatingSummarizer<T>
where
    T: AskAsync<Response = String>,
{
    pub fn new(backends: Vec<(String, T)>, fallback_on_error: bool) -> Self {
        Self {
            backends,
            next: AtomicUsize::new(0),
            fallback_on_error,
        }
    }

    /// Backend indices to try for the next call, in order.
    fn plan(&self) -> Vec<usize> {
        let n = self.backends.len();
        if n == 0 {
            return Vec::new();
        }
        let first = self.next.fetch_add(1, Ordering::Relaxed) % n;
        let tries = if self.fallback_on_error { n } else { 1 };
        (0..tries).map(|k| (first + k) % n).collect()
    }
}

impl GeminiSummarizer {
    /// Every credential shares `throttle`, so the spacing holds across keys.
    pub fn gemini(
        config: &SummarizerConfig,
        credentials: Vec<Credential>,
        throttle: Arc<Throttle>,
    ) -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .build()?;
        let backends = credentials
            .into_iter()
            .map(|credential| {
                let label = credential.label.clone();
                let gemini =
                    GeminiClient::new(client.clone(), &config.endpoint, &config.model, credential);
                let retrying = RetryAsk::new(
                    Throttled::new(gemini, Arc::clone(&throttle)),
                    config.max_retries,
                    StdDuration::from_millis(config.retry_base_delay_ms),
                );
                (label, retrying)
            })
            .collect();
        Ok(Self::new(backends, config.fallback_on_error))
    }
}

impl<T> Summarizer for RotatingSummarizer<T>
where
    T: AskAsync<Response = String>,
{
    #[instrument(level = "info", skip_all, fields(chars = text.chars().count()))]
    async fn summarize(&self, text: &str) -> Summary {
        let mut last_label = None;
        for index in self.plan() {
            let (label, backend) = &self.backends[index];
            let t0 = Instant::now();
            match backend.ask(text).await {
                Ok(summary) => {
                    info!(
                        credential = %label,
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "Summary generated"
                    );
                    return Summary {
                        text: clip_chars(summary.trim(), MAX_SUMMARY_CHARS),
                        credential: Some(label.clone()),
                    };
                }
                Err(e) => {
                    warn!(credential = %label, error = %e, "Summarization failed");
                    last_label = Some(label.clone());
                }
            }
        }
        Summary::unavailable(last_label)
    }
}
