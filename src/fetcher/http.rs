//! Plain HTTP page fetches.

use super::Page;
use crate::error::FetchError;
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// GET `url`; any non-2xx status becomes [`FetchError::Status`].
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, url: &str) -> Result<Page, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "Non-success response");
            return Err(FetchError::Status(status));
        }
        let final_url = response.url().to_string();
        let html = response.text().await?;
        debug!(bytes = html.len(), "Fetched page");
        Ok(Page::new(final_url, html))
    }
}
