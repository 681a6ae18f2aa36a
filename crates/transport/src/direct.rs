use crate::{redact_url, Fetcher, Result, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("market-overlay/", env!("CARGO_PKG_VERSION"));

/// Plain HTTPS GET through `reqwest`.
pub struct DirectFetcher {
    client: Client,
}

impl DirectFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Blocked(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for DirectFetcher {
    fn name(&self) -> &str {
        "direct"
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(|e| {
            TransportError::Blocked(format!("GET {} failed: {}", redact_url(url), e.without_url()))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Blocked(format!(
                "GET {} returned HTTP {status}",
                redact_url(url)
            )));
        }

        response.text().await.map_err(|e| {
            TransportError::Blocked(format!(
                "failed reading body of {}: {}",
                redact_url(url),
                e.without_url()
            ))
        })
    }
}
