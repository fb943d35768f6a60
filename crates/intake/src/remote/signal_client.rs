use std::time::Duration;

use anyhow::{Context, bail};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use common::models::{Signal, SourceTag};

use crate::remote::decode_signals;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// HTTP access to a signal backend that lists currently open signals.
#[derive(Clone)]
pub struct SignalClient {
    client: Client,
    url: String,
    token: Option<String>,
}

impl SignalClient {
    pub fn new(url: impl Into<String>, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent("signal_dispatch/0.1.0")
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }

    /// One poll. Individual malformed records are logged and skipped.
    pub async fn fetch_signals(&self, source: SourceTag) -> anyhow::Result<Vec<Signal>> {
        let mut retry_count = 0;

        let body = loop {
            match self.make_request().await {
                Ok(body) => break body,
                Err(e) if Self::is_rate_limit_error(&e) => {
                    retry_count += 1;
                    if retry_count > MAX_RATE_LIMIT_RETRIES {
                        bail!("Max retries exceeded for rate limit");
                    }
                    let backoff_seconds = 2_u64.pow(retry_count);
                    warn!(
                        "Signal backend rate limited {} poll, backing off for {} seconds (attempt {}/{})",
                        source, backoff_seconds, retry_count, MAX_RATE_LIMIT_RETRIES
                    );
                    sleep(Duration::from_secs(backoff_seconds)).await;
                }
                Err(e) => return Err(e),
            }
        };

        let decoded = decode_signals(&body, source).context("Failed to decode signal list")?;
        let mut signals = Vec::with_capacity(decoded.len());
        for result in decoded {
            match result {
                Ok(signal) => signals.push(signal),
                Err(e) => warn!("Skipping malformed signal from {}: {}", source, e),
            }
        }
        debug!("{} poll returned {} signals", source, signals.len());
        Ok(signals)
    }

    async fn make_request(&self) -> anyhow::Result<String> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            bail!("HTTP 429: Too Many Requests");
        }
        if status == StatusCode::IM_A_TEAPOT {
            bail!("HTTP 418: IP has been auto-banned");
        }
        if !status.is_success() {
            bail!("Signal backend answered HTTP {}", status.as_u16());
        }

        response.text().await.context("Failed to read response body")
    }

    fn is_rate_limit_error(error: &anyhow::Error) -> bool {
        let error_str = error.to_string();
        error_str.contains("429") || error_str.contains("418")
    }
}
