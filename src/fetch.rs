use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, USER_AGENT};

// Some novel hosts serve a truncated page or a 403 to unknown agents.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/90.0.4430.212 Safari/537.36";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Per-attempt request timeout.
    pub timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl FetchSettings {
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

/// HTML fetcher with exponential backoff. Never fails loudly: exhausting the
/// retries yields `None` and the caller decides what that means.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(settings: FetchSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build fetch http client")?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    pub async fn fetch(&self, url: &str) -> Option<String> {
        let attempts = self.settings.max_retries;
        for attempt in 0..attempts {
            match self.try_fetch(url).await {
                Ok(body) => return Some(body),
                Err(err) => {
                    tracing::debug!(url, attempt, ?err, "fetch attempt failed");
                }
            }
            // Nothing left to wait for after the final attempt.
            if attempt + 1 < attempts {
                tokio::time::sleep(self.settings.backoff_for_attempt(attempt)).await;
            }
        }
        tracing::debug!(url, attempts, "giving up on fetch");
        None
    }

    async fn try_fetch(&self, url: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if status != StatusCode::OK {
            anyhow::bail!("unexpected status {status} for {url}");
        }

        response.text().await.context("read response body")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let settings = FetchSettings {
            base_backoff: Duration::from_millis(250),
            ..FetchSettings::default()
        };
        assert_eq!(settings.backoff_for_attempt(0), Duration::from_millis(250));
        assert_eq!(settings.backoff_for_attempt(1), Duration::from_millis(500));
        assert_eq!(settings.backoff_for_attempt(2), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn unreachable_host_yields_none() {
        let fetcher = Fetcher::new(FetchSettings {
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        // Port 9 (discard) on localhost is not expected to speak HTTP.
        assert!(fetcher.fetch("http://127.0.0.1:9/nothing").await.is_none());
    }
}
