use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::FetchError;

const USER_AGENT: &str = "Mozilla/5.0";

/// Raw page download. Implementations report only network-class failures.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// reqwest-backed fetcher. Certificate checks are off because the municipal
/// sites serve broken or mismatched chains.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let resp = self.client.get(url).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(transport)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// `multiplier * 2^(attempt-1)`, clamped to `[min, max]`.
    Exponential {
        multiplier: Duration,
        min: Duration,
        max: Duration,
    },
}

impl Backoff {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { multiplier, min, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                multiplier.saturating_mul(factor).clamp(min, max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retry_on: fn(&FetchError) -> bool,
}

impl RetryPolicy {
    /// 3 attempts, waits doubling from 1 s and clamped to 2..=10 s.
    pub fn exponential() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                multiplier: Duration::from_secs(1),
                min: Duration::from_secs(2),
                max: Duration::from_secs(10),
            },
            retry_on: FetchError::is_transient,
        }
    }

    /// 3 attempts, 3 s apart.
    pub fn fixed() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(3)),
            retry_on: FetchError::is_transient,
        }
    }
}

#[cfg(test)]
impl RetryPolicy {
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Fetch `url`, retrying failures the policy accepts. The last error is
/// returned once attempts run out; a non-retryable error is returned at once.
pub async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    url: &str,
    policy: &RetryPolicy,
) -> Result<String, FetchError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match fetcher.fetch(url).await {
            Ok(body) => {
                debug!(url, attempt, bytes = body.len(), "fetched");
                return Ok(body);
            }
            Err(e) if attempt < attempts && (policy.retry_on)(&e) => {
                let wait = policy.backoff.delay(attempt);
                warn!(
                    "Fetch failed for {} (attempt {}/{}), backing off {:.1}s: {}",
                    url,
                    attempt,
                    attempts,
                    wait.as_secs_f64(),
                    e
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
