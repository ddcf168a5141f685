//! HTTP client with per-host politeness delay and retry with backoff.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::error::{Error, Result};

/// Base delay for the retry backoff.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff is capped here.
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Attempts per request before giving up.
const MAX_ATTEMPTS: u32 = 5;

const USER_AGENT: &str = concat!("scansift/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by crawlers and the fetcher.
pub struct HttpClient {
    client: reqwest::Client,
    per_host_delay: Duration,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl HttpClient {
    pub fn new(timeout: Duration, per_host_delay: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            per_host_delay,
            last_request: Mutex::new(HashMap::new()),
        })
    }

    /// Politeness: wait until the per-host delay since the previous
    /// request to the same host has elapsed.
    async fn acquire(&self, url: &str) {
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
        else {
            return;
        };

        let wait = {
            let mut last = self.last_request.lock().await;
            let now = Instant::now();
            let wait = last
                .get(&host)
                .map(|prev| (*prev + self.per_host_delay).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO);
            last.insert(host, now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Single GET with the politeness delay applied; no retries.
    pub async fn get(&self, url: &str, accept: Option<&str>) -> Result<reqwest::Response> {
        self.acquire(url).await;
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header("Accept", accept);
        }
        let response = request.send().await?;
        classify_status(url, &response)?;
        Ok(response)
    }

    /// GET with exponential backoff on transient failures.
    pub async fn get_with_retry(&self, url: &str, accept: Option<&str>) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            match self.get(url, accept).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    tracing::debug!(
                        "transient failure fetching {} (attempt {}): {}; retrying in {:?}",
                        url,
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch a body as text, retrying transient failures.
    pub async fn get_text(&self, url: &str, accept: Option<&str>) -> Result<String> {
        let response = self.get_with_retry(url, accept).await?;
        Ok(response.text().await?)
    }

    /// Fetch a body as bytes, retrying transient failures.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get_with_retry(url, None).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Map HTTP statuses onto the error taxonomy.
fn classify_status(url: &str, response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let code = status.as_u16();
    if code == 429 || status.is_server_error() {
        Err(Error::TransientUpstream(format!("{url} returned {status}")))
    } else {
        Err(Error::PermanentUpstream(format!("{url} returned {status}")))
    }
}

/// Exponential backoff: base 1s, factor 2, capped at 30s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let delay = BACKOFF_BASE * 2u32.saturating_pow(attempt);
    delay.min(BACKOFF_CAP)
}
