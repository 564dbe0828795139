use crate::error::{Result, ScanError};
use crate::result::{AttemptOutcome, FetchAttempt};
use crate::rotation::IpRotator;
use reqwest::{Client, Proxy};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub type AttemptCallback = Arc<dyn Fn(&FetchAttempt) + Send + Sync>;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Delays applied between failed attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryTiming {
    /// Base for `base * 2^attempt` after an unexpected status.
    pub backoff_base: Duration,
    /// Cool-down after a 403/429, once the IP has been rotated.
    pub block_cooldown: Duration,
    /// Cool-down after a transport timeout, once the IP has been rotated.
    pub timeout_cooldown: Duration,
    /// Pause after any other transport error.
    pub error_delay: Duration,
}

impl RetryTiming {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// How long to wait before the next attempt after `outcome`.
    pub fn delay_after(&self, outcome: &AttemptOutcome, attempt: u32) -> Duration {
        match outcome {
            AttemptOutcome::Success => Duration::ZERO,
            AttemptOutcome::Blocked(_) => self.block_cooldown,
            AttemptOutcome::TimedOut => self.timeout_cooldown,
            AttemptOutcome::HttpStatus(_) => self.backoff(attempt),
            AttemptOutcome::Transport(_) => self.error_delay,
        }
    }
}

impl Default for RetryTiming {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            block_cooldown: Duration::from_secs(5),
            timeout_cooldown: Duration::from_secs(3),
            error_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub timing: RetryTiming,
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 5,
            timing: RetryTiming::default(),
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Performs one logical fetch with bounded retries.
///
/// Expected failure modes never escape as errors: once the retry budget is
/// spent the caller gets `None` and decides what that means for its target.
pub struct Fetcher {
    client: Client,
    rotator: Arc<IpRotator>,
    max_retries: u32,
    timing: RetryTiming,
    attempt_callback: Option<AttemptCallback>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(proxy) = config.proxy.as_deref() {
            builder = builder.proxy(Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            rotator: Arc::new(IpRotator::disabled()),
            max_retries: config.max_retries.max(1),
            timing: config.timing,
            attempt_callback: None,
        })
    }

    pub fn with_rotator(mut self, rotator: Arc<IpRotator>) -> Self {
        self.rotator = rotator;
        self
    }

    pub fn with_attempt_callback(mut self, callback: AttemptCallback) -> Self {
        self.attempt_callback = Some(callback);
        self
    }

    pub fn rotator(&self) -> &Arc<IpRotator> {
        &self.rotator
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Fetch and decode a JSON document using the configured retry budget.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Option<T> {
        self.fetch_json_with_retries(url, self.max_retries).await
    }

    pub async fn fetch_json_with_retries<T: DeserializeOwned>(
        &self,
        url: &str,
        max_retries: u32,
    ) -> Option<T> {
        for attempt in 0..max_retries {
            let start = Instant::now();
            let outcome = match self.attempt::<T>(url).await {
                Ok(value) => {
                    self.report(url, attempt, AttemptOutcome::Success, start.elapsed());
                    return Some(value);
                }
                Err(outcome) => outcome,
            };
            self.report(url, attempt, outcome.clone(), start.elapsed());

            match &outcome {
                AttemptOutcome::Blocked(status) => {
                    warn!(
                        "HTTP {} (attempt {}/{}) - rotating IP",
                        status,
                        attempt + 1,
                        max_retries
                    );
                    self.rotator.rotate().await;
                }
                AttemptOutcome::TimedOut => {
                    warn!(
                        "Timeout (attempt {}/{}) - rotating IP",
                        attempt + 1,
                        max_retries
                    );
                    self.rotator.rotate().await;
                }
                AttemptOutcome::HttpStatus(status) => {
                    warn!("HTTP {} for {}", status, url);
                }
                AttemptOutcome::Transport(e) => {
                    warn!("Error (attempt {}/{}): {}", attempt + 1, max_retries, e);
                }
                AttemptOutcome::Success => {}
            }

            tokio::time::sleep(self.timing.delay_after(&outcome, attempt)).await;
        }

        error!("Failed after {} attempts: {}", max_retries, url);
        None
    }

    /// Single attempt, no retries: returns the raw status and body.
    ///
    /// Used where the status itself carries meaning, such as a not-found
    /// pre-check.
    pub async fn probe(&self, url: &str) -> Result<(u16, String)> {
        debug!("Probing {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn attempt<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, AttemptOutcome> {
        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| classify_transport(ScanError::from(e)))?;

        match response.status().as_u16() {
            200 => response
                .json::<T>()
                .await
                .map_err(|e| classify_transport(ScanError::from(e))),
            status @ (403 | 429) => Err(AttemptOutcome::Blocked(status)),
            status => Err(AttemptOutcome::HttpStatus(status)),
        }
    }

    fn report(&self, url: &str, attempt: u32, outcome: AttemptOutcome, elapsed: Duration) {
        if let Some(ref callback) = self.attempt_callback {
            callback(&FetchAttempt::new(url.to_string(), attempt, outcome, elapsed));
        }
    }
}

fn classify_transport(err: ScanError) -> AttemptOutcome {
    if err.is_timeout() {
        AttemptOutcome::TimedOut
    } else {
        AttemptOutcome::Transport(err.to_string())
    }
}
