use crate::error::{Result, ScanError};
use crate::extract;
use crate::result::PageLoad;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// A long-lived remote rendering session.
///
/// Implementations must be usable from one task at a time; the pool enforces
/// that exclusivity, not the session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Render `url` and return the resulting page.
    async fn load(&self, url: &str, timeout: Duration) -> Result<PageLoad>;

    /// Cheapest possible round trip to the session.
    async fn probe(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Session driven over HTTP against a provisioned debug endpoint.
pub struct RemoteSession {
    client: Client,
    endpoint: String,
    connected: AtomicBool,
}

impl RemoteSession {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            connected: AtomicBool::new(true),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn track<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.connected.store(true, Ordering::Relaxed),
            Err(ScanError::HttpError(e)) if e.is_connect() || e.is_request() => {
                self.connected.store(false, Ordering::Relaxed)
            }
            Err(_) => {}
        }
    }

    async fn render(&self, url: &str, timeout: Duration) -> Result<PageLoad> {
        let body = serde_json::json!({
            "url": url,
            "gotoOptions": {
                "waitUntil": "domcontentloaded",
                "timeout": timeout.as_millis() as u64,
            },
        });

        let start = Instant::now();
        let resp = self
            .client
            .post(format!("{}/content", self.endpoint))
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ScanError::Session {
                status: status.as_u16(),
                message,
            });
        }

        // The rendering endpoint reports the page's own status separately.
        let page_status = resp
            .headers()
            .get("x-response-code")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(status.as_u16());

        let html = resp.text().await?;
        let mut page = PageLoad::new(url.to_string(), page_status, html);
        page.title = extract::page_title(&page.body);
        page.response_time = start.elapsed();
        Ok(page)
    }
}

#[async_trait]
impl Session for RemoteSession {
    async fn load(&self, url: &str, timeout: Duration) -> Result<PageLoad> {
        debug!("Loading {} via {}", url, self.endpoint);
        let result = self.render(url, timeout).await;
        self.track(&result);
        result
    }

    async fn probe(&self) -> Result<()> {
        let result = async {
            let resp = self
                .client
                .get(format!("{}/json/version", self.endpoint))
                .send()
                .await?;
            let status = resp.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(ScanError::Session {
                    status: status.as_u16(),
                    message: resp.text().await.unwrap_or_default(),
                })
            }
        }
        .await;
        self.track(&result);
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
