use crate::classify::ScrapeOutcome;
use crate::model::TargetName;
use lurker_scanner::extract::{detect_unavailable, extract_metrics};
use lurker_scanner::{ExecutionHandle, IpRotator, RetryTiming};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_ATTEMPTS: u32 = 3;

/// Renders a community page through a checked-out handle and turns the
/// result into a [`ScrapeOutcome`].
///
/// Blocks and timeouts are retried on the same handle after an IP rotation;
/// only the last attempt's outcome is reported.
pub struct PageScraper {
    base_url: String,
    page_timeout: Duration,
    rotator: Arc<IpRotator>,
    timing: RetryTiming,
    max_attempts: u32,
}

impl PageScraper {
    pub fn new(base_url: &str, page_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            page_timeout,
            rotator: Arc::new(IpRotator::disabled()),
            timing: RetryTiming::default(),
            max_attempts: DEFAULT_PAGE_ATTEMPTS,
        }
    }

    pub fn with_rotator(mut self, rotator: Arc<IpRotator>) -> Self {
        self.rotator = rotator;
        self
    }

    pub fn with_retry(mut self, timing: RetryTiming, max_attempts: u32) -> Self {
        self.timing = timing;
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn page_url(&self, name: &TargetName) -> String {
        format!("{}/r/{}/", self.base_url, name)
    }

    pub async fn scrape(&self, handle: &ExecutionHandle, name: &TargetName) -> ScrapeOutcome {
        let url = self.page_url(name);
        let mut attempt = 0;

        loop {
            let outcome = self.attempt(handle, name, &url).await;
            attempt += 1;

            let cooldown = match &outcome {
                ScrapeOutcome::Blocked(_) => self.timing.block_cooldown,
                ScrapeOutcome::TimedOut => self.timing.timeout_cooldown,
                _ => return outcome,
            };
            if attempt >= self.max_attempts {
                warn!("r/{}: giving up after {} attempts", name, attempt);
                return outcome;
            }

            warn!(
                "r/{}: {:?} (attempt {}/{}) - rotating IP",
                name, outcome, attempt, self.max_attempts
            );
            self.rotator.rotate().await;
            tokio::time::sleep(cooldown).await;
        }
    }

    async fn attempt(&self, handle: &ExecutionHandle, name: &TargetName, url: &str) -> ScrapeOutcome {
        debug!(handle = handle.id(), "Scraping r/{}", name);

        let page = match handle.session().load(url, self.page_timeout).await {
            Ok(page) => page,
            Err(e) if e.is_timeout() => {
                warn!("Timeout scraping r/{}", name);
                return ScrapeOutcome::TimedOut;
            }
            Err(e) => {
                warn!("Error scraping r/{}: {}", name, e);
                return ScrapeOutcome::Error(e.to_string());
            }
        };

        match page.status_code {
            status @ (403 | 429) => return ScrapeOutcome::Blocked(status),
            status if status >= 500 => return ScrapeOutcome::Error(format!("HTTP {}", status)),
            _ => {}
        }

        if let Some(reason) = detect_unavailable(name.as_str(), page.title.as_deref(), &page.body) {
            let title: String = page.title.as_deref().unwrap_or_default().chars().take(60).collect();
            warn!("[X] r/{}: {} - page title: '{}'", name, reason, title);
            return ScrapeOutcome::unavailable(reason);
        }

        if page.status_code >= 400 {
            return ScrapeOutcome::Error(format!("HTTP {}", page.status_code));
        }

        let metrics = extract_metrics(&page.body);
        if metrics.is_empty() {
            warn!("r/{}: no metrics found, will retry", name);
        } else {
            info!(
                "[OK] r/{}: {} visitors, {} contributions",
                name,
                or_na(metrics.weekly_visitors),
                or_na(metrics.weekly_contributions)
            );
        }
        ScrapeOutcome::Success(metrics)
    }
}

fn or_na(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lurker_scanner::{PageLoad, ScanError, Session};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    const LIVE_PAGE: &str = r#"<shreddit-subreddit-header>
        <faceplate-number slot="weekly-active-users-count">2,400</faceplate-number>
        <faceplate-number slot="weekly-contributions-count">120</faceplate-number>
    </shreddit-subreddit-header>"#;

    /// Answers each load with the next scripted status, then keeps
    /// repeating the last one.
    struct ScriptedSession {
        pages: Mutex<VecDeque<(u16, &'static str)>>,
        loads: Mutex<u32>,
    }

    impl ScriptedSession {
        fn new(pages: &[(u16, &'static str)]) -> Self {
            Self {
                pages: Mutex::new(pages.iter().copied().collect()),
                loads: Mutex::new(0),
            }
        }

        fn loads(&self) -> u32 {
            *self.loads.lock().unwrap()
        }
    }

    #[async_trait]
    impl Session for ScriptedSession {
        async fn load(&self, url: &str, _timeout: Duration) -> Result<PageLoad, ScanError> {
            *self.loads.lock().unwrap() += 1;
            let mut pages = self.pages.lock().unwrap();
            let (status, body) = if pages.len() > 1 {
                pages.pop_front().unwrap()
            } else {
                pages[0]
            };
            Ok(PageLoad::new(url.to_string(), status, body.to_string()))
        }

        async fn probe(&self) -> Result<(), ScanError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn fast_timing() -> RetryTiming {
        RetryTiming {
            backoff_base: Duration::from_millis(1),
            block_cooldown: Duration::from_millis(2),
            timeout_cooldown: Duration::from_millis(2),
            error_delay: Duration::from_millis(1),
        }
    }

    fn handle(session: Arc<ScriptedSession>) -> ExecutionHandle {
        ExecutionHandle::new("profile-0", session)
    }

    fn alpha() -> TargetName {
        TargetName::new("alpha").unwrap()
    }

    #[tokio::test]
    async fn test_block_is_retried_on_the_same_handle_after_rotation() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rotate"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let rotator = Arc::new(IpRotator::new(Some(format!("{}/rotate", mock_server.uri()))));
        let session = Arc::new(ScriptedSession::new(&[(403, "<html></html>"), (200, LIVE_PAGE)]));
        let scraper = PageScraper::new("https://www.reddit.com", Duration::from_secs(1))
            .with_rotator(rotator.clone())
            .with_retry(fast_timing(), 3);

        let outcome = scraper.scrape(&handle(session.clone()), &alpha()).await;

        match outcome {
            ScrapeOutcome::Success(metrics) => {
                assert_eq!(metrics.weekly_visitors, Some(2400));
                assert_eq!(metrics.weekly_contributions, Some(120));
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(session.loads(), 2);
        assert_eq!(rotator.rotation_count(), 1);
    }

    #[tokio::test]
    async fn test_persistent_block_is_reported_after_last_attempt() {
        let session = Arc::new(ScriptedSession::new(&[(429, "<html></html>")]));
        let scraper = PageScraper::new("https://www.reddit.com", Duration::from_secs(1))
            .with_retry(fast_timing(), 3);

        let outcome = scraper.scrape(&handle(session.clone()), &alpha()).await;

        assert_eq!(outcome, ScrapeOutcome::Blocked(429));
        assert_eq!(session.loads(), 3);
    }

    #[tokio::test]
    async fn test_page_without_metrics_is_not_retried_in_place() {
        let session = Arc::new(ScriptedSession::new(&[(
            200,
            "<shreddit-subreddit-header></shreddit-subreddit-header>",
        )]));
        let scraper = PageScraper::new("https://www.reddit.com", Duration::from_secs(1))
            .with_retry(fast_timing(), 3);

        let outcome = scraper.scrape(&handle(session.clone()), &alpha()).await;

        assert_eq!(outcome, ScrapeOutcome::Success(Default::default()));
        assert_eq!(session.loads(), 1);
    }

    #[test]
    fn test_missing_metric_renders_as_na() {
        assert_eq!(or_na(Some(2400)), "2400");
        assert_eq!(or_na(None), "N/A");
    }
}
