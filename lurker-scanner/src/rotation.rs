use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Asks the upstream proxy for a fresh exit IP.
///
/// Rotation is best effort: failures are logged and swallowed so the fetch
/// loop that triggered it keeps going. The counter only feeds log lines.
pub struct IpRotator {
    client: Client,
    rotation_url: Option<String>,
    rotations: AtomicU64,
}

impl IpRotator {
    pub fn new(rotation_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            rotation_url,
            rotations: AtomicU64::new(0),
        }
    }

    /// A rotator with no endpoint; `rotate` is a no-op.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.rotation_url.is_some()
    }

    /// Returns true if the endpoint acknowledged the rotation.
    pub async fn rotate(&self) -> bool {
        let Some(url) = self.rotation_url.as_deref() else {
            return false;
        };

        match self.client.get(url).send().await {
            Ok(response) if response.status().as_u16() == 200 => {
                let count = self.rotations.fetch_add(1, Ordering::Relaxed) + 1;
                info!(rotation = count, "Proxy IP rotated");
                true
            }
            Ok(response) => {
                warn!(status = response.status().as_u16(), "Failed to rotate IP");
                false
            }
            Err(e) => {
                warn!(error = %e, "Error rotating IP");
                false
            }
        }
    }

    pub fn rotation_count(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }
}

impl Default for IpRotator {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    #[tokio::test]
    async fn test_rotate_counts_only_successes() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rotate"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rotate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let rotator = IpRotator::new(Some(format!("{}/rotate", mock_server.uri())));

        assert!(rotator.rotate().await);
        assert!(!rotator.rotate().await);
        assert_eq!(rotator.rotation_count(), 1);
    }

    #[tokio::test]
    async fn test_rotate_unreachable_endpoint_is_not_fatal() {
        // Nothing listens on port 9 on loopback.
        let rotator = IpRotator::new(Some("http://127.0.0.1:9/rotate".to_string()));

        assert!(!rotator.rotate().await);
        assert_eq!(rotator.rotation_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_rotator_is_noop() {
        let rotator = IpRotator::disabled();
        assert!(!rotator.is_enabled());
        assert!(!rotator.rotate().await);
    }
}
