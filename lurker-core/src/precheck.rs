use crate::model::TargetName;
use lurker_scanner::Fetcher;
use lurker_scanner::listing::{ErrorBody, about_path};
use std::sync::Arc;
use tracing::debug;

const DEFINITIVE_REASONS: &[&str] = &["banned", "private", "quarantined", "gold_only"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecheckVerdict {
    /// Nothing conclusive; go ahead with the full scrape.
    Proceed,
    Unavailable(String),
}

/// One cheap JSON request that can rule a target out before a handle is
/// checked out for it.
pub struct Prechecker {
    fetcher: Arc<Fetcher>,
    base_url: String,
}

impl Prechecker {
    pub fn new(fetcher: Arc<Fetcher>, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn check(&self, name: &TargetName) -> PrecheckVerdict {
        let url = format!("{}{}", self.base_url, about_path(name.as_str()));

        let (status, body) = match self.fetcher.probe(&url).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Pre-check for r/{} inconclusive: {}", name, e);
                return PrecheckVerdict::Proceed;
            }
        };

        let reason = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.reason)
            .map(|r| r.to_lowercase());
        if let Some(reason) = reason.filter(|r| DEFINITIVE_REASONS.contains(&r.as_str())) {
            return PrecheckVerdict::Unavailable(reason);
        }

        // 403 is ambiguous: it may be a private community or just us being blocked.
        match status {
            404 => PrecheckVerdict::Unavailable("not found".to_string()),
            _ => PrecheckVerdict::Proceed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lurker_scanner::FetchConfig;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    async fn verdict_for(status: u16, body: serde_json::Value) -> PrecheckVerdict {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/alpha/about.json"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&mock_server)
            .await;

        let fetcher = Arc::new(Fetcher::new(FetchConfig::default()).unwrap());
        Prechecker::new(fetcher, &mock_server.uri())
            .check(&TargetName::new("alpha").unwrap())
            .await
    }

    #[tokio::test]
    async fn test_not_found_is_definitive() {
        let verdict = verdict_for(404, serde_json::json!({"message": "Not Found", "error": 404})).await;
        assert_eq!(verdict, PrecheckVerdict::Unavailable("not found".to_string()));
    }

    #[tokio::test]
    async fn test_banned_reason_is_definitive() {
        let verdict = verdict_for(404, serde_json::json!({"reason": "banned", "error": 404})).await;
        assert_eq!(verdict, PrecheckVerdict::Unavailable("banned".to_string()));
    }

    #[tokio::test]
    async fn test_forbidden_defers_to_scrape() {
        let verdict = verdict_for(403, serde_json::json!({"message": "Forbidden", "error": 403})).await;
        assert_eq!(verdict, PrecheckVerdict::Proceed);
    }

    #[tokio::test]
    async fn test_live_community_proceeds() {
        let verdict = verdict_for(
            200,
            serde_json::json!({"kind": "t5", "data": {"over18": true, "subscribers": 9000}}),
        )
        .await;
        assert_eq!(verdict, PrecheckVerdict::Proceed);
    }
}
