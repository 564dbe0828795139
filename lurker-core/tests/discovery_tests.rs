// Tests for the discovery walker against a mocked listing API

use lurker_core::{DiscoveryCandidate, DiscoveryConfig, DiscoveryWalker, SeenSet, SqliteStore, TargetName, TargetStatus, TargetStore};
use lurker_scanner::{FetchConfig, Fetcher, RetryTiming};
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn name(raw: &str) -> TargetName {
    TargetName::new(raw).unwrap()
}

fn fast_fetcher() -> Arc<Fetcher> {
    let config = FetchConfig {
        timeout: Duration::from_secs(5),
        max_retries: 1,
        timing: RetryTiming {
            backoff_base: Duration::from_millis(1),
            block_cooldown: Duration::from_millis(1),
            timeout_cooldown: Duration::from_millis(1),
            error_delay: Duration::from_millis(1),
        },
        ..FetchConfig::default()
    };
    Arc::new(Fetcher::new(config).unwrap())
}

fn config(base_url: &str) -> DiscoveryConfig {
    DiscoveryConfig {
        base_url: base_url.to_string(),
        seeds_per_pass: 10,
        authors_per_seed: 5,
        min_subscribers: 5000,
        candidate_delay: Duration::ZERO,
        seed_delay: Duration::ZERO,
        idle_delay: Duration::from_millis(1),
    }
}

fn listing(posts: &[(&str, &str, bool)]) -> serde_json::Value {
    let children: Vec<serde_json::Value> = posts
        .iter()
        .map(|(author, subreddit, over_18)| {
            serde_json::json!({
                "kind": "t3",
                "data": {"author": author, "subreddit": subreddit, "over_18": over_18}
            })
        })
        .collect();
    serde_json::json!({"kind": "Listing", "data": {"children": children}})
}

fn about(over18: bool, subscribers: u64) -> serde_json::Value {
    serde_json::json!({
        "kind": "t5",
        "data": {"over18": over18, "subscribers": subscribers, "public_description": "desc"}
    })
}

async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(times)
        .mount(server)
        .await;
}

async fn seeded_store(raw: &str) -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    store
        .enqueue(&DiscoveryCandidate {
            name: name(raw),
            subscribers: 20_000,
            source: name(raw),
            adult: true,
            description: None,
        })
        .await
        .unwrap();
    store
}

/// alpha's recent posters are ann and bob; between them they post in one
/// admissible community and several that must be rejected or skipped.
async fn mount_graph(server: &MockServer) {
    mount_json(
        server,
        "/r/alpha/new.json",
        listing(&[("ann", "alpha", true), ("[deleted]", "alpha", true), ("bob", "alpha", true)]),
        1,
    )
    .await;
    mount_json(
        server,
        "/user/ann/submitted.json",
        listing(&[
            ("ann", "BigAdult", true),
            ("ann", "smalladult", true),
            ("ann", "cooking", false),
            ("ann", "alpha", true),
        ]),
        1,
    )
    .await;
    mount_json(
        server,
        "/user/bob/submitted.json",
        listing(&[("bob", "bigadult", true), ("bob", "notadult", true)]),
        1,
    )
    .await;

    mount_json(server, "/r/bigadult/about.json", about(true, 10_000), 1).await;
    mount_json(server, "/r/smalladult/about.json", about(true, 4999), 1).await;
    mount_json(server, "/r/notadult/about.json", about(false, 50_000), 1).await;
    mount_json(server, "/r/cooking/about.json", about(false, 1_000_000), 0).await;
    mount_json(server, "/r/alpha/about.json", about(true, 20_000), 0).await;
}

// ============================================================================
// Admission Tests
// ============================================================================

#[tokio::test]
async fn test_pass_admits_only_adult_and_large_enough() {
    let server = MockServer::start().await;
    mount_graph(&server).await;
    let store = seeded_store("alpha").await;
    let seen = Arc::new(SeenSet::bootstrap(store.as_ref()).await.unwrap());

    let walker = DiscoveryWalker::new(fast_fetcher(), store.clone(), seen.clone(), config(&server.uri()));
    let report = walker.run_pass().await.unwrap();

    assert_eq!(report.seeds, 1);
    assert_eq!(report.authors, 2);
    assert_eq!(report.admitted, vec![name("bigadult")]);

    let admitted = store.get(&name("bigadult")).await.unwrap().unwrap();
    assert_eq!(admitted.status, TargetStatus::Pending);
    assert_eq!(admitted.subscribers, 10_000);
    assert!(seen.contains(&name("bigadult")).await);

    assert!(store.get(&name("smalladult")).await.unwrap().is_none());
    assert!(store.get(&name("notadult")).await.unwrap().is_none());
    assert!(!seen.contains(&name("notadult")).await);

    let stats = walker.stats().snapshot();
    assert_eq!(stats.discovered, 1);
    assert_eq!(stats.rejected, 2);
}

#[tokio::test]
async fn test_seen_names_are_not_fetched_again() {
    let server = MockServer::start().await;
    mount_json(&server, "/r/alpha/new.json", listing(&[("ann", "alpha", true)]), 1).await;
    mount_json(
        &server,
        "/user/ann/submitted.json",
        listing(&[("ann", "known", true), ("ann", "alpha", true)]),
        1,
    )
    .await;
    mount_json(&server, "/r/known/about.json", about(true, 90_000), 0).await;

    let store = seeded_store("alpha").await;
    let seen = Arc::new(SeenSet::bootstrap(store.as_ref()).await.unwrap());
    seen.insert_if_new(&name("known")).await;

    let walker = DiscoveryWalker::new(fast_fetcher(), store.clone(), seen, config(&server.uri()));
    let report = walker.run_pass().await.unwrap();

    assert!(report.admitted.is_empty());
    assert_eq!(report.evaluated, 0);
    assert!(store.get(&name("known")).await.unwrap().is_none());
}

// ============================================================================
// Degraded Input Tests
// ============================================================================

#[tokio::test]
async fn test_empty_store_yields_no_seeds() {
    let server = MockServer::start().await;
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let seen = Arc::new(SeenSet::new());

    let walker = DiscoveryWalker::new(fast_fetcher(), store, seen, config(&server.uri()));
    let report = walker.run_pass().await.unwrap();

    assert_eq!(report.seeds, 0);
    assert!(report.admitted.is_empty());
}

#[tokio::test]
async fn test_failed_listing_skips_seed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/alpha/new.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = seeded_store("alpha").await;
    let seen = Arc::new(SeenSet::bootstrap(store.as_ref()).await.unwrap());
    let walker = DiscoveryWalker::new(fast_fetcher(), store, seen, config(&server.uri()));

    let report = walker.run_pass().await.unwrap();
    assert_eq!(report.seeds, 1);
    assert_eq!(report.authors, 0);
}
