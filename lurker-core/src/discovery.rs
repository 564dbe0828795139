use crate::error::Result;
use crate::model::{DiscoveryCandidate, TargetName};
use crate::seen::SeenSet;
use crate::stats::DiscoveryStats;
use crate::store::TargetStore;
use lurker_scanner::Fetcher;
use lurker_scanner::listing::{About, PostListing, about_path, new_posts_path, submitted_path};
use rand::seq::IndexedRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub base_url: String,
    pub seeds_per_pass: usize,
    pub authors_per_seed: usize,
    pub min_subscribers: u64,
    /// Pause after each contributor's history is processed.
    pub candidate_delay: Duration,
    pub seed_delay: Duration,
    /// Sleep when the store has no seeds yet.
    pub idle_delay: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com".to_string(),
            seeds_per_pass: 10,
            authors_per_seed: 5,
            min_subscribers: 5000,
            candidate_delay: Duration::from_millis(500),
            seed_delay: Duration::from_secs(1),
            idle_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub seeds: usize,
    pub authors: usize,
    pub evaluated: usize,
    pub admitted: Vec<TargetName>,
}

/// Walks seed → recent contributors → their other communities, admitting
/// new adult-flagged communities above the size threshold.
pub struct DiscoveryWalker {
    fetcher: Arc<Fetcher>,
    store: Arc<dyn TargetStore>,
    seen: Arc<SeenSet>,
    config: DiscoveryConfig,
    stats: Arc<DiscoveryStats>,
}

impl DiscoveryWalker {
    pub fn new(
        fetcher: Arc<Fetcher>,
        store: Arc<dyn TargetStore>,
        seen: Arc<SeenSet>,
        mut config: DiscoveryConfig,
    ) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            fetcher,
            store,
            seen,
            config,
            stats: Arc::new(DiscoveryStats::new()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<DiscoveryStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<DiscoveryStats> {
        &self.stats
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    pub async fn run_pass(&self) -> Result<PassReport> {
        let seeds = self.store.sample_seeds(self.config.seeds_per_pass).await?;
        let mut report = PassReport {
            seeds: seeds.len(),
            ..PassReport::default()
        };
        // Names already looked up this pass, admitted or not.
        let mut evaluated: HashSet<TargetName> = HashSet::new();

        for (i, seed) in seeds.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.seed_delay).await;
            }

            let Some(listing) = self.fetcher.fetch_json::<PostListing>(&self.url(&new_posts_path(seed.as_str()))).await
            else {
                continue;
            };

            let authors = listing.data.authors();
            info!("Found {} authors in r/{}", authors.len(), seed);
            let sampled: Vec<String> = {
                let mut rng = rand::rng();
                authors
                    .choose_multiple(&mut rng, self.config.authors_per_seed)
                    .cloned()
                    .collect()
            };

            for author in sampled {
                report.authors += 1;
                self.walk_author(seed, &author, &mut evaluated, &mut report).await;
                tokio::time::sleep(self.config.candidate_delay).await;
            }
        }

        self.stats.add_pass();
        Ok(report)
    }

    async fn walk_author(
        &self,
        seed: &TargetName,
        author: &str,
        evaluated: &mut HashSet<TargetName>,
        report: &mut PassReport,
    ) {
        let Some(history) = self.fetcher.fetch_json::<PostListing>(&self.url(&submitted_path(author))).await else {
            return;
        };

        for raw in history.data.adult_communities() {
            let Ok(name) = TargetName::new(&raw) else {
                debug!("Skipping unusable community name {:?}", raw);
                continue;
            };
            if self.seen.contains(&name).await || !evaluated.insert(name.clone()) {
                continue;
            }
            report.evaluated += 1;

            if let Some(candidate) = self.evaluate(&name, seed).await {
                if self.admit(candidate).await {
                    report.admitted.push(name);
                }
            }
        }
    }

    /// Fetch summary info and apply the admission filter.
    async fn evaluate(&self, name: &TargetName, seed: &TargetName) -> Option<DiscoveryCandidate> {
        let about = self.fetcher.fetch_json::<About>(&self.url(&about_path(name.as_str()))).await?;

        let candidate = DiscoveryCandidate {
            name: name.clone(),
            subscribers: about.data.subscribers.unwrap_or(0),
            source: seed.clone(),
            adult: about.data.over18,
            description: about.data.public_description.filter(|d| !d.is_empty()),
        };

        if candidate.is_admissible(self.config.min_subscribers) {
            Some(candidate)
        } else {
            debug!(
                "Rejected r/{} (adult: {}, {} subscribers)",
                name, candidate.adult, candidate.subscribers
            );
            self.stats.add_rejected();
            None
        }
    }

    async fn admit(&self, candidate: DiscoveryCandidate) -> bool {
        if !self.seen.insert_if_new(&candidate.name).await {
            return false;
        }

        match self.store.enqueue(&candidate).await {
            Ok(true) => {
                info!(
                    "[NEW] r/{} ({} subscribers) via r/{}",
                    candidate.name, candidate.subscribers, candidate.source
                );
                self.stats.add_discovered();
                true
            }
            Ok(false) => {
                self.stats.add_updated();
                true
            }
            Err(e) => {
                error!("Error adding r/{} to queue: {}", candidate.name, e);
                false
            }
        }
    }

    /// Walk forever, sleeping when the store has nothing to seed from.
    pub async fn run(self) {
        info!("Starting discovery walker");
        loop {
            match self.run_pass().await {
                Ok(report) if report.seeds == 0 => {
                    info!("No targets to seed discovery from. Waiting {:?}...", self.config.idle_delay);
                    tokio::time::sleep(self.config.idle_delay).await;
                }
                Ok(report) => {
                    info!(
                        "Discovery pass done: {} seeds, {} authors, {} new targets",
                        report.seeds,
                        report.authors,
                        report.admitted.len()
                    );
                    self.stats.log();
                }
                Err(e) => {
                    error!("Discovery pass failed: {}", e);
                    tokio::time::sleep(self.config.idle_delay).await;
                }
            }
        }
    }
}
