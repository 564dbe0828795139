use crate::classify::Decision;
use crate::model::TargetStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for the batch scheduler.
#[derive(Debug)]
pub struct ScrapeStats {
    started: Instant,
    scraped: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScrapeSnapshot {
    pub scraped: u64,
    pub retried: u64,
    pub failed: u64,
    pub runtime_secs: u64,
    pub rate_per_hour: f64,
}

impl ScrapeStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            scraped: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn record(&self, decision: &Decision) {
        let counter = match decision.status {
            TargetStatus::Completed => &self.scraped,
            TargetStatus::RetryScheduled => &self.retried,
            TargetStatus::PermanentlyFailed => &self.failed,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ScrapeSnapshot {
        let runtime = self.started.elapsed();
        let scraped = self.scraped.load(Ordering::Relaxed);
        let hours = runtime.as_secs_f64() / 3600.0;

        ScrapeSnapshot {
            scraped,
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            runtime_secs: runtime.as_secs(),
            rate_per_hour: if hours > 0.0 { scraped as f64 / hours } else { 0.0 },
        }
    }

    pub fn log(&self) {
        let s = self.snapshot();
        info!(
            scraped = s.scraped,
            retried = s.retried,
            failed = s.failed,
            "Stats: {} scraped, {} retried, {} failed | runtime {:.1}h | rate {:.0}/hour",
            s.scraped,
            s.retried,
            s.failed,
            s.runtime_secs as f64 / 3600.0,
            s.rate_per_hour
        );
    }
}

impl Default for ScrapeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for the discovery walker.
#[derive(Debug, Default)]
pub struct DiscoveryStats {
    discovered: AtomicU64,
    updated: AtomicU64,
    rejected: AtomicU64,
    passes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverySnapshot {
    pub discovered: u64,
    pub updated: u64,
    pub rejected: u64,
    pub passes: u64,
}

impl DiscoveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_updated(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiscoverySnapshot {
        DiscoverySnapshot {
            discovered: self.discovered.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
        }
    }

    pub fn log(&self) {
        let s = self.snapshot();
        info!(
            "Discovery: {} new, {} updated, {} rejected after {} passes",
            s.discovered, s.updated, s.rejected, s.passes
        );
    }
}

/// Everything persisted into the run record at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scrape: ScrapeSnapshot,
    pub discovery: DiscoverySnapshot,
    pub ip_rotations: u64,
}

impl RunSummary {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "scrape": self.scrape,
            "discovery": self.discovery,
            "ip_rotations": self.ip_rotations,
        })
    }
}
