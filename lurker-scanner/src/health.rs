use crate::error::ScanError;
use crate::pool::{ExecutionHandle, HandlePool};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Errors a session reports while it is mid-navigation for another task.
const BUSY_MARKERS: &[&str] = &["execution context was destroyed", "navigation"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleHealth {
    Healthy,
    Busy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: usize,
    pub busy: usize,
    pub unhealthy: usize,
}

/// Periodic liveness probe over every pooled handle.
///
/// Results only flip the handle's liveness flag and feed the logs; unhealthy
/// handles are never pulled out of the pool.
pub struct HealthSweep {
    pool: HandlePool,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthSweep {
    pub fn new(pool: HandlePool, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            pool,
            interval,
            probe_timeout,
        }
    }

    pub async fn check(&self, handle: &ExecutionHandle) -> HandleHealth {
        let health = match tokio::time::timeout(self.probe_timeout, handle.session().probe()).await {
            Ok(Ok(())) => HandleHealth::Healthy,
            Err(_) => HandleHealth::Busy,
            Ok(Err(e)) if is_busy_error(&e) => HandleHealth::Busy,
            Ok(Err(e)) => {
                warn!(handle = handle.id(), error = %e, "Handle failed health check");
                HandleHealth::Unhealthy
            }
        };

        match health {
            HandleHealth::Healthy => handle.set_live(true),
            HandleHealth::Unhealthy => handle.set_live(false),
            HandleHealth::Busy => {}
        }
        handle.record_health_check(Utc::now());
        health
    }

    pub async fn sweep_once(&self) -> HealthReport {
        let mut report = HealthReport::default();
        for handle in self.pool.handles() {
            match self.check(handle).await {
                HandleHealth::Healthy => report.healthy += 1,
                HandleHealth::Busy => report.busy += 1,
                HandleHealth::Unhealthy => report.unhealthy += 1,
            }
        }

        let stats = self.pool.stats();
        info!(
            healthy = report.healthy,
            busy = report.busy,
            unhealthy = report.unhealthy,
            in_use = stats.in_use,
            "Health check: {}/{} handles healthy",
            report.healthy,
            self.pool.size()
        );
        report
    }

    /// Sweep forever at the configured interval.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; handles were just probed at startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            debug!("Running handle health sweep");
            self.sweep_once().await;
        }
    }
}

fn is_busy_error(err: &ScanError) -> bool {
    let message = err.to_string().to_lowercase();
    BUSY_MARKERS.iter().any(|m| message.contains(m))
}
