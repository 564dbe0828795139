use crate::classify::{Classifier, Decision, ScrapeOutcome};
use crate::error::Result;
use crate::model::{Target, TargetStatus};
use crate::precheck::{PrecheckVerdict, Prechecker};
use crate::scrape::PageScraper;
use crate::stats::ScrapeStats;
use crate::store::TargetStore;
use lurker_scanner::{HandlePool, ScanError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    /// Watchdog for one target, from pre-check to classified outcome.
    pub task_timeout: Duration,
    pub acquire_timeout: Duration,
    pub batch_delay: Duration,
    pub idle_delay: Duration,
    pub min_subscribers: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 6,
            task_timeout: Duration::from_secs(180),
            acquire_timeout: Duration::from_secs(60),
            batch_delay: Duration::from_secs(2),
            idle_delay: Duration::from_secs(60),
            min_subscribers: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub fetched: usize,
    pub decisions: Vec<Decision>,
}

impl BatchReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }

    fn count(&self, status: TargetStatus) -> usize {
        self.decisions.iter().filter(|d| d.status == status).count()
    }
}

/// Everything one scrape task needs, shared across the batch.
struct TaskContext {
    pool: HandlePool,
    scraper: PageScraper,
    prechecker: Option<Prechecker>,
    acquire_timeout: Duration,
}

impl TaskContext {
    async fn scrape(&self, target: &Target) -> ScrapeOutcome {
        if let Some(prechecker) = &self.prechecker {
            if let PrecheckVerdict::Unavailable(reason) = prechecker.check(&target.name).await {
                info!("[X] r/{}: pre-check says {}", target.name, reason);
                return ScrapeOutcome::unavailable(reason);
            }
        }

        let handle = match self.pool.acquire(self.acquire_timeout).await {
            Ok(handle) => handle,
            Err(ScanError::PoolTimeout(waited)) => {
                warn!("No handle free for r/{} after {:?}", target.name, waited);
                return ScrapeOutcome::PoolTimeout(waited);
            }
            Err(e) => return ScrapeOutcome::Error(e.to_string()),
        };

        self.scraper.scrape(&handle, &target.name).await
    }
}

/// Pulls pending targets in bounded batches and scrapes each one on a pooled
/// handle.
pub struct BatchScheduler {
    store: Arc<dyn TargetStore>,
    context: Arc<TaskContext>,
    classifier: Classifier,
    config: SchedulerConfig,
    stats: Arc<ScrapeStats>,
}

impl BatchScheduler {
    pub fn new(
        store: Arc<dyn TargetStore>,
        pool: HandlePool,
        scraper: PageScraper,
        classifier: Classifier,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            context: Arc::new(TaskContext {
                pool,
                scraper,
                prechecker: None,
                acquire_timeout: config.acquire_timeout,
            }),
            classifier,
            config,
            stats: Arc::new(ScrapeStats::new()),
        }
    }

    /// Must be called before the scheduler is shared.
    pub fn with_prechecker(mut self, prechecker: Prechecker) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.prechecker = Some(prechecker);
        }
        self
    }

    pub fn with_stats(mut self, stats: Arc<ScrapeStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<ScrapeStats> {
        &self.stats
    }

    /// Fetch, scrape and classify one batch. Waits for every task.
    pub async fn run_batch(&self) -> Result<BatchReport> {
        let targets = self
            .store
            .fetch_pending(self.config.batch_size, self.config.min_subscribers)
            .await?;
        if targets.is_empty() {
            return Ok(BatchReport::default());
        }

        info!("Processing batch of {} targets", targets.len());
        let mut report = BatchReport {
            fetched: targets.len(),
            decisions: Vec::with_capacity(targets.len()),
        };

        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();

        for mut target in targets {
            match self.store.claim(&target.name).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("r/{} was claimed elsewhere, skipping", target.name);
                    continue;
                }
                Err(e) => {
                    error!("Failed to claim r/{}: {}", target.name, e);
                    continue;
                }
            }
            target.status = TargetStatus::InProgress;

            let context = self.context.clone();
            let task_timeout = self.config.task_timeout;
            let task_target = target.clone();
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(task_timeout, context.scrape(&task_target)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("r/{}: task exceeded {:?}, abandoning", task_target.name, task_timeout);
                        ScrapeOutcome::TimedOut
                    }
                };
                (task_target.name, outcome)
            });
            in_flight.insert(target.name.clone(), target);
        }

        let mut outcomes = Vec::with_capacity(in_flight.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    if let Some(target) = in_flight.remove(&name) {
                        outcomes.push((target, outcome));
                    }
                }
                Err(e) => error!("Scrape task failed: {}", e),
            }
        }
        // Whatever is left belonged to a task that panicked.
        for (_, target) in in_flight.drain() {
            outcomes.push((target, ScrapeOutcome::Error("scrape task failed".to_string())));
        }

        for (target, outcome) in outcomes {
            let decision = self.classifier.classify(&target, &outcome);
            if let Err(e) = self.store.record(&decision).await {
                error!("Failed to record outcome for r/{}: {}", target.name, e);
                match self.store.requeue(&target.name).await {
                    Ok(_) => warn!("r/{} returned to the queue unrecorded", target.name),
                    Err(e) => error!("r/{} left in progress: {}", target.name, e),
                }
                continue;
            }
            if decision.is_retry() {
                debug!(
                    "r/{} scheduled for retry ({}/{})",
                    target.name,
                    decision.retry_count,
                    self.classifier.threshold()
                );
            } else if decision.is_permanent_failure() {
                warn!(
                    "r/{} permanently failed: {}",
                    target.name,
                    decision.annotation.as_deref().unwrap_or_default()
                );
            }
            self.stats.record(&decision);
            report.decisions.push(decision);
        }

        info!(
            completed = report.count(TargetStatus::Completed),
            retried = report.count(TargetStatus::RetryScheduled),
            failed = report.count(TargetStatus::PermanentlyFailed),
            "Batch complete"
        );
        Ok(report)
    }

    /// Run batches until the task is aborted.
    pub async fn run(self) {
        info!("Starting batch scheduler (batch size {})", self.config.batch_size);
        loop {
            match self.run_batch().await {
                Ok(report) if report.is_idle() => {
                    info!("No pending targets, waiting {:?}", self.config.idle_delay);
                    tokio::time::sleep(self.config.idle_delay).await;
                }
                Ok(_) => {
                    self.stats.log();
                    tokio::time::sleep(self.config.batch_delay).await;
                }
                Err(e) => {
                    error!("Batch failed: {}", e);
                    tokio::time::sleep(self.config.idle_delay).await;
                }
            }
        }
    }
}
