use crate::model::{Target, TargetMetrics, TargetName, TargetStatus};
use lurker_scanner::PageMetrics;
use std::time::Duration;

pub const DEFAULT_RETRY_THRESHOLD: u32 = 3;

const DEFINITIVE_PREFIX: &str = "unavailable:";
const TRANSIENT_PREFIX: &str = "transient:";

/// How one scrape of a target ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeOutcome {
    /// The page rendered; metrics may still be empty.
    Success(PageMetrics),
    /// The page came back 403/429.
    Blocked(u16),
    TimedOut,
    /// No execution handle became free in time.
    PoolTimeout(Duration),
    /// Banned, private, deleted or quarantined.
    DefinitiveUnavailable(String),
    Error(String),
}

impl ScrapeOutcome {
    pub fn unavailable(reason: impl AsRef<str>) -> Self {
        ScrapeOutcome::DefinitiveUnavailable(definitive_annotation(reason.as_ref()))
    }

    fn transient_reason(&self) -> Option<String> {
        match self {
            ScrapeOutcome::Success(metrics) if metrics.is_empty() => Some("no metrics found".to_string()),
            ScrapeOutcome::Success(_) | ScrapeOutcome::DefinitiveUnavailable(_) => None,
            ScrapeOutcome::Blocked(status) => Some(format!("blocked with HTTP {}", status)),
            ScrapeOutcome::TimedOut => Some("timed out".to_string()),
            ScrapeOutcome::PoolTimeout(waited) => {
                Some(format!("no execution handle within {}s", waited.as_secs()))
            }
            ScrapeOutcome::Error(message) => Some(message.clone()),
        }
    }
}

/// What to write back for a target after one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub name: TargetName,
    pub status: TargetStatus,
    pub retry_count: u32,
    pub annotation: Option<String>,
    pub metrics: Option<TargetMetrics>,
}

impl Decision {
    pub fn is_retry(&self) -> bool {
        self.status == TargetStatus::RetryScheduled
    }

    pub fn is_permanent_failure(&self) -> bool {
        self.status == TargetStatus::PermanentlyFailed
    }
}

/// Maps an outcome plus the target's failure history to its next status.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    threshold: u32,
}

impl Classifier {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn classify(&self, target: &Target, outcome: &ScrapeOutcome) -> Decision {
        let decision = |status, retry_count, annotation, metrics| Decision {
            name: target.name.clone(),
            status,
            retry_count,
            annotation,
            metrics,
        };

        if let ScrapeOutcome::DefinitiveUnavailable(reason) = outcome {
            return decision(
                TargetStatus::PermanentlyFailed,
                target.retry_count,
                Some(definitive_annotation(reason)),
                None,
            );
        }

        let reason = match (outcome, outcome.transient_reason()) {
            (ScrapeOutcome::Success(metrics), None) => {
                return decision(
                    TargetStatus::Completed,
                    target.retry_count,
                    None,
                    Some(TargetMetrics::from(metrics)),
                );
            }
            (_, Some(reason)) => reason,
            (_, None) => "unknown failure".to_string(),
        };

        let failures = target.retry_count.saturating_add(1);
        if failures < self.threshold {
            decision(
                TargetStatus::RetryScheduled,
                failures,
                Some(format!(
                    "{} {} (attempt {}/{})",
                    TRANSIENT_PREFIX, reason, failures, self.threshold
                )),
                None,
            )
        } else {
            decision(
                TargetStatus::PermanentlyFailed,
                failures,
                Some(format!("exhausted retries after {} attempts: {}", failures, reason)),
                None,
            )
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_THRESHOLD)
    }
}

/// Annotation text for a definitive-unavailability signal.
pub fn definitive_annotation(reason: &str) -> String {
    if reason.starts_with(DEFINITIVE_PREFIX) {
        reason.to_string()
    } else {
        format!("{} {}", DEFINITIVE_PREFIX, reason)
    }
}

pub fn is_definitive_annotation(annotation: &str) -> bool {
    annotation.starts_with(DEFINITIVE_PREFIX)
}

/// SQL `LIKE` pattern matching definitive annotations.
pub fn definitive_annotation_pattern() -> String {
    format!("{}%", DEFINITIVE_PREFIX)
}
