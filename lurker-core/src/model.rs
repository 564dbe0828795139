use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use lurker_scanner::PageMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalised community name. Case-insensitive; stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetName(String);

impl TargetName {
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix("/r/")
            .or_else(|| trimmed.strip_prefix("r/"))
            .unwrap_or(trimmed);

        let valid = !trimmed.is_empty()
            && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(CoreError::InvalidTarget(raw.to_string()));
        }

        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<TargetName> for String {
    fn from(name: TargetName) -> Self {
        name.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetStatus {
    Unqueued,
    Pending,
    InProgress,
    Completed,
    RetryScheduled,
    PermanentlyFailed,
}

impl TargetStatus {
    pub const ALL: [TargetStatus; 6] = [
        TargetStatus::Unqueued,
        TargetStatus::Pending,
        TargetStatus::InProgress,
        TargetStatus::Completed,
        TargetStatus::RetryScheduled,
        TargetStatus::PermanentlyFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Unqueued => "unqueued",
            TargetStatus::Pending => "pending",
            TargetStatus::InProgress => "in_progress",
            TargetStatus::Completed => "completed",
            TargetStatus::RetryScheduled => "retry_scheduled",
            TargetStatus::PermanentlyFailed => "permanently_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TargetStatus::Completed | TargetStatus::PermanentlyFailed)
    }

    /// Whether a scrape may pick this target up.
    pub fn is_claimable(&self) -> bool {
        matches!(self, TargetStatus::Pending | TargetStatus::RetryScheduled)
    }

    pub fn can_transition_to(&self, next: TargetStatus) -> bool {
        use TargetStatus::*;
        match (self, next) {
            (Unqueued, Pending) => true,
            (Pending, InProgress) => true,
            // Requeued and claimed in one step.
            (RetryScheduled, Pending | InProgress) => true,
            (InProgress, Completed | RetryScheduled | PermanentlyFailed) => true,
            // Left behind by a run that never finished.
            (InProgress, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        TargetStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::InvalidStatus(s.to_string()))
    }
}

/// Metrics stored for a completed target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMetrics {
    pub weekly_visitors: Option<u64>,
    pub weekly_contributions: Option<u64>,
    pub competition_score: Option<f64>,
}

impl From<&PageMetrics> for TargetMetrics {
    fn from(page: &PageMetrics) -> Self {
        Self {
            weekly_visitors: page.weekly_visitors,
            weekly_contributions: page.weekly_contributions,
            competition_score: page.competition_score(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: TargetName,
    pub subscribers: u64,
    pub status: TargetStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub metrics: TargetMetrics,
    pub description: Option<String>,
}

impl Target {
    pub fn new(name: TargetName, subscribers: u64) -> Self {
        Self {
            name,
            subscribers,
            status: TargetStatus::Pending,
            retry_count: 0,
            last_error: None,
            last_attempt_at: None,
            metrics: TargetMetrics::default(),
            description: None,
        }
    }
}

/// A community found while walking the graph, not yet admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryCandidate {
    pub name: TargetName,
    pub subscribers: u64,
    pub source: TargetName,
    pub adult: bool,
    pub description: Option<String>,
}

impl DiscoveryCandidate {
    /// Adult-flagged and at least `min_subscribers` large.
    pub fn is_admissible(&self, min_subscribers: u64) -> bool {
        self.adult && self.subscribers >= min_subscribers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_name_normalises() {
        assert_eq!(TargetName::new("  AlphaBeta ").unwrap().as_str(), "alphabeta");
        assert_eq!(TargetName::new("r/Gamma_2").unwrap().as_str(), "gamma_2");
        assert_eq!(TargetName::new("/r/delta").unwrap().as_str(), "delta");
        assert_eq!(TargetName::new("Alpha").unwrap(), TargetName::new("alpha").unwrap());
    }

    #[test]
    fn test_target_name_rejects_garbage() {
        assert!(TargetName::new("").is_err());
        assert!(TargetName::new("r/").is_err());
        assert!(TargetName::new("two words").is_err());
        assert!(TargetName::new("semi;colon").is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TargetStatus::ALL {
            assert_eq!(status.as_str().parse::<TargetStatus>().unwrap(), status);
        }
        assert!("failed".parse::<TargetStatus>().is_err());
    }

    #[test]
    fn test_terminal_states_are_never_left() {
        for terminal in [TargetStatus::Completed, TargetStatus::PermanentlyFailed] {
            for next in TargetStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        use TargetStatus::*;
        assert!(Unqueued.can_transition_to(Pending));
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(RetryScheduled));
        assert!(RetryScheduled.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!RetryScheduled.can_transition_to(PermanentlyFailed));
    }

    #[test]
    fn test_admission_filter() {
        let candidate = |adult, subscribers| DiscoveryCandidate {
            name: TargetName::new("alpha").unwrap(),
            subscribers,
            source: TargetName::new("seed").unwrap(),
            adult,
            description: None,
        };

        assert!(candidate(true, 5000).is_admissible(5000));
        assert!(!candidate(true, 4999).is_admissible(5000));
        assert!(!candidate(false, 1_000_000).is_admissible(5000));
    }
}
