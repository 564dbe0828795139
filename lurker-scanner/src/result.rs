use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a single network attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    /// 403 or 429: the requester's network identity is being throttled.
    Blocked(u16),
    /// Any other non-200 status.
    HttpStatus(u16),
    TimedOut,
    Transport(String),
}

/// One attempt inside a logical fetch. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub url: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

impl FetchAttempt {
    pub fn new(url: String, attempt: u32, outcome: AttemptOutcome, elapsed: Duration) -> Self {
        Self {
            url,
            attempt,
            outcome,
            elapsed,
        }
    }
}

/// A page rendered by a remote session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLoad {
    pub url: String,
    pub status_code: u16,
    pub title: Option<String>,
    pub body: String,
    pub response_time: Duration,
}

impl PageLoad {
    pub fn new(url: String, status_code: u16, body: String) -> Self {
        Self {
            url,
            status_code,
            title: None,
            body,
            response_time: Duration::from_secs(0),
        }
    }
}
