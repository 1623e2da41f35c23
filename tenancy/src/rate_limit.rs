use atheneum_core::error::{AtheneumError, ErrorKind};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("rate limit exceeded for {operation}")]
pub struct RateLimitExceeded {
    pub operation: String,
}

impl AtheneumError for RateLimitExceeded {
    fn error_kind(&self) -> ErrorKind {
        ErrorKind::RateLimited
    }
}

/// Fixed-window limiter keyed by (operation, subject). Operations without a
/// configured limit always pass.
pub struct RateLimiter {
    window: Duration,
    limits: HashMap<String, u32>,
    hits: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            limits: HashMap::new(),
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Standard per-minute windows for the service boundary.
    pub fn with_default_limits() -> Self {
        Self::new(Duration::from_secs(60))
            .with_limit("create", 10)
            .with_limit("list", 60)
            .with_limit("query", 30)
            .with_limit("ingest", 20)
    }

    pub fn with_limit(mut self, operation: impl Into<String>, max_per_window: u32) -> Self {
        self.limits.insert(operation.into(), max_per_window);
        self
    }

    pub fn allow(&self, operation: &str, subject: &str) -> Result<(), RateLimitExceeded> {
        let Some(limit) = self.limits.get(operation).copied() else {
            return Ok(());
        };

        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap();
        let window = hits
            .entry((operation.to_string(), subject.to_string()))
            .or_default();

        while window
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) > self.window)
        {
            window.pop_front();
        }

        if window.len() >= limit as usize {
            return Err(RateLimitExceeded {
                operation: operation.to_string(),
            });
        }
        window.push_back(now);
        Ok(())
    }

    /// Forgets a subject entirely, e.g. when its project is deleted.
    pub fn forget_subject(&self, subject: &str) {
        let mut hits = self.hits.lock().unwrap();
        hits.retain(|(_, tracked), _| tracked != subject);
    }
}
