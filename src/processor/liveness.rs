use std::time::Duration;
use tokio::time::Instant;

/// Dead-man's switch over the location feed: a connection is considered lost
/// once nothing has arrived for `stale_after`.
#[derive(Debug)]
pub struct LivenessMonitor {
    stale_after: Duration,
    last_received: Option<Instant>,
}

impl LivenessMonitor {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            last_received: None,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_received = Some(now);
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_received {
            Some(last) => now.saturating_duration_since(last) > self.stale_after,
            None => true,
        }
    }
}
