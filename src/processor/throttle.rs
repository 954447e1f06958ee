use std::time::Duration;
use tokio::time::Instant;

/// Minimum wall-clock spacing between live-view refreshes. Anything arriving
/// inside the window is dropped, not queued.
#[derive(Debug)]
pub struct RefreshThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RefreshThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
