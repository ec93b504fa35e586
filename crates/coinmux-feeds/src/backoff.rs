/*
[INPUT]:  Snapshot fetch outcomes and reconnect notifications of one feed
[OUTPUT]: How long to wait before the next fetch-then-subscribe attempt
[POS]:    Feeds layer - per-feed retry delay
[UPDATE]: When changing retry cadence
*/

use std::time::Duration;

pub const INITIAL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Doubling retry delay owned by a single feed.
///
/// There is no cap: a feed that keeps failing waits longer each time until
/// one fetch succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Self {
            current: initial,
            initial,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// Wait to apply now; the next failure waits twice as long.
    pub fn record_failure(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.saturating_mul(2);
        wait
    }

    pub fn record_success(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_TIMEOUT)
    }
}
