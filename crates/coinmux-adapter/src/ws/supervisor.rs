/*
[INPUT]:  Close/error events of the current and orphaned connection handles
[OUTPUT]: Reconnect notifications for fan-out, cleared transient slots
[POS]:    WebSocket layer - reconnection supervision (no resubscribe from here)
[UPDATE]: When changing close/error handling or the error grace policy
*/

use std::future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

use super::connection::ConnectionHandle;
use super::family::FamilyConfig;
use super::message::reconnect_payload;
use super::registry::SubscriptionRegistry;

/// Turns socket loss into a reconnect notification.
///
/// Callers re-subscribe from their own retry loops; nothing is re-sent here.
#[derive(Debug)]
pub(crate) struct ReconnectSupervisor {
    grace: Option<Duration>,
    /// Handle cleared by an error, still watched for its close.
    pub(crate) orphan: Option<ConnectionHandle>,
    deadline: Option<Instant>,
    notices: u64,
}

impl ReconnectSupervisor {
    pub(crate) fn new(grace: Option<Duration>) -> Self {
        Self {
            grace,
            orphan: None,
            deadline: None,
            notices: 0,
        }
    }

    pub(crate) fn notices(&self) -> u64 {
        self.notices
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Park a handle that reported an error. A later orphan replaces an earlier one.
    pub(crate) fn park(&mut self, family: &str, handle: ConnectionHandle) {
        if let Some(previous) = self.orphan.replace(handle) {
            warn!(family, connection_id = previous.id(), "orphaned ws handle discarded without close");
        }
        self.deadline = self.grace.map(|grace| Instant::now() + grace);
    }

    /// The orphan reported its close.
    pub(crate) fn settle(&mut self) -> Option<ConnectionHandle> {
        self.deadline = None;
        self.orphan.take()
    }

    /// The orphan stayed silent past the grace period.
    pub(crate) fn expire(&mut self, family: &str) {
        if let Some(orphan) = self.settle() {
            warn!(
                family,
                connection_id = orphan.id(),
                "ws error not followed by close; treating as close"
            );
        }
    }

    pub(crate) fn reset(&mut self) {
        self.orphan = None;
        self.deadline = None;
    }

    /// Build the reconnect notice and drop slots that restart clean.
    pub(crate) fn notice(
        &mut self,
        config: &FamilyConfig,
        registry: &mut SubscriptionRegistry,
    ) -> Value {
        let cleared = registry.clear_transient();
        self.notices += 1;
        info!(
            family = %config.name,
            notices = self.notices,
            cleared = ?cleared,
            "ws connection lost; notifying handlers"
        );
        reconnect_payload(config)
    }
}

pub(crate) async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
