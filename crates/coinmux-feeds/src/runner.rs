/*
[INPUT]:  One feed definition, its family's multiplexer, the snapshot client
[OUTPUT]: Feed state kept fresh via fetch-then-subscribe with doubling backoff
[POS]:    Feeds layer - caller-side retry loop (one per feed, never shared)
[UPDATE]: When changing recovery order, backoff use or frame filtering
*/

use std::time::Duration;

use coinmux_adapter::ws::slot_of;
use coinmux_adapter::{CoinmuxClient, Handler, Multiplexer};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::feed::{FeedConfig, FeedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamExit {
    Reconnect,
    Shutdown,
}

/// Keeps one feed alive on top of a shared multiplexer.
///
/// The loop is: fetch a snapshot, subscribe for deltas, apply deltas for
/// this feed's slot until a reconnect notice arrives, then back off and
/// start over. Every wait ends early on shutdown.
#[derive(Debug)]
pub struct FeedRunner {
    name: String,
    feed: FeedConfig,
    mux: Multiplexer,
    client: CoinmuxClient,
    backoff: Backoff,
    state_tx: watch::Sender<FeedState>,
    shutdown: CancellationToken,
}

impl FeedRunner {
    pub fn new(
        name: impl Into<String>,
        feed: FeedConfig,
        mux: Multiplexer,
        client: CoinmuxClient,
        initial_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(FeedState::default());
        Self {
            name: name.into(),
            feed,
            mux,
            client,
            backoff: Backoff::new(initial_timeout),
            state_tx,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FeedState> {
        self.state_tx.subscribe()
    }

    pub async fn run(mut self) {
        let slot = self.feed.slot();
        let descriptor = self.feed.descriptor();
        let request = self.feed.snapshot_request();
        let (handler, mut frames) = Handler::channel();
        info!(feed = %self.name, family = %self.feed.family(), slot, "feed started");

        'run: loop {
            let fetch = self.client.fetch(&request);
            tokio::pin!(fetch);
            let fetched = loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break 'run,
                    fetched = &mut fetch => break fetched,
                    Some(_) = frames.recv() => {}
                }
            };

            let snapshot = match fetched {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    let mut wait = self.backoff.record_failure();
                    if let Some(secs) = err.retry_delay() {
                        wait = wait.max(Duration::from_secs(secs));
                    }
                    warn!(
                        feed = %self.name,
                        error = %err,
                        retry_in_ms = wait.as_millis() as u64,
                        "snapshot fetch failed; backing off"
                    );
                    self.state_tx
                        .send_modify(|state| state.record_failure(err.to_string(), wait));
                    if !self.pause(wait, &mut frames).await {
                        break 'run;
                    }
                    continue 'run;
                }
            };

            self.backoff.record_success();
            // deltas queued before this snapshot are already reflected in it
            while frames.try_recv().is_ok() {}
            self.state_tx.send_modify(|state| {
                state.apply_snapshot(snapshot);
                state.live = true;
            });
            self.mux.subscribe(descriptor.clone(), Some(handler.clone()));
            info!(feed = %self.name, slot, "snapshot loaded; subscribed");

            match self.stream(slot, &mut frames).await {
                StreamExit::Shutdown => break 'run,
                StreamExit::Reconnect => {
                    let wait = self.backoff.record_failure();
                    info!(
                        feed = %self.name,
                        retry_in_ms = wait.as_millis() as u64,
                        "reconnect notice; refreshing after backoff"
                    );
                    self.state_tx.send_modify(|state| state.record_reconnect(wait));
                    if !self.pause(wait, &mut frames).await {
                        break 'run;
                    }
                }
            }
        }

        self.mux.release(slot);
        self.state_tx.send_modify(|state| {
            state.live = false;
            state.retry_in = None;
        });
        info!(feed = %self.name, "feed stopped");
    }

    /// Apply this slot's frames until the socket goes away or shutdown.
    async fn stream(&self, slot: &str, frames: &mut mpsc::UnboundedReceiver<Value>) -> StreamExit {
        let discriminator = self.mux.config().discriminator_field.as_str();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return StreamExit::Shutdown,
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        return StreamExit::Shutdown;
                    };
                    if self.mux.is_reconnect(&frame) {
                        return StreamExit::Reconnect;
                    }
                    if slot_of(&frame, discriminator) == Some(slot) {
                        self.state_tx.send_modify(|state| state.apply_event(frame));
                    } else {
                        debug!(feed = %self.name, "frame for another slot ignored");
                    }
                }
            }
        }
    }

    /// Cancellable wait that discards frames fanned out meanwhile; false means shutdown won.
    async fn pause(&self, wait: Duration, frames: &mut mpsc::UnboundedReceiver<Value>) -> bool {
        let deadline = sleep(wait);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = &mut deadline => return true,
                Some(_) = frames.recv() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use coinmux_adapter::{ChannelConnector, ChannelPeers, FamilyConfig, SubscriptionDescriptor};
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        runner: FeedRunner,
        mux: Multiplexer,
        connector: ChannelConnector,
        peers: ChannelPeers,
    }

    fn fixture(server: &MockServer, shutdown: CancellationToken) -> Fixture {
        let (connector, peers) = ChannelConnector::new();
        let family = FamilyConfig::public(Url::parse("ws://127.0.0.1:9").unwrap());
        let mux = Multiplexer::spawn(family, Arc::new(connector.clone()), None).unwrap();
        let client = CoinmuxClient::new(&server.uri()).unwrap();
        let feed = FeedConfig::OrderBook {
            exchange: "BINANCE".to_string(),
            pair: "BTC/USD".to_string(),
        };
        Fixture {
            runner: FeedRunner::new("book", feed, mux.clone(), client, Duration::from_secs(60), shutdown),
            mux,
            connector,
            peers,
        }
    }

    #[tokio::test]
    async fn runner_backoff_wait_is_cancellable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/public/orderbook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let shutdown = CancellationToken::new();
        let fixture = fixture(&server, shutdown.clone());
        let mut state = fixture.runner.subscribe_state();
        let handle = tokio::spawn(fixture.runner.run());

        state.wait_for(|state| state.failures == 1).await.unwrap();
        assert_eq!(state.borrow().retry_in, Some(Duration::from_secs(60)));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("runner should stop during its backoff wait")
            .unwrap();
        fixture.mux.snapshot().await.unwrap();
        assert_eq!(fixture.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn runner_subscribes_after_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/public/orderbook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bids": [], "asks": []})))
            .mount(&server)
            .await;

        let shutdown = CancellationToken::new();
        let fixture = fixture(&server, shutdown.clone());
        let mut state = fixture.runner.subscribe_state();
        let handle = tokio::spawn(fixture.runner.run());

        state.wait_for(|state| state.live).await.unwrap();
        assert_eq!(state.borrow().snapshot, Some(json!({"bids": [], "asks": []})));

        shutdown.cancel();
        handle.await.unwrap();
        let snapshot = fixture.mux.snapshot().await.unwrap();
        assert_eq!(fixture.connector.connect_count(), 1);
        assert!(snapshot.slots.iter().all(|slot| slot.descriptor.is_none() && !slot.has_handler));
        assert!(!state.borrow().live);
    }

    /// Frames fan out in delivery order, so seeing `marker` means every earlier frame arrived.
    async fn wait_for_marker(watcher: &mut mpsc::UnboundedReceiver<Value>, marker: &Value) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(frame) = watcher.recv().await {
                if &frame == marker {
                    return;
                }
            }
        })
        .await
        .expect("marker frame fanned out");
    }

    #[tokio::test]
    async fn backoff_discards_frames_from_shared_socket() {
        let server = MockServer::start().await;
        let Fixture {
            runner,
            mux,
            mut peers,
            ..
        } = fixture(&server, CancellationToken::new());

        let (handler, mut frames) = Handler::channel();
        let (watcher, mut watched) = Handler::channel();
        mux.subscribe(SubscriptionDescriptor::new("priceStream"), Some(handler));
        mux.subscribe(SubscriptionDescriptor::new("tradeStream"), Some(watcher));
        let peer = tokio::time::timeout(Duration::from_secs(2), peers.next())
            .await
            .expect("connect")
            .expect("peer");
        peer.open();

        let price = json!({"subscriptionType": "priceStream", "price": 1});
        let first_marker = json!({"subscriptionType": "tradeStream", "marker": 1});
        for _ in 0..1_000 {
            peer.deliver_json(&price);
        }
        peer.deliver_json(&first_marker);
        wait_for_marker(&mut watched, &first_marker).await;
        assert_eq!(frames.len(), 1_001);

        let second_marker = json!({"subscriptionType": "tradeStream", "marker": 2});
        let (resumed, _) = tokio::join!(runner.pause(Duration::from_millis(500), &mut frames), async {
            for _ in 0..1_000 {
                peer.deliver_json(&price);
            }
            peer.deliver_json(&second_marker);
            wait_for_marker(&mut watched, &second_marker).await;
        });

        assert!(resumed);
        assert!(frames.is_empty());
    }
}
