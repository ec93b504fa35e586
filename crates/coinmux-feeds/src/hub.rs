/*
[INPUT]:  Validated stream configuration and a socket connector
[OUTPUT]: One multiplexer per used family, one runner task per feed, state receivers
[POS]:    Feeds layer - orchestration and graceful shutdown
[UPDATE]: When changing startup wiring or shutdown sequencing
*/

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use coinmux_adapter::{
    CoinmuxClient, ConnectionState, Connector, FamilyKind, Multiplexer, TokenSource,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StreamConfig;
use crate::feed::FeedState;
use crate::runner::FeedRunner;

/// Published view of one running feed.
#[derive(Debug, Clone)]
pub struct FeedStatus {
    pub name: String,
    pub family: FamilyKind,
    pub slot: &'static str,
    pub state: watch::Receiver<FeedState>,
}

/// Owns the shared multiplexers and the per-feed runner tasks.
#[derive(Debug)]
pub struct FeedHub {
    multiplexers: Vec<(FamilyKind, Multiplexer)>,
    feeds: Vec<FeedStatus>,
    tasks: Vec<(String, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl FeedHub {
    /// Start every configured feed. Needs a running Tokio runtime.
    pub fn start(config: &StreamConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Self::start_with_shutdown(config, connector, CancellationToken::new())
    }

    pub fn start_with_shutdown(
        config: &StreamConfig,
        connector: Arc<dyn Connector>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let tokens: Option<Arc<dyn TokenSource>> = config
            .token_store()?
            .map(|store| Arc::new(store) as Arc<dyn TokenSource>);

        let mut client =
            CoinmuxClient::with_config(config.client_config(), &config.endpoints.http_base_url)
                .context("build snapshot client")?;
        if let Some(tokens) = &tokens {
            client = client.with_token_source(tokens.clone());
        }

        let mut multiplexers = Vec::new();
        for kind in config.families() {
            let family = config.family(kind)?;
            let mux = Multiplexer::spawn(family, connector.clone(), tokens.clone())
                .with_context(|| format!("start {kind} multiplexer"))?;
            multiplexers.push((kind, mux));
        }

        let mut hub = Self {
            multiplexers,
            feeds: Vec::new(),
            tasks: Vec::new(),
            shutdown,
        };

        for entry in &config.feeds {
            let name = entry.name();
            let family = entry.feed.family();
            let mux = hub
                .multiplexer(family)
                .cloned()
                .ok_or_else(|| anyhow!("no multiplexer for family {family}"))?;

            let runner = FeedRunner::new(
                name.clone(),
                entry.feed.clone(),
                mux,
                client.clone(),
                config.initial_timeout(),
                hub.shutdown.child_token(),
            );
            hub.feeds.push(FeedStatus {
                name: name.clone(),
                family,
                slot: entry.feed.slot(),
                state: runner.subscribe_state(),
            });
            hub.tasks.push((name, tokio::spawn(runner.run())));
        }

        info!(
            families = hub.multiplexers.len(),
            feeds = hub.feeds.len(),
            "feed hub started"
        );
        Ok(hub)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn feeds(&self) -> &[FeedStatus] {
        &self.feeds
    }

    pub fn feed_state(&self, name: &str) -> Option<watch::Receiver<FeedState>> {
        self.feeds
            .iter()
            .find(|feed| feed.name == name)
            .map(|feed| feed.state.clone())
    }

    pub fn multiplexer(&self, family: FamilyKind) -> Option<&Multiplexer> {
        self.multiplexers
            .iter()
            .find(|(kind, _)| *kind == family)
            .map(|(_, mux)| mux)
    }

    pub fn connection_states(&self) -> Vec<(FamilyKind, watch::Receiver<ConnectionState>)> {
        self.multiplexers
            .iter()
            .map(|(kind, mux)| (*kind, mux.connection_state()))
            .collect()
    }

    /// Stop runners, let their releases reach the sockets, then stop the multiplexers.
    pub async fn shutdown_and_wait(mut self, timeout: Duration) -> Result<()> {
        self.shutdown.cancel();
        let deadline = Instant::now() + timeout;

        let mut tasks = std::mem::take(&mut self.tasks);
        while let Some((name, mut handle)) = tasks.pop() {
            tokio::select! {
                res = &mut handle => {
                    if let Err(join_err) = res {
                        abort_all(tasks);
                        self.stop_multiplexers();
                        if join_err.is_panic() {
                            return Err(anyhow!("feed {name} panicked: {join_err}"));
                        }
                        return Err(anyhow!("feed {name} join error: {join_err}"));
                    }
                }
                _ = sleep_until(deadline) => {
                    handle.abort();
                    abort_all(tasks);
                    self.stop_multiplexers();
                    return Err(anyhow!("shutdown timed out after {timeout:?}"));
                }
            }
        }

        // snapshot round-trips flush queued releases before the workers stop
        for (kind, mux) in &self.multiplexers {
            if timeout_at(deadline, mux.snapshot()).await.is_err() {
                warn!(family = %kind, "multiplexer did not drain before shutdown deadline");
            }
        }
        self.stop_multiplexers();
        info!("feed hub stopped");
        Ok(())
    }

    fn stop_multiplexers(&self) {
        for (_, mux) in &self.multiplexers {
            mux.shutdown();
        }
    }
}

impl Drop for FeedHub {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.stop_multiplexers();
    }
}

fn abort_all(tasks: Vec<(String, JoinHandle<()>)>) {
    for (_name, handle) in tasks {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinmux_adapter::ChannelConnector;

    const CONFIG: &str = r#"
endpoints:
  ws_base_url: ws://127.0.0.1:9
  http_base_url: http://127.0.0.1:9
session:
  token: session-abc
feeds:
  - kind: ticker
    exchanges: [BINANCE]
    pairs: [BTC/USD]
  - kind: order_book
    exchange: BINANCE
    pair: BTC/USD
  - kind: orders
    account_id: acc-1
"#;

    #[test]
    fn hub_needs_runtime() {
        let config = StreamConfig::from_yaml_str(CONFIG).unwrap();
        let (connector, _peers) = ChannelConnector::new();
        assert!(FeedHub::start(&config, Arc::new(connector)).is_err());
    }

    #[tokio::test]
    async fn hub_builds_one_multiplexer_per_family() {
        let config = StreamConfig::from_yaml_str(CONFIG).unwrap();
        let (connector, _peers) = ChannelConnector::new();
        let hub = FeedHub::start(&config, Arc::new(connector)).unwrap();

        assert_eq!(hub.connection_states().len(), 2);
        assert!(hub.multiplexer(FamilyKind::Public).is_some());
        assert!(hub.multiplexer(FamilyKind::Algo).is_none());
        assert_eq!(hub.feeds().len(), 3);
        assert_eq!(hub.feeds()[2].slot, "orderStream");
        assert!(hub.feed_state("orders:acc-1").is_some());

        hub.shutdown_and_wait(Duration::from_secs(2)).await.unwrap();
    }
}
