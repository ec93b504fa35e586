/*
[INPUT]:  Mock snapshot server URI and feed definitions
[OUTPUT]: Stream configurations and wait helpers for feed tests
[POS]:    Test infrastructure - shared across feed integration tests
[UPDATE]: When configuration shape or feed state fields change
*/

#![allow(dead_code)]

use std::time::Duration;

use coinmux_adapter::{ChannelPeer, ChannelPeers};
use coinmux_feeds::{FeedState, StreamConfig};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

/// Config pointing snapshots at `http_base`; the socket URL is never dialed.
pub fn stream_config(http_base: &str, initial_timeout_ms: u64, feeds_yaml: &str) -> StreamConfig {
    let yaml = format!(
        r#"
endpoints:
  ws_base_url: ws://127.0.0.1:9
  http_base_url: {http_base}
session:
  token: session-test
  account: acc-1
retry:
  initial_timeout_ms: {initial_timeout_ms}
feeds:
{feeds_yaml}
"#
    );
    StreamConfig::from_yaml_str(&yaml).expect("test config")
}

pub async fn wait_for_feed<F>(state: &mut watch::Receiver<FeedState>, predicate: F) -> FeedState
where
    F: FnMut(&FeedState) -> bool,
{
    timeout(WAIT, state.wait_for(predicate))
        .await
        .expect("timed out waiting for feed state")
        .expect("feed runner stopped")
        .clone()
}

pub async fn next_peer(peers: &mut ChannelPeers) -> ChannelPeer {
    timeout(WAIT, peers.next())
        .await
        .expect("timed out waiting for connect")
        .expect("connector dropped")
}

pub async fn next_frame(peer: &mut ChannelPeer) -> Option<Value> {
    timeout(WAIT, peer.next_outbound())
        .await
        .expect("timed out waiting for outbound frame")
}
