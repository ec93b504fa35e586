/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and wait helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for coinmux-adapter tests
#![allow(dead_code)]

use std::time::Duration;

use coinmux_adapter::{ChannelPeer, ChannelPeers, ConnectionState, Multiplexer, MultiplexerSnapshot};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;
use wiremock::MockServer;

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(100);

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Mock session token for testing
pub fn mock_session_token() -> String {
    "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.test.signature".to_string()
}

pub fn ws_base() -> Url {
    Url::parse("wss://stream.test").expect("ws base url")
}

/// Next frame fanned out to a channel handler
pub async fn recv(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for handler frame")
        .expect("handler channel closed")
}

/// Assert a channel handler receives nothing for a short while
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Value>) {
    if let Ok(frame) = timeout(QUIET, rx.recv()).await {
        panic!("expected no frame, got {frame:?}");
    }
}

pub async fn next_peer(peers: &mut ChannelPeers) -> ChannelPeer {
    timeout(WAIT, peers.next())
        .await
        .expect("timed out waiting for connect")
        .expect("connector dropped")
}

pub async fn next_frame(peer: &mut ChannelPeer) -> Value {
    timeout(WAIT, peer.next_outbound())
        .await
        .expect("timed out waiting for outbound frame")
        .expect("outbound channel closed")
}

/// Round-trip through the worker so earlier commands are applied
pub async fn settle(mux: &Multiplexer) -> MultiplexerSnapshot {
    timeout(WAIT, mux.snapshot())
        .await
        .expect("timed out waiting for snapshot")
        .expect("multiplexer stopped")
}

pub async fn wait_for_state(mux: &Multiplexer, state: ConnectionState) {
    let mut rx = mux.connection_state();
    timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .expect("timed out waiting for connection state")
        .expect("multiplexer stopped");
}

pub fn slot_names(frames: &[Value], field: &str) -> Vec<String> {
    let mut names: Vec<String> = frames
        .iter()
        .filter_map(|frame| frame.get(field).and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    names.sort();
    names
}
