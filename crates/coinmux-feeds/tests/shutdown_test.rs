/*
[INPUT]:  Graceful shutdown test scenarios
[OUTPUT]: Shutdown behavior verification
[POS]:    Integration test layer - clean exit verification
[UPDATE]: When changing shutdown logic
*/

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{next_frame, next_peer, stream_config, wait_for_feed};
use coinmux_adapter::{ChannelConnector, ConnectionState, FamilyKind};
use coinmux_feeds::FeedHub;
use serde_json::json;
use tokio_test::assert_ok;
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FILLS_FEED: &str = r#"
  - kind: fills
    name: fills
    account_id: acc-1
"#;

/// Test: shutdown unsubscribes live slots before the sockets go away
#[tokio::test]
async fn test_shutdown_releases_live_slots() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/private/trades"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"trades": []})))
        .mount(&server)
        .await;

    let config = stream_config(&server.uri(), 1000, FILLS_FEED);
    let (connector, mut peers) = ChannelConnector::new();
    let hub = assert_ok!(FeedHub::start(&config, Arc::new(connector)));
    let mut state = hub.feed_state("fills").expect("fills feed");
    let mut connection = hub
        .connection_states()
        .into_iter()
        .find(|(family, _)| *family == FamilyKind::Private)
        .map(|(_, rx)| rx)
        .expect("private family");

    wait_for_feed(&mut state, |state| state.live).await;
    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.request.token.as_deref(), Some("session-test"));
    peer.open();
    let subscribe = next_frame(&mut peer).await.expect("subscribe frame");
    assert_eq!(subscribe["eventType"], "subscribe");
    timeout(
        common::WAIT,
        connection.wait_for(|state| *state == ConnectionState::Open),
    )
    .await
    .expect("socket open")
    .expect("multiplexer alive");

    assert_ok!(hub.shutdown_and_wait(Duration::from_secs(2)).await);

    assert_eq!(
        next_frame(&mut peer).await,
        Some(json!({"subscriptionType": "tradeStream", "accountId": "acc-1", "eventType": "unsubscribe"}))
    );
    assert!(!state.borrow().live);
}

/// Test: a feed waiting out its backoff stops promptly
#[tokio::test]
async fn test_shutdown_interrupts_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/private/trades"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = stream_config(&server.uri(), 60_000, FILLS_FEED);
    let (connector, _peers) = ChannelConnector::new();
    let hub = assert_ok!(FeedHub::start(&config, Arc::new(connector.clone())));
    let mut state = hub.feed_state("fills").expect("fills feed");

    let failed = wait_for_feed(&mut state, |state| state.failures == 1).await;
    assert_eq!(failed.retry_in, Some(Duration::from_secs(60)));

    let stopped = timeout(Duration::from_secs(2), hub.shutdown_and_wait(Duration::from_secs(2)))
        .await
        .expect("shutdown should not wait for the backoff");
    assert_ok!(stopped);
    assert_eq!(connector.connect_count(), 0);
}

/// Test: external cancellation stops feeds started with a shared token
#[tokio::test]
async fn test_external_token_cancels_feeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/private/trades"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = stream_config(&server.uri(), 60_000, FILLS_FEED);
    let (connector, _peers) = ChannelConnector::new();
    let shutdown = tokio_util::sync::CancellationToken::new();
    let hub = assert_ok!(FeedHub::start_with_shutdown(
        &config,
        Arc::new(connector),
        shutdown.clone()
    ));
    let mut state = hub.feed_state("fills").expect("fills feed");
    wait_for_feed(&mut state, |state| state.failures == 1).await;

    shutdown.cancel();
    let stopped = timeout(common::WAIT, state.wait_for(|state| state.retry_in.is_none()))
        .await
        .expect("feed should stop")
        .map(|state| state.failures);
    assert_eq!(stopped.ok(), Some(1));
    drop(hub);
}
