/*
[INPUT]:  Stream base URL (COINMUX_WS_URL) and trading pair
[OUTPUT]: Live price frames printed until the socket drops
[POS]:    Examples - multiplexed WebSocket subscription
[UPDATE]: When the multiplexer API changes
*/

use std::sync::Arc;

use coinmux_adapter::*;
use serde_json::json;
use tokio::time::{Duration, timeout};
use url::Url;

/// Example: one shared public socket, two feature streams
///
/// Both subscriptions ride the same connection. Every handler sees every
/// frame and filters on `subscriptionType`; a `RECONNECT` value means the
/// socket closed and the subscription must be re-issued.
#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Coinmux WebSocket Example ===\n");

    let base = std::env::var("COINMUX_WS_URL").unwrap_or_else(|_| "wss://stream.example.com".to_string());
    let family = FamilyConfig::public(Url::parse(&base)?);
    let mux = Multiplexer::spawn(family, Arc::new(TungsteniteConnector), None)?;
    println!("✓ Multiplexer started for {}", mux.config().endpoint());

    let (prices, mut price_rx) = Handler::channel();
    mux.subscribe(
        SubscriptionDescriptor::new("priceStream")
            .param("exchanges", json!(["BINANCE"]))
            .param("pairs", json!(["BTC/USD"])),
        Some(prices),
    );
    mux.subscribe(
        SubscriptionDescriptor::new("tradeStream")
            .param("exchange", "BINANCE")
            .param("pair", "BTC/USD"),
        None,
    );
    println!("✓ Subscribed to priceStream and tradeStream\n");

    loop {
        match timeout(Duration::from_secs(30), price_rx.recv()).await {
            Ok(Some(frame)) if mux.is_reconnect(&frame) => {
                println!("socket closed; a real consumer would re-subscribe here");
                break;
            }
            Ok(Some(frame)) => {
                if frame["subscriptionType"] == "priceStream" {
                    println!("price: {frame}");
                }
            }
            Ok(None) => break,
            Err(_) => {
                println!("no frames for 30s");
                break;
            }
        }
    }

    if let Some(snapshot) = mux.snapshot().await {
        println!("\nstate: {:?}, notices: {}", snapshot.state, snapshot.reconnect_notices);
    }
    mux.shutdown();
    Ok(())
}
