/*
[INPUT]:  Feed definitions from the YAML configuration
[OUTPUT]: Family/slot routing, subscription descriptors, snapshot requests, feed state
[POS]:    Feeds layer - what each feature stream subscribes to and keeps
[UPDATE]: When adding feed kinds or state fields
*/

use std::time::Duration;

use chrono::{DateTime, Utc};
use coinmux_adapter::{FamilyKind, SnapshotRequest, SubscriptionDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One independent feature stream, tagged by `kind` in YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedConfig {
    Ticker {
        exchanges: Vec<String>,
        pairs: Vec<String>,
    },
    OrderBook {
        exchange: String,
        pair: String,
    },
    Trades {
        exchange: String,
        pair: String,
    },
    Balances {
        account_id: String,
    },
    Orders {
        account_id: String,
    },
    Fills {
        account_id: String,
    },
    BotRun {
        run_id: String,
    },
}

/// A feed with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub feed: FeedConfig,
}

impl FeedEntry {
    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.feed.label())
    }
}

impl FeedConfig {
    pub fn family(&self) -> FamilyKind {
        match self {
            FeedConfig::Ticker { .. } | FeedConfig::OrderBook { .. } | FeedConfig::Trades { .. } => {
                FamilyKind::Public
            }
            FeedConfig::Balances { .. } | FeedConfig::Orders { .. } | FeedConfig::Fills { .. } => {
                FamilyKind::Private
            }
            FeedConfig::BotRun { .. } => FamilyKind::Algo,
        }
    }

    pub fn slot(&self) -> &'static str {
        match self {
            FeedConfig::Ticker { .. } => "priceStream",
            FeedConfig::OrderBook { .. } => "orderBookStream",
            FeedConfig::Trades { .. } | FeedConfig::Fills { .. } => "tradeStream",
            FeedConfig::Balances { .. } => "balanceStream",
            FeedConfig::Orders { .. } => "orderStream",
            FeedConfig::BotRun { .. } => "runStream",
        }
    }

    pub fn descriptor(&self) -> SubscriptionDescriptor {
        let descriptor = SubscriptionDescriptor::new(self.slot());
        match self {
            FeedConfig::Ticker { exchanges, pairs } => descriptor
                .param("exchanges", json!(exchanges))
                .param("pairs", json!(pairs)),
            FeedConfig::OrderBook { exchange, pair } | FeedConfig::Trades { exchange, pair } => {
                descriptor
                    .param("exchange", exchange.as_str())
                    .param("pair", pair.as_str())
            }
            FeedConfig::Balances { account_id }
            | FeedConfig::Orders { account_id }
            | FeedConfig::Fills { account_id } => descriptor.param("accountId", account_id.as_str()),
            FeedConfig::BotRun { run_id } => descriptor.param("runId", run_id.as_str()),
        }
    }

    pub fn snapshot_request(&self) -> SnapshotRequest {
        match self {
            FeedConfig::Ticker { exchanges, pairs } => SnapshotRequest::ticker(exchanges, pairs),
            FeedConfig::OrderBook { exchange, pair } => SnapshotRequest::order_book(exchange, pair),
            FeedConfig::Trades { exchange, pair } => SnapshotRequest::trade_history(exchange, pair),
            FeedConfig::Balances { account_id } => SnapshotRequest::balances(account_id),
            FeedConfig::Orders { account_id } => SnapshotRequest::open_orders(account_id),
            FeedConfig::Fills { account_id } => SnapshotRequest::fills(account_id),
            FeedConfig::BotRun { run_id } => SnapshotRequest::run_events(run_id),
        }
    }

    /// Default feed name, e.g. `order_book:BINANCE:BTC/USD`.
    pub fn label(&self) -> String {
        match self {
            FeedConfig::Ticker { exchanges, pairs } => {
                format!("ticker:{}:{}", exchanges.join(","), pairs.join(","))
            }
            FeedConfig::OrderBook { exchange, pair } => format!("order_book:{exchange}:{pair}"),
            FeedConfig::Trades { exchange, pair } => format!("trades:{exchange}:{pair}"),
            FeedConfig::Balances { account_id } => format!("balances:{account_id}"),
            FeedConfig::Orders { account_id } => format!("orders:{account_id}"),
            FeedConfig::Fills { account_id } => format!("fills:{account_id}"),
            FeedConfig::BotRun { run_id } => format!("bot_run:{run_id}"),
        }
    }
}

/// Latest known data of one feed.
///
/// After a reconnect the data stays in place with `live = false` until the
/// next snapshot refresh succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedState {
    pub snapshot: Option<Value>,
    pub last_event: Option<Value>,
    pub events_applied: u64,
    pub live: bool,
    pub reconnects: u64,
    pub failures: u64,
    pub retry_in: Option<Duration>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl FeedState {
    pub(crate) fn apply_snapshot(&mut self, snapshot: Value) {
        self.snapshot = Some(snapshot);
        self.retry_in = None;
        self.last_error = None;
        self.touch();
    }

    pub(crate) fn apply_event(&mut self, event: Value) {
        self.last_event = Some(event);
        self.events_applied += 1;
        self.touch();
    }

    pub(crate) fn record_failure(&mut self, error: String, retry_in: Duration) {
        self.failures += 1;
        self.live = false;
        self.retry_in = Some(retry_in);
        self.last_error = Some(error);
        self.touch();
    }

    pub(crate) fn record_reconnect(&mut self, retry_in: Duration) {
        self.reconnects += 1;
        self.live = false;
        self.retry_in = Some(retry_in);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}
