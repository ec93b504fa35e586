/*
[INPUT]:  Exchange/pair, account and run identifiers
[OUTPUT]: Initial JSON snapshots fetched before subscribing to stream deltas
[POS]:    HTTP layer - snapshot endpoints (public, private, algo)
[UPDATE]: When adding new snapshot endpoints or changing response format
*/

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{CoinmuxClient, Result};

/// A snapshot endpoint call, kept as data so feed loops can re-issue it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub path: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub authenticated: bool,
}

impl SnapshotRequest {
    pub fn public(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            authenticated: false,
        }
    }

    pub fn authenticated(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            authenticated: true,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// GET /api/v1/public/ticker?exchanges=..&pairs=..
    pub fn ticker(exchanges: &[String], pairs: &[String]) -> Self {
        Self::public("/api/v1/public/ticker")
            .query("exchanges", exchanges.join(","))
            .query("pairs", pairs.join(","))
    }

    /// GET /api/v1/public/orderbook?exchange=..&pair=..
    pub fn order_book(exchange: &str, pair: &str) -> Self {
        Self::public("/api/v1/public/orderbook")
            .query("exchange", exchange)
            .query("pair", pair)
    }

    /// GET /api/v1/public/trades?exchange=..&pair=..
    pub fn trade_history(exchange: &str, pair: &str) -> Self {
        Self::public("/api/v1/public/trades")
            .query("exchange", exchange)
            .query("pair", pair)
    }

    /// GET /api/v1/private/balances?accountId=..
    pub fn balances(account_id: &str) -> Self {
        Self::authenticated("/api/v1/private/balances").query("accountId", account_id)
    }

    /// GET /api/v1/private/orders?accountId=..
    pub fn open_orders(account_id: &str) -> Self {
        Self::authenticated("/api/v1/private/orders").query("accountId", account_id)
    }

    /// GET /api/v1/private/trades?accountId=..
    pub fn fills(account_id: &str) -> Self {
        Self::authenticated("/api/v1/private/trades").query("accountId", account_id)
    }

    /// GET /api/v1/algo/runs/{run_id}/events
    pub fn run_events(run_id: &str) -> Self {
        Self::authenticated(format!("/api/v1/algo/runs/{run_id}/events"))
    }
}

impl CoinmuxClient {
    /// Fetch a snapshot as raw JSON
    pub async fn fetch(&self, request: &SnapshotRequest) -> Result<Value> {
        let builder = if request.authenticated {
            self.authed_request(Method::GET, &request.path)?
        } else {
            self.request(Method::GET, &request.path)?
        };
        let builder = if request.query.is_empty() {
            builder
        } else {
            builder.query(&request.query)
        };
        self.send_json(builder).await
    }

    pub async fn ticker(&self, exchanges: &[String], pairs: &[String]) -> Result<Value> {
        self.fetch(&SnapshotRequest::ticker(exchanges, pairs)).await
    }

    pub async fn order_book(&self, exchange: &str, pair: &str) -> Result<Value> {
        self.fetch(&SnapshotRequest::order_book(exchange, pair)).await
    }

    pub async fn trade_history(&self, exchange: &str, pair: &str) -> Result<Value> {
        self.fetch(&SnapshotRequest::trade_history(exchange, pair)).await
    }

    pub async fn balances(&self, account_id: &str) -> Result<Value> {
        self.fetch(&SnapshotRequest::balances(account_id)).await
    }

    pub async fn open_orders(&self, account_id: &str) -> Result<Value> {
        self.fetch(&SnapshotRequest::open_orders(account_id)).await
    }

    pub async fn fills(&self, account_id: &str) -> Result<Value> {
        self.fetch(&SnapshotRequest::fills(account_id)).await
    }

    pub async fn run_events(&self, run_id: &str) -> Result<Value> {
        self.fetch(&SnapshotRequest::run_events(run_id)).await
    }
}
