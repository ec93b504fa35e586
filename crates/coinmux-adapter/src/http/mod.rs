/*
[INPUT]:  HTTP client configuration and snapshot endpoints
[OUTPUT]: HTTP responses and JSON snapshot results
[POS]:    HTTP layer - snapshot fetches made before subscribing to deltas
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod error;
pub mod snapshot;

pub use error::{CoinmuxError, Result};

pub use client::{ClientConfig, CoinmuxClient};
pub use snapshot::SnapshotRequest;
