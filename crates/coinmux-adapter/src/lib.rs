/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public coinmux adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod auth;
pub mod http;
pub mod ws;

// Re-export commonly used types from auth
pub use auth::{SessionTokenStore, StaticToken, TokenData, TokenSource, expiry_after};

// Re-export commonly used types from http
pub use http::{ClientConfig, CoinmuxClient, CoinmuxError, Result, SnapshotRequest};

// Re-export commonly used types from ws
pub use ws::{
    ChannelConnector,
    ChannelPeer,
    ChannelPeers,
    ConnectionState,
    Connector,
    FamilyConfig,
    FamilyKind,
    Handler,
    Multiplexer,
    MultiplexerSnapshot,
    SlotSpec,
    SubscriptionDescriptor,
    TungsteniteConnector,
};
