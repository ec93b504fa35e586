/*
[INPUT]:  Channel family configuration, subscription descriptors and handlers
[OUTPUT]: Shared per-family sockets with replay on open and broadcast fan-out
[POS]:    WebSocket layer - real-time subscription multiplexing
[UPDATE]: When adding families, transports or changing connection logic
*/

pub mod channel;
pub mod connection;
pub mod descriptor;
pub mod family;
pub mod message;
pub mod multiplexer;
pub mod registry;
mod supervisor;

pub use channel::{ChannelConnector, ChannelPeer, ChannelPeers};
pub use connection::{
    ConnectRequest, Connection, ConnectionEvent, ConnectionState, Connector, TungsteniteConnector,
};
pub use descriptor::{Handler, SubscriptionDescriptor};
pub use family::{FamilyConfig, FamilyKind, SlotSpec};
pub use message::{is_reconnect, reconnect_payload, slot_of};
pub use multiplexer::{Multiplexer, MultiplexerSnapshot};
pub use registry::{SlotSnapshot, SubscriptionRegistry};
