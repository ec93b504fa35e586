/*
[INPUT]:  Connect requests from a multiplexer
[OUTPUT]: In-memory peers that drive socket events and read outbound frames
[POS]:    WebSocket layer - channel-backed transport for tests and embedding
[UPDATE]: When the Connector contract changes
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use super::connection::{ConnectRequest, Connection, ConnectionEvent, Connector};

/// Connector whose sockets are in-memory channels.
///
/// Every `connect` yields a [`ChannelPeer`] on the paired [`ChannelPeers`].
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    peers_tx: mpsc::UnboundedSender<ChannelPeer>,
    connects: Arc<AtomicUsize>,
}

#[derive(Debug)]
pub struct ChannelPeers {
    peers_rx: mpsc::UnboundedReceiver<ChannelPeer>,
}

/// The far side of one in-memory socket.
#[derive(Debug)]
pub struct ChannelPeer {
    pub request: ConnectRequest,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl ChannelConnector {
    pub fn new() -> (Self, ChannelPeers) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        (
            Self {
                peers_tx,
                connects: Arc::new(AtomicUsize::new(0)),
            },
            ChannelPeers { peers_rx },
        )
    }

    /// Number of sockets started so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for ChannelConnector {
    fn connect(&self, request: ConnectRequest) -> Connection {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.connects.fetch_add(1, Ordering::SeqCst);
        let _ = self.peers_tx.send(ChannelPeer {
            request,
            events: event_tx,
            outbound: outbound_rx,
        });
        Connection {
            outbound: outbound_tx,
            events: event_rx,
        }
    }
}

impl ChannelPeers {
    pub async fn next(&mut self) -> Option<ChannelPeer> {
        self.peers_rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<ChannelPeer> {
        self.peers_rx.try_recv().ok()
    }
}

impl ChannelPeer {
    pub fn open(&self) {
        let _ = self.events.send(ConnectionEvent::Open);
    }

    pub fn deliver(&self, text: impl Into<String>) {
        let _ = self.events.send(ConnectionEvent::Message(text.into()));
    }

    pub fn deliver_json(&self, payload: &Value) {
        self.deliver(payload.to_string());
    }

    pub fn close(&self) {
        let _ = self.events.send(ConnectionEvent::Close {
            code: Some(1006),
            reason: "peer closed".to_string(),
        });
    }

    pub fn error(&self, reason: impl Into<String>) {
        let _ = self.events.send(ConnectionEvent::Error(reason.into()));
    }

    /// Next frame the client sent, decoded as JSON.
    pub async fn next_outbound(&mut self) -> Option<Value> {
        let text = self.outbound.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Frames already sent, without waiting.
    pub fn drain_outbound(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            if let Ok(value) = serde_json::from_str(&text) {
                frames.push(value);
            }
        }
        frames
    }
}
