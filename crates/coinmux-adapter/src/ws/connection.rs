/*
[INPUT]:  Family endpoint URL and optional session token
[OUTPUT]: One duplex socket per handle, surfaced as open/message/close/error events
[POS]:    WebSocket layer - connection handle and transports
[UPDATE]: When changing connect logic, auth transport or event semantics
*/

use std::fmt;
use std::future;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tracing::{debug, info, warn};
use url::Url;

use super::family::FamilyConfig;
use super::message::log_dropped_send;

/// What a transport reports about its socket, in socket order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Open,
    Message(String),
    Close { code: Option<u16>, reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub family: String,
    pub url: Url,
    pub token: Option<String>,
}

/// Both ends of a freshly started socket: frames to send, events to read.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Starts sockets. `connect` must not block; progress arrives as events.
pub trait Connector: Send + Sync + fmt::Debug + 'static {
    fn connect(&self, request: ConnectRequest) -> Connection;
}

/// Multiplexer-level connection state, published for status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    NoConnection,
    Connecting,
    Open,
}

/// The single live socket of a family.
#[derive(Debug)]
pub(crate) struct ConnectionHandle {
    id: u64,
    open: bool,
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionHandle {
    pub(crate) fn start(
        connector: &dyn Connector,
        config: &FamilyConfig,
        token: Option<String>,
        id: u64,
    ) -> Self {
        let request = ConnectRequest {
            family: config.name.clone(),
            url: config.endpoint(),
            token,
        };
        info!(family = %config.name, url = %request.url, connection_id = id, "ws connecting");
        let Connection { outbound, events } = connector.connect(request);
        Self {
            id,
            open: false,
            outbound,
            events,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn mark_open(&mut self) {
        self.open = true;
    }

    pub(crate) fn state(&self) -> ConnectionState {
        if self.open {
            ConnectionState::Open
        } else {
            ConnectionState::Connecting
        }
    }

    /// Serialize and transmit if open; otherwise the payload is dropped.
    pub(crate) fn send(&self, family: &str, payload: &Value) -> bool {
        if !self.open {
            log_dropped_send(family, payload);
            return false;
        }
        if self.outbound.send(payload.to_string()).is_err() {
            debug!(family, connection_id = self.id, "ws transport gone; send dropped");
            return false;
        }
        true
    }

    /// Next event; a transport that vanished without a close counts as one.
    pub(crate) async fn next_event(&mut self) -> ConnectionEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| ConnectionEvent::Close {
                code: None,
                reason: "transport dropped".to_string(),
            })
    }
}

/// Next event of an optional handle; pends forever when there is none.
pub(crate) async fn next_event_of(handle: &mut Option<ConnectionHandle>) -> ConnectionEvent {
    match handle {
        Some(handle) => handle.next_event().await,
        None => future::pending().await,
    }
}

/// Production transport over tokio-tungstenite.
///
/// The session token, when present, travels as the `Sec-WebSocket-Protocol` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, request: ConnectRequest) -> Connection {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(request, outbound_rx, event_tx));
        Connection {
            outbound: outbound_tx,
            events: event_rx,
        }
    }
}

async fn run_socket(
    request: ConnectRequest,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let fail = |reason: String| {
        let _ = event_tx.send(ConnectionEvent::Error(reason.clone()));
        let _ = event_tx.send(ConnectionEvent::Close { code: None, reason });
    };

    let mut client_request = match request.url.as_str().into_client_request() {
        Ok(client_request) => client_request,
        Err(err) => return fail(err.to_string()),
    };
    if let Some(token) = &request.token {
        match HeaderValue::from_str(token) {
            Ok(value) => {
                client_request
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, value);
            }
            Err(err) => return fail(format!("invalid session token: {err}")),
        }
    }

    let (ws_stream, _response) = match connect_async(client_request).await {
        Ok(connected) => connected,
        Err(err) => {
            warn!(family = %request.family, error = %err, "ws connect failed");
            return fail(err.to_string());
        }
    };
    let _ = event_tx.send(ConnectionEvent::Open);

    let (mut write, mut read) = ws_stream.split();
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(text) => {
                        if let Err(err) = write.send(WsMessage::Text(text.into())).await {
                            fail(err.to_string());
                            break;
                        }
                    }
                    None => {
                        // handle dropped: close quietly, nobody is listening
                        let _ = write.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = event_tx.send(ConnectionEvent::Message(text.to_string()));
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            let _ = event_tx.send(ConnectionEvent::Message(text));
                        }
                        Err(_) => debug!(family = %request.family, "non-utf8 binary frame dropped"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                            None => (None, String::new()),
                        };
                        let _ = write.send(WsMessage::Close(None)).await;
                        let _ = event_tx.send(ConnectionEvent::Close { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        fail(err.to_string());
                        break;
                    }
                    None => {
                        let _ = event_tx.send(ConnectionEvent::Close {
                            code: None,
                            reason: "stream ended".to_string(),
                        });
                        break;
                    }
                }
            }
        }
    }
}
