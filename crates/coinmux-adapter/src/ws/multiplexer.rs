/*
[INPUT]:  subscribe/unsubscribe calls from feature streams, socket events
[OUTPUT]: One shared socket per family, replayed subscriptions, fanned-out frames
[POS]:    WebSocket layer - subscription multiplexer (single-writer worker task)
[UPDATE]: When changing state transitions, replay or fan-out semantics
*/

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::http::{CoinmuxError, Result};

use super::connection::{
    ConnectionEvent, ConnectionHandle, ConnectionState, Connector, next_event_of,
};
use super::descriptor::{Handler, SubscriptionDescriptor};
use super::family::FamilyConfig;
use super::message::{decode_frame, is_reconnect};
use super::registry::{SlotSnapshot, SubscriptionRegistry};
use super::supervisor::{ReconnectSupervisor, grace_elapsed};

#[derive(Debug)]
enum Command {
    Subscribe {
        descriptor: SubscriptionDescriptor,
        handler: Option<Handler>,
    },
    Unsubscribe {
        slot: String,
        release_handler: bool,
    },
    Reset,
    Snapshot {
        reply: oneshot::Sender<MultiplexerSnapshot>,
    },
}

/// Diagnostic view of a multiplexer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiplexerSnapshot {
    pub family: String,
    pub state: ConnectionState,
    pub connection_id: Option<u64>,
    pub connections_started: u64,
    pub reconnect_notices: u64,
    pub awaiting_orphan_close: bool,
    pub slots: Vec<SlotSnapshot>,
}

/// Shared subscription multiplexer for one channel family.
///
/// Clones talk to the same worker task, which owns the registry and the one
/// connection handle. Operations are fire-and-forget and never fail; socket
/// loss reaches callers as a reconnect notification fanned out to every
/// handler.
#[derive(Debug, Clone)]
pub struct Multiplexer {
    config: Arc<FamilyConfig>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
}

impl Multiplexer {
    /// Validate the family and start its worker on the current Tokio runtime.
    pub fn spawn(
        config: FamilyConfig,
        connector: Arc<dyn Connector>,
        tokens: Option<Arc<dyn TokenSource>>,
    ) -> Result<Self> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(CoinmuxError::Config(
                "multiplexer needs a running Tokio runtime".to_string(),
            ));
        }

        let config = Arc::new(config);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::NoConnection);
        let shutdown = CancellationToken::new();

        let worker = MultiplexerWorker {
            registry: SubscriptionRegistry::new(&config),
            supervisor: ReconnectSupervisor::new(config.error_close_grace),
            config: config.clone(),
            connector,
            tokens,
            handle: None,
            connections_started: 0,
            cmd_rx,
            state_tx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(worker.run());

        Ok(Self {
            config,
            cmd_tx,
            state_rx,
            shutdown,
        })
    }

    pub fn config(&self) -> &FamilyConfig {
        &self.config
    }

    /// Put `descriptor` in its slot and make sure it reaches the server.
    ///
    /// `None` keeps whatever handler the slot already has.
    pub fn subscribe(&self, descriptor: SubscriptionDescriptor, handler: Option<Handler>) {
        self.send(Command::Subscribe {
            descriptor,
            handler,
        });
    }

    /// Best-effort unsubscribe on the wire, then clear the slot. The handler stays.
    pub fn unsubscribe(&self, slot: &str) {
        self.send(Command::Unsubscribe {
            slot: slot.to_string(),
            release_handler: false,
        });
    }

    /// `unsubscribe` plus removal of the slot's handler.
    pub fn release(&self, slot: &str) {
        self.send(Command::Unsubscribe {
            slot: slot.to_string(),
            release_handler: true,
        });
    }

    /// Tear down the current socket without a reconnect notification.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Returns `None` once the worker has stopped.
    pub async fn snapshot(&self) -> Option<MultiplexerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Snapshot { reply }).ok()?;
        rx.await.ok()
    }

    pub fn is_reconnect(&self, message: &Value) -> bool {
        is_reconnect(message, &self.config)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn send(&self, command: Command) {
        if self.cmd_tx.send(command).is_err() {
            warn!(family = %self.config.name, "multiplexer stopped; command dropped");
        }
    }
}

struct MultiplexerWorker {
    config: Arc<FamilyConfig>,
    connector: Arc<dyn Connector>,
    tokens: Option<Arc<dyn TokenSource>>,
    registry: SubscriptionRegistry,
    handle: Option<ConnectionHandle>,
    supervisor: ReconnectSupervisor,
    connections_started: u64,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl MultiplexerWorker {
    async fn run(mut self) {
        loop {
            let deadline = self.supervisor.deadline();
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.on_command(cmd),
                        None => break,
                    }
                }
                event = next_event_of(&mut self.handle) => self.on_event(event),
                event = next_event_of(&mut self.supervisor.orphan) => self.on_orphan_event(event),
                _ = grace_elapsed(deadline) => self.on_grace_elapsed(),
            }
        }

        self.handle = None;
        self.supervisor.reset();
        self.publish_state();
        debug!(family = %self.config.name, "multiplexer worker stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                descriptor,
                handler,
            } => self.subscribe(descriptor, handler),
            Command::Unsubscribe {
                slot,
                release_handler,
            } => self.unsubscribe(&slot, release_handler),
            Command::Reset => self.reset(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn subscribe(&mut self, descriptor: SubscriptionDescriptor, handler: Option<Handler>) {
        let slot = descriptor.slot.clone();
        let Some(spec) = self.registry.spec(&slot).cloned() else {
            warn!(family = %self.config.name, %slot, "subscribe to unknown slot ignored");
            return;
        };

        let mut switched = false;
        if let (Some(handle), Some(previous)) = (
            self.handle.as_ref().filter(|handle| handle.is_open()),
            self.registry.descriptor(&slot),
        ) && previous.context_differs(&descriptor, &spec.context_keys)
        {
            info!(family = %self.config.name, %slot, "context switch; unsubscribing previous parameters");
            handle.send(&self.config.name, &previous.unsubscribe_message(&self.config));
            switched = true;
        }
        if switched {
            self.registry.clear_slot(&slot);
        }

        self.registry.set_subscription(descriptor);
        self.registry.set_handler(&slot, handler);

        match self.handle.as_ref().map(ConnectionHandle::is_open) {
            None => self.ensure_open(),
            Some(true) => {
                if let (Some(handle), Some(descriptor)) =
                    (self.handle.as_ref(), self.registry.descriptor(&slot))
                {
                    handle.send(&self.config.name, &descriptor.subscribe_message(&self.config));
                }
            }
            Some(false) => {
                debug!(family = %self.config.name, %slot, "connecting; subscription replays on open");
            }
        }
    }

    fn unsubscribe(&mut self, slot: &str, release_handler: bool) {
        if let (Some(handle), Some(descriptor)) = (
            self.handle.as_ref().filter(|handle| handle.is_open()),
            self.registry.descriptor(slot),
        ) {
            handle.send(&self.config.name, &descriptor.unsubscribe_message(&self.config));
        }
        let cleared = self.registry.clear_slot(slot).is_some();
        let released = release_handler && self.registry.remove_handler(slot).is_some();
        debug!(family = %self.config.name, slot, cleared, released, "slot unsubscribed");
    }

    fn reset(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!(family = %self.config.name, connection_id = handle.id(), "ws handle reset");
        }
        self.supervisor.reset();
        self.publish_state();
    }

    fn ensure_open(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let token = if self.config.requires_auth {
            match self.tokens.as_ref().and_then(|tokens| tokens.session_token()) {
                Some(token) => Some(token),
                None => {
                    warn!(family = %self.config.name, "no session token; cannot connect");
                    let notice = self.supervisor.notice(&self.config, &mut self.registry);
                    self.fan_out(&notice);
                    return;
                }
            }
        } else {
            None
        };

        self.connections_started += 1;
        self.handle = Some(ConnectionHandle::start(
            self.connector.as_ref(),
            &self.config,
            token,
            self.connections_started,
        ));
        self.publish_state();
    }

    fn on_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Open => self.on_open(),
            ConnectionEvent::Message(text) => self.on_message(&text),
            ConnectionEvent::Close { code, reason } => self.on_close(code, &reason),
            ConnectionEvent::Error(reason) => self.on_error(&reason),
        }
    }

    /// Replay every live slot, not only the one that triggered the connect.
    fn on_open(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        handle.mark_open();

        let mut replayed = 0usize;
        for descriptor in self.registry.live_descriptors() {
            if handle.send(&self.config.name, &descriptor.subscribe_message(&self.config)) {
                replayed += 1;
            }
        }
        info!(family = %self.config.name, connection_id = handle.id(), replayed, "ws open");
        self.publish_state();
    }

    fn on_message(&mut self, text: &str) {
        if let Some(message) = decode_frame(&self.config.name, text) {
            self.fan_out(&message);
        }
    }

    fn on_close(&mut self, code: Option<u16>, reason: &str) {
        let connection_id = self.handle.take().map(|handle| handle.id());
        info!(family = %self.config.name, ?connection_id, ?code, reason, "ws closed");
        self.publish_state();

        let notice = self.supervisor.notice(&self.config, &mut self.registry);
        self.fan_out(&notice);
    }

    /// Clear the handle without notifying; only a close triggers reconnection.
    fn on_error(&mut self, reason: &str) {
        warn!(family = %self.config.name, reason, "ws error; handle cleared");
        if let Some(handle) = self.handle.take() {
            self.supervisor.park(&self.config.name, handle);
        }
        self.publish_state();
    }

    fn on_orphan_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Close { code, reason } => {
                let connection_id = self.supervisor.settle().map(|handle| handle.id());
                info!(family = %self.config.name, ?connection_id, ?code, %reason, "errored ws closed");
                let notice = self.supervisor.notice(&self.config, &mut self.registry);
                self.fan_out(&notice);
            }
            ConnectionEvent::Message(_) => {
                debug!(family = %self.config.name, "frame from errored ws dropped");
            }
            ConnectionEvent::Open | ConnectionEvent::Error(_) => {}
        }
    }

    fn on_grace_elapsed(&mut self) {
        self.supervisor.expire(&self.config.name);
        let notice = self.supervisor.notice(&self.config, &mut self.registry);
        self.fan_out(&notice);
    }

    /// Broadcast to every registered handler regardless of slot.
    ///
    /// Handlers filter on the discriminator themselves and some rely on
    /// seeing other slots' frames, so this stays a broadcast.
    fn fan_out(&self, message: &Value) {
        for handler in self.registry.handlers() {
            handler.call(message);
        }
    }

    fn publish_state(&self) {
        let state = self
            .handle
            .as_ref()
            .map_or(ConnectionState::NoConnection, ConnectionHandle::state);
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn snapshot(&self) -> MultiplexerSnapshot {
        MultiplexerSnapshot {
            family: self.config.name.clone(),
            state: self
                .handle
                .as_ref()
                .map_or(ConnectionState::NoConnection, ConnectionHandle::state),
            connection_id: self.handle.as_ref().map(ConnectionHandle::id),
            connections_started: self.connections_started,
            reconnect_notices: self.supervisor.notices(),
            awaiting_orphan_close: self.supervisor.orphan.is_some(),
            slots: self.registry.snapshot(),
        }
    }
}
