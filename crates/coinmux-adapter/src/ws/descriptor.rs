/*
[INPUT]:  Caller-supplied slot name, subscription parameters and callbacks
[OUTPUT]: Subscribe/unsubscribe wire payloads and shareable handlers
[POS]:    WebSocket layer - subscription descriptors and handler callbacks
[UPDATE]: When changing the outbound message shape or handler contract
*/

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::error;

use super::family::FamilyConfig;

/// What a slot should receive from the server.
///
/// The slot name is the discriminator value; the field names it is written
/// under come from the family, so one descriptor type serves every family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDescriptor {
    pub slot: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl SubscriptionDescriptor {
    pub fn new(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn subscribe_message(&self, family: &FamilyConfig) -> Value {
        self.to_wire(family, &family.subscribe_command)
    }

    /// Copy of this descriptor with the command rewritten to unsubscribe.
    pub fn unsubscribe_message(&self, family: &FamilyConfig) -> Value {
        self.to_wire(family, &family.unsubscribe_command)
    }

    /// True if any of `keys` holds a different value in `other`.
    pub fn context_differs(&self, other: &SubscriptionDescriptor, keys: &[String]) -> bool {
        keys.iter()
            .any(|key| self.params.get(key) != other.params.get(key))
    }

    fn to_wire(&self, family: &FamilyConfig, command: &str) -> Value {
        let mut body = self.params.clone();
        body.insert(
            family.discriminator_field.clone(),
            Value::String(self.slot.clone()),
        );
        body.insert(family.command_field.clone(), Value::String(command.to_string()));
        Value::Object(body)
    }
}

/// Callback invoked with every frame fanned out by a multiplexer.
///
/// Handlers see all frames of their family, not just their own slot's, and
/// must filter on the discriminator field themselves.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(&Value) + Send + Sync>);

impl Handler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    /// Handler that forwards every frame into an unbounded channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Self::new(move |message: &Value| {
            let _ = tx.send(message.clone());
        });
        (handler, rx)
    }

    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Invoke the callback; a panic is logged and contained.
    pub(crate) fn call(&self, message: &Value) {
        if catch_unwind(AssertUnwindSafe(|| (self.0)(message))).is_err() {
            error!("ws handler panicked; frame dropped for this handler");
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}
