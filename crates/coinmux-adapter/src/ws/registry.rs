/*
[INPUT]:  Descriptors and handlers from subscribe/unsubscribe calls
[OUTPUT]: Per-slot latest descriptor + handler tables for one family
[POS]:    WebSocket layer - subscription registry (last write wins per slot)
[UPDATE]: When changing slot replacement or cleanup rules
*/

use serde::Serialize;
use tracing::debug;

use super::descriptor::{Handler, SubscriptionDescriptor};
use super::family::{FamilyConfig, SlotSpec};

#[derive(Debug, Clone)]
struct SlotEntry {
    spec: SlotSpec,
    descriptor: Option<SubscriptionDescriptor>,
    handler: Option<Handler>,
}

/// Slot table for one channel family, in slot-set order.
#[derive(Debug, Clone)]
pub struct SubscriptionRegistry {
    family: String,
    entries: Vec<SlotEntry>,
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSnapshot {
    pub slot: String,
    pub descriptor: Option<SubscriptionDescriptor>,
    pub has_handler: bool,
}

impl SubscriptionRegistry {
    pub fn new(config: &FamilyConfig) -> Self {
        Self {
            family: config.name.clone(),
            entries: config
                .slots
                .iter()
                .cloned()
                .map(|spec| SlotEntry {
                    spec,
                    descriptor: None,
                    handler: None,
                })
                .collect(),
        }
    }

    pub fn is_known(&self, slot: &str) -> bool {
        self.entry(slot).is_some()
    }

    pub fn spec(&self, slot: &str) -> Option<&SlotSpec> {
        self.entry(slot).map(|entry| &entry.spec)
    }

    pub fn descriptor(&self, slot: &str) -> Option<&SubscriptionDescriptor> {
        self.entry(slot).and_then(|entry| entry.descriptor.as_ref())
    }

    /// Store the descriptor in its slot, replacing any previous one.
    ///
    /// Returns false (and stores nothing) when the slot is unknown.
    pub fn set_subscription(&mut self, descriptor: SubscriptionDescriptor) -> bool {
        match self.entry_mut(&descriptor.slot) {
            Some(entry) => {
                entry.descriptor = Some(descriptor);
                true
            }
            None => {
                debug!(family = %self.family, slot = %descriptor.slot, "descriptor for unknown slot ignored");
                false
            }
        }
    }

    /// Store or replace the slot's handler. `None` leaves the current one in place.
    pub fn set_handler(&mut self, slot: &str, handler: Option<Handler>) -> bool {
        let Some(handler) = handler else {
            return false;
        };
        match self.entry_mut(slot) {
            Some(entry) => {
                entry.handler = Some(handler);
                true
            }
            None => false,
        }
    }

    /// Empty the slot's descriptor; the handler stays registered.
    pub fn clear_slot(&mut self, slot: &str) -> Option<SubscriptionDescriptor> {
        self.entry_mut(slot).and_then(|entry| entry.descriptor.take())
    }

    pub fn remove_handler(&mut self, slot: &str) -> Option<Handler> {
        self.entry_mut(slot).and_then(|entry| entry.handler.take())
    }

    /// Drop descriptors of slots that restart clean after a reconnect.
    pub fn clear_transient(&mut self) -> Vec<String> {
        self.entries
            .iter_mut()
            .filter(|entry| entry.spec.clear_on_reconnect && entry.descriptor.is_some())
            .map(|entry| {
                entry.descriptor = None;
                entry.spec.name.clone()
            })
            .collect()
    }

    pub fn live_descriptors(&self) -> impl Iterator<Item = &SubscriptionDescriptor> {
        self.entries
            .iter()
            .filter_map(|entry| entry.descriptor.as_ref())
    }

    /// Every registered handler, cloned so callers can invoke them freely.
    pub fn handlers(&self) -> Vec<Handler> {
        self.entries
            .iter()
            .filter_map(|entry| entry.handler.clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.entries
            .iter()
            .map(|entry| SlotSnapshot {
                slot: entry.spec.name.clone(),
                descriptor: entry.descriptor.clone(),
                has_handler: entry.handler.is_some(),
            })
            .collect()
    }

    fn entry(&self, slot: &str) -> Option<&SlotEntry> {
        self.entries.iter().find(|entry| entry.spec.name == slot)
    }

    fn entry_mut(&mut self, slot: &str) -> Option<&mut SlotEntry> {
        self.entries.iter_mut().find(|entry| entry.spec.name == slot)
    }
}
