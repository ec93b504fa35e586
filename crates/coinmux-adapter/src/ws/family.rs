/*
[INPUT]:  Channel family name, base URL, slot set and wire field names
[OUTPUT]: Validated per-family configuration consumed by the multiplexer
[POS]:    WebSocket layer - channel family definitions and presets
[UPDATE]: When adding families, slots or changing wire field names
*/

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::http::{CoinmuxError, Result};

pub const DEFAULT_RECONNECT_VALUE: &str = "RECONNECT";
pub const SUBSCRIBE_COMMAND: &str = "subscribe";
pub const UNSUBSCRIBE_COMMAND: &str = "unsubscribe";

/// The three streaming endpoints the aggregator exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilyKind {
    Public,
    Private,
    Algo,
}

impl FamilyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyKind::Public => "public",
            FamilyKind::Private => "private",
            FamilyKind::Algo => "algo",
        }
    }
}

impl fmt::Display for FamilyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named subscription bucket within a family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    /// Parameters whose change switches context: the old descriptor is
    /// unsubscribed on the wire before it is overwritten.
    #[serde(default)]
    pub context_keys: Vec<String>,
    /// Descriptor is dropped when the connection closes.
    #[serde(default)]
    pub clear_on_reconnect: bool,
}

impl SlotSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_keys: Vec::new(),
            clear_on_reconnect: false,
        }
    }

    pub fn with_context_keys(mut self, keys: &[&str]) -> Self {
        self.context_keys = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn cleared_on_reconnect(mut self) -> Self {
        self.clear_on_reconnect = true;
        self
    }
}

/// Per-family configuration injected into a [`crate::ws::Multiplexer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyConfig {
    pub name: String,
    pub base_url: Url,
    pub slots: Vec<SlotSpec>,
    pub discriminator_field: String,
    pub command_field: String,
    pub subscribe_command: String,
    pub unsubscribe_command: String,
    pub reconnect_value: String,
    pub requires_auth: bool,
    /// When set, an error with no close inside this window is treated as a close.
    pub error_close_grace: Option<Duration>,
}

impl FamilyConfig {
    /// Family with default command values and no slots.
    pub fn new(
        name: impl Into<String>,
        base_url: Url,
        discriminator_field: impl Into<String>,
        command_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url,
            slots: Vec::new(),
            discriminator_field: discriminator_field.into(),
            command_field: command_field.into(),
            subscribe_command: SUBSCRIBE_COMMAND.to_string(),
            unsubscribe_command: UNSUBSCRIBE_COMMAND.to_string(),
            reconnect_value: DEFAULT_RECONNECT_VALUE.to_string(),
            requires_auth: false,
            error_close_grace: None,
        }
    }

    pub fn with_slot(mut self, slot: SlotSpec) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn with_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    pub fn with_error_close_grace(mut self, grace: Option<Duration>) -> Self {
        self.error_close_grace = grace;
        self
    }

    /// Public market data: prices, order books and trades.
    pub fn public(base_url: Url) -> Self {
        Self::new(FamilyKind::Public.as_str(), base_url, "subscriptionType", "eventType")
            .with_slot(SlotSpec::new("priceStream").with_context_keys(&["exchanges", "pairs"]))
            .with_slot(SlotSpec::new("orderBookStream"))
            .with_slot(SlotSpec::new("tradeStream"))
    }

    /// Private account data: own trades, orders and balances.
    pub fn private(base_url: Url) -> Self {
        Self::new(FamilyKind::Private.as_str(), base_url, "subscriptionType", "eventType")
            .with_slot(SlotSpec::new("tradeStream"))
            .with_slot(SlotSpec::new("orderStream"))
            .with_slot(SlotSpec::new("balanceStream").with_context_keys(&["accountId"]))
            .with_auth(true)
    }

    /// Bot/algo events. Run progress restarts clean after a reconnect.
    pub fn algo(base_url: Url) -> Self {
        Self::new(FamilyKind::Algo.as_str(), base_url, "eventType", "command")
            .with_slot(SlotSpec::new("botStream"))
            .with_slot(SlotSpec::new("runStream").cleared_on_reconnect())
            .with_auth(true)
    }

    pub fn for_kind(kind: FamilyKind, base_url: Url) -> Self {
        match kind {
            FamilyKind::Public => Self::public(base_url),
            FamilyKind::Private => Self::private(base_url),
            FamilyKind::Algo => Self::algo(base_url),
        }
    }

    pub fn slot(&self, name: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    /// `{scheme}://{host}/api/v1/{family}/ws`
    pub fn endpoint(&self) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&format!("/api/v1/{}/ws", self.name));
        url.set_query(None);
        url
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoinmuxError::Config("family name is empty".to_string()));
        }
        if !matches!(self.base_url.scheme(), "ws" | "wss") {
            return Err(CoinmuxError::Config(format!(
                "family {} base url must use ws or wss, got {}",
                self.name,
                self.base_url.scheme()
            )));
        }
        if self.slots.is_empty() {
            return Err(CoinmuxError::Config(format!(
                "family {} has no slots",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.name.as_str()) {
                return Err(CoinmuxError::Config(format!(
                    "family {} declares slot {} twice",
                    self.name, slot.name
                )));
            }
        }
        if self.discriminator_field == self.command_field {
            return Err(CoinmuxError::Config(format!(
                "family {} uses {} as both discriminator and command field",
                self.name, self.command_field
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base() -> Url {
        Url::parse("wss://stream.example.com").expect("url")
    }

    #[rstest]
    #[case(FamilyKind::Public, "wss://stream.example.com/api/v1/public/ws")]
    #[case(FamilyKind::Private, "wss://stream.example.com/api/v1/private/ws")]
    #[case(FamilyKind::Algo, "wss://stream.example.com/api/v1/algo/ws")]
    fn test_endpoint_per_family(#[case] kind: FamilyKind, #[case] expected: &str) {
        let config = FamilyConfig::for_kind(kind, base());
        assert_eq!(config.endpoint().as_str(), expected);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_replaces_base_path() {
        let config = FamilyConfig::public(Url::parse("ws://localhost:9000/ignored?x=1").expect("url"));
        assert_eq!(
            config.endpoint().as_str(),
            "ws://localhost:9000/api/v1/public/ws"
        );
    }

    #[test]
    fn test_presets_use_expected_fields() {
        let public = FamilyConfig::public(base());
        assert_eq!(public.discriminator_field, "subscriptionType");
        assert_eq!(public.command_field, "eventType");
        assert!(!public.requires_auth);
        assert_eq!(
            public.slot("priceStream").map(|slot| slot.context_keys.clone()),
            Some(vec!["exchanges".to_string(), "pairs".to_string()])
        );

        let algo = FamilyConfig::algo(base());
        assert_eq!(algo.discriminator_field, "eventType");
        assert_eq!(algo.command_field, "command");
        assert!(algo.requires_auth);
        assert!(algo.slot("runStream").is_some_and(|slot| slot.clear_on_reconnect));
        assert!(algo.slot("orderStream").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let http = FamilyConfig::public(Url::parse("https://stream.example.com").expect("url"));
        assert!(matches!(http.validate(), Err(CoinmuxError::Config(_))));

        let empty = FamilyConfig::new("x", base(), "type", "cmd");
        assert!(empty.validate().is_err());

        let duplicate = FamilyConfig::new("x", base(), "type", "cmd")
            .with_slot(SlotSpec::new("a"))
            .with_slot(SlotSpec::new("a"));
        assert!(duplicate.validate().is_err());

        let same_fields = FamilyConfig::new("x", base(), "type", "type").with_slot(SlotSpec::new("a"));
        assert!(same_fields.validate().is_err());
    }
}
