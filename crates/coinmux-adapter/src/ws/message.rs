/*
[INPUT]:  Raw WebSocket text frames
[OUTPUT]: Decoded JSON payloads, reconnect notifications, sampled diagnostics
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When changing frame format or diagnostic sampling
*/

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::family::FamilyConfig;

const PARSE_FAIL_LOG_LIMIT: usize = 3;
const DROPPED_SEND_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static DROPPED_SEND_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// The client-side notification fanned out when a connection closes.
///
/// Only the discriminator is present; it never arrives from the server.
pub fn reconnect_payload(family: &FamilyConfig) -> Value {
    let mut body = Map::new();
    body.insert(
        family.discriminator_field.clone(),
        Value::String(family.reconnect_value.clone()),
    );
    Value::Object(body)
}

/// Discriminator value of a frame, if it carries one.
pub fn slot_of<'a>(message: &'a Value, discriminator_field: &str) -> Option<&'a str> {
    message.get(discriminator_field)?.as_str()
}

pub fn is_reconnect(message: &Value, family: &FamilyConfig) -> bool {
    slot_of(message, &family.discriminator_field) == Some(family.reconnect_value.as_str())
}

/// Decode a text frame; failures are logged (sampled) and the frame is dropped.
pub(crate) fn decode_frame(family: &str, text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Some(value),
        Err(err) => {
            log_parse_fail_once(family, &err, text);
            None
        }
    }
}

pub(crate) fn log_dropped_send(family: &str, payload: &Value) {
    let count = DROPPED_SEND_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < DROPPED_SEND_LOG_LIMIT {
        let preview = truncate_for_log(&payload.to_string(), RAW_LOG_MAX_BYTES);
        debug!(
            family,
            sample_index = count + 1,
            sample_limit = DROPPED_SEND_LOG_LIMIT,
            message = %preview,
            "ws send dropped; connection not open"
        );
    }
}

fn log_parse_fail_once(family: &str, err: &serde_json::Error, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        warn!(
            family,
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            family,
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            message = %preview,
            "ws message parse failed"
        );
    }
}

pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut cut = max_len;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + 3);
    out.push_str(&value[..cut]);
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;

    fn base() -> Url {
        Url::parse("wss://stream.example.com").expect("url")
    }

    #[test]
    fn test_reconnect_payload_carries_only_discriminator() {
        assert_eq!(
            reconnect_payload(&FamilyConfig::public(base())),
            json!({"subscriptionType": "RECONNECT"})
        );
        assert_eq!(
            reconnect_payload(&FamilyConfig::algo(base())),
            json!({"eventType": "RECONNECT"})
        );
    }

    #[test]
    fn test_slot_of_and_is_reconnect() {
        let family = FamilyConfig::private(base());
        let frame = json!({"subscriptionType": "orderStream", "orders": []});

        assert_eq!(slot_of(&frame, "subscriptionType"), Some("orderStream"));
        assert_eq!(slot_of(&frame, "eventType"), None);
        assert!(!is_reconnect(&frame, &family));
        assert!(is_reconnect(&reconnect_payload(&family), &family));
    }

    #[test]
    fn test_decode_frame_drops_garbage() {
        assert_eq!(decode_frame("public", "{\"a\":1}"), Some(json!({"a": 1})));
        assert_eq!(decode_frame("public", "not json"), None);
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        assert_eq!(truncate_for_log("abc", 10), "abc");
        assert_eq!(truncate_for_log("abcdef", 3), "abc...");
        assert_eq!(truncate_for_log("ééé", 3), "é...");
    }
}
