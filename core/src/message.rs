/// Chat message model and timestamp normalization
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Where a message entered the buffer from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Origin {
    /// Optimistic copy inserted right after a successful send
    Local,
    /// Delivered over the transport
    #[default]
    Remote,
    /// Loaded from the history API
    History,
}

/// One chat message. `timestamp` is always a valid instant; malformed input
/// is replaced with the receipt time before a `Message` is ever built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(rename = "message")]
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub origin: Origin,
}

impl Message {
    /// Build an optimistic local message stamped with `now`
    pub fn local(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            body: body.into(),
            timestamp: now,
            origin: Origin::Local,
        }
    }

    /// Normalize a raw wire message received at `received_at`
    pub fn from_wire(wire: WireMessage, origin: Origin, received_at: DateTime<Utc>) -> Self {
        let timestamp = normalize_timestamp(wire.timestamp.as_ref(), received_at);
        Self {
            sender_id: wire.sender_id,
            receiver_id: wire.receiver_id,
            body: wire.message,
            timestamp,
            origin,
        }
    }

    /// RFC 3339 rendering used on the wire
    pub fn timestamp_iso(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

/// Message as it appears on the wire and in history rows, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(alias = "sender_id")]
    pub sender_id: String,
    #[serde(alias = "receiver_id")]
    pub receiver_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        Self {
            sender_id: msg.sender_id.clone(),
            receiver_id: msg.receiver_id.clone(),
            message: msg.body.clone(),
            timestamp: Some(serde_json::Value::String(msg.timestamp_iso())),
        }
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse whatever the server sent as a timestamp, falling back to `now`.
pub fn normalize_timestamp(raw: Option<&serde_json::Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    match raw.and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            trace!("Malformed or missing timestamp {:?}, using receipt time", raw);
            now
        }
    }
}

fn parse_timestamp(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
    match raw {
        serde_json::Value::String(s) => parse_timestamp_str(s.trim()),
        // Epoch milliseconds
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_valid_rfc3339_is_kept() {
        let raw = json!("2024-12-31T23:59:58.250+02:00");
        let ts = normalize_timestamp(Some(&raw), now());
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 12, 31, 21, 59, 58).unwrap() + chrono::Duration::milliseconds(250));
    }

    #[test]
    fn test_not_a_date_becomes_receipt_time() {
        let raw = json!("not-a-date");
        assert_eq!(normalize_timestamp(Some(&raw), now()), now());
    }

    #[test]
    fn test_missing_and_odd_types_become_receipt_time() {
        assert_eq!(normalize_timestamp(None, now()), now());
        assert_eq!(normalize_timestamp(Some(&json!(null)), now()), now());
        assert_eq!(normalize_timestamp(Some(&json!("")), now()), now());
        assert_eq!(normalize_timestamp(Some(&json!({"a": 1})), now()), now());
        assert_eq!(normalize_timestamp(Some(&json!(true)), now()), now());
    }

    #[test]
    fn test_naive_and_epoch_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(normalize_timestamp(Some(&json!("2024-01-02T03:04:05")), now()), expected);
        assert_eq!(normalize_timestamp(Some(&json!("2024-01-02 03:04:05")), now()), expected);
        assert_eq!(
            normalize_timestamp(Some(&json!(expected.timestamp_millis())), now()),
            expected
        );
    }

    #[test]
    fn test_wire_aliases_and_serialized_shape() {
        let wire: WireMessage = serde_json::from_value(json!({
            "sender_id": "B",
            "receiver_id": "A",
            "message": "hi",
            "timestamp": "not-a-date"
        }))
        .unwrap();
        let msg = Message::from_wire(wire, Origin::History, now());
        assert_eq!(msg.sender_id, "B");
        assert_eq!(msg.timestamp, now());

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["senderId"], "B");
        assert_eq!(value["message"], "hi");
        let rendered = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(rendered).is_ok());
    }
}
