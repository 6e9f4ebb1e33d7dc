use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The JSON event a domain service stages in the outbox and a consumer
/// decodes on the other side.
///
/// ```json
/// {"type":"UserCreated","key":"42","occurred_at":"2024-05-01T12:00:00Z","payload":{"email":"a@b.c"}}
/// ```
///
/// Decoding is lenient: any field may be missing, and an `occurred_at` that
/// is absent or not RFC 3339 decodes as `None`. Only bytes that are not a
/// JSON object fail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    /// Aggregate key, also used as the partition-routing key
    #[serde(default)]
    pub key: String,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|at| at.with_timezone(&Utc)))
}

impl DomainEvent {
    pub fn new(
        event_type: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            key: key.into(),
            occurred_at: Some(Utc::now()),
            payload,
        }
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn wire_format_uses_type_field() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let event = DomainEvent::new("UserCreated", "42", json!({"email": "a@b.c"})).occurred_at(at);

        let value: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "UserCreated");
        assert_eq!(value["key"], "42");
        assert_eq!(value["occurred_at"], "2024-05-01T12:00:00Z");
        assert_eq!(value["payload"]["email"], "a@b.c");
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        assert!(DomainEvent::decode(b"not json").is_err());
        assert!(DomainEvent::decode(b"[1, 2]").is_err());
    }

    #[test]
    fn decode_tolerates_missing_or_odd_timestamps() {
        let missing = DomainEvent::decode(br#"{"type":"UserCreated","key":"42"}"#).unwrap();
        assert_eq!(missing.event_type, "UserCreated");
        assert_eq!(missing.occurred_at, None);
        assert_eq!(missing.payload, serde_json::Value::Null);

        let odd = DomainEvent::decode(
            br#"{"type":"UserCreated","key":"42","occurred_at":"yesterday","payload":{"id":42}}"#,
        )
        .unwrap();
        assert_eq!(odd.occurred_at, None);
        assert_eq!(odd.payload["id"], 42);

        let offset = DomainEvent::decode(br#"{"occurred_at":"2024-05-01T14:00:00+02:00"}"#).unwrap();
        assert_eq!(offset.occurred_at, Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        assert_eq!(offset.event_type, "");
    }
}
