//! # Change Events
//!
//! Wire payloads from the change-notification transport and their
//! normalized, typed form.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{RealtimeError, RealtimeResult};

/// Type of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// New record inserted
    Insert,
    /// Existing record updated
    Update,
    /// Record deleted
    Delete,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Insert => write!(f, "INSERT"),
            EventType::Update => write!(f, "UPDATE"),
            EventType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Inbound wire message, exactly as the transport delivers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangePayload {
    pub event: EventType,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
    pub table: String,
    pub schema: String,
}

impl RawChangePayload {
    /// Parse a raw JSON value
    pub fn from_value(value: Value) -> RealtimeResult<Self> {
        serde_json::from_value(value).map_err(|e| RealtimeError::InvalidMessage(e.to_string()))
    }

    pub fn insert(table: &str, new: Value) -> Self {
        Self {
            event: EventType::Insert,
            new: Some(new),
            old: None,
            table: table.to_string(),
            schema: "public".to_string(),
        }
    }

    pub fn update(table: &str, old: Value, new: Value) -> Self {
        Self {
            event: EventType::Update,
            new: Some(new),
            old: Some(old),
            table: table.to_string(),
            schema: "public".to_string(),
        }
    }

    pub fn delete(table: &str, old: Value) -> Self {
        Self {
            event: EventType::Delete,
            new: None,
            old: Some(old),
            table: table.to_string(),
            schema: "public".to_string(),
        }
    }
}

/// Record side of a payload; `null` and `{}` both mean absent
fn present(side: Option<Value>) -> Option<Value> {
    match side {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(v) => Some(v),
    }
}

/// The change itself; each variant carries exactly the sides it has
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "UPPERCASE")]
pub enum Change<T> {
    Insert { new: T },
    Update { old: T, new: T },
    Delete { old: T },
}

impl<T> Change<T> {
    pub fn event_type(&self) -> EventType {
        match self {
            Change::Insert { .. } => EventType::Insert,
            Change::Update { .. } => EventType::Update,
            Change::Delete { .. } => EventType::Delete,
        }
    }

    fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<Change<U>, E> {
        Ok(match self {
            Change::Insert { new } => Change::Insert { new: f(new)? },
            Change::Update { old, new } => Change::Update {
                old: f(old)?,
                new: f(new)?,
            },
            Change::Delete { old } => Change::Delete { old: f(old)? },
        })
    }
}

/// Normalized change event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent<T = Value> {
    pub change: Change<T>,
    pub table: String,
    pub schema: String,
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent<Value> {
    /// Normalize a raw payload, rejecting shapes that break the
    /// INSERT/UPDATE/DELETE side invariants
    pub fn from_raw(raw: RawChangePayload) -> RealtimeResult<Self> {
        let new = present(raw.new);
        let old = present(raw.old);

        let change = match (raw.event, old, new) {
            (EventType::Insert, _, Some(new)) => Change::Insert { new },
            (EventType::Update, Some(old), Some(new)) => Change::Update { old, new },
            (EventType::Delete, Some(old), _) => Change::Delete { old },
            (event, old, new) => {
                return Err(RealtimeError::InvalidMessage(format!(
                    "{} on {} with old={} new={}",
                    event,
                    raw.table,
                    if old.is_some() { "present" } else { "absent" },
                    if new.is_some() { "present" } else { "absent" },
                )))
            }
        };

        Ok(Self {
            change,
            table: raw.table,
            schema: raw.schema,
            received_at: Utc::now(),
        })
    }

    /// Decode both record sides into a concrete row type
    pub fn decode<T: DeserializeOwned>(&self) -> RealtimeResult<ChangeEvent<T>> {
        let change = self
            .change
            .clone()
            .try_map(serde_json::from_value::<T>)
            .map_err(|e| RealtimeError::InvalidMessage(format!("{}: {}", self.table, e)))?;

        Ok(ChangeEvent {
            change,
            table: self.table.clone(),
            schema: self.schema.clone(),
            received_at: self.received_at,
        })
    }
}

impl<T> ChangeEvent<T> {
    pub fn operation(&self) -> EventType {
        self.change.event_type()
    }

    /// Record before the change (UPDATE, DELETE)
    pub fn before(&self) -> Option<&T> {
        match &self.change {
            Change::Insert { .. } => None,
            Change::Update { old, .. } | Change::Delete { old } => Some(old),
        }
    }

    /// Record after the change (INSERT, UPDATE)
    pub fn after(&self) -> Option<&T> {
        match &self.change {
            Change::Insert { new } | Change::Update { new, .. } => Some(new),
            Change::Delete { .. } => None,
        }
    }

    /// The most recent known version of the record
    pub fn record(&self) -> &T {
        match &self.change {
            Change::Insert { new } | Change::Update { new, .. } => new,
            Change::Delete { old } => old,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_display() {
        assert_eq!(EventType::Insert.to_string(), "INSERT");
        assert_eq!(EventType::Update.to_string(), "UPDATE");
        assert_eq!(EventType::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_raw_payload_wire_shape() {
        let raw = RawChangePayload::from_value(json!({
            "event": "INSERT",
            "new": {"id": 1, "recipient": "u1"},
            "old": null,
            "table": "notifications",
            "schema": "public",
        }))
        .unwrap();

        assert_eq!(raw.event, EventType::Insert);
        assert_eq!(raw.table, "notifications");
        assert!(raw.old.is_none());
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = RawChangePayload::from_value(json!({
            "event": "TRUNCATE",
            "new": null,
            "old": null,
            "table": "notifications",
            "schema": "public",
        }))
        .unwrap_err();

        assert!(matches!(err, RealtimeError::InvalidMessage(_)));
    }

    #[test]
    fn test_insert_normalization() {
        let event = ChangeEvent::from_raw(RawChangePayload::insert("posts", json!({"id": 1}))).unwrap();

        assert_eq!(event.operation(), EventType::Insert);
        assert!(event.before().is_none());
        assert_eq!(event.after(), Some(&json!({"id": 1})));
    }

    #[test]
    fn test_empty_object_is_absent() {
        let raw = RawChangePayload {
            event: EventType::Delete,
            new: Some(json!({})),
            old: Some(json!({"id": 7})),
            table: "sessions".to_string(),
            schema: "public".to_string(),
        };

        let event = ChangeEvent::from_raw(raw).unwrap();
        assert_eq!(event.operation(), EventType::Delete);
        assert!(event.after().is_none());
        assert_eq!(event.record(), &json!({"id": 7}));
    }

    #[test]
    fn test_update_requires_both_sides() {
        let raw = RawChangePayload {
            event: EventType::Update,
            new: Some(json!({"id": 1})),
            old: None,
            table: "sessions".to_string(),
            schema: "public".to_string(),
        };

        assert!(matches!(
            ChangeEvent::from_raw(raw),
            Err(RealtimeError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_insert_without_new_rejected() {
        let raw = RawChangePayload {
            event: EventType::Insert,
            new: None,
            old: None,
            table: "notifications".to_string(),
            schema: "public".to_string(),
        };

        assert!(ChangeEvent::from_raw(raw).is_err());
    }

    #[test]
    fn test_decode_typed() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Note {
            id: u64,
            is_private: bool,
        }

        let event = ChangeEvent::from_raw(RawChangePayload::update(
            "coach_notes",
            json!({"id": 3, "is_private": true}),
            json!({"id": 3, "is_private": false}),
        ))
        .unwrap();

        let typed = event.decode::<Note>().unwrap();
        assert_eq!(typed.before(), Some(&Note { id: 3, is_private: true }));
        assert_eq!(typed.after(), Some(&Note { id: 3, is_private: false }));
        assert!(event.decode::<Vec<u8>>().is_err());
    }
}
