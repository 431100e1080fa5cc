use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of an append-only stream, e.g. `variant-42` or `order-<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Builds the conventional `<category>-<key>` stream name.
    pub fn new(category: &str, key: impl std::fmt::Display) -> Self {
        Self(format!("{category}-{key}"))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the first `-`.
    pub fn category(&self) -> &str {
        self.0.split_once('-').map_or(self.0.as_str(), |(c, _)| c)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-stream sequence number.
///
/// A stream with no entries is at version 0; its first entry is version 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a stream that does not exist yet.
    pub fn initial() -> Self {
        Self(0)
    }

    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A journal entry: an event payload plus the metadata needed to store,
/// order and replay it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,

    /// e.g. "StockAdjusted", "StatusChanged".
    pub event_type: String,

    pub stream_id: StreamId,

    /// e.g. "StockLedger", "Order", "CouponUsage".
    pub stream_type: String,

    /// Position of this entry inside its stream.
    pub version: Version,

    pub timestamp: DateTime<Utc>,

    pub payload: serde_json::Value,

    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Deserializes the payload into a typed event.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    stream_id: Option<StreamId>,
    stream_type: Option<String>,
    version: Option<Version>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn stream_id(mut self, id: StreamId) -> Self {
        self.stream_id = Some(id);
        self
    }

    pub fn stream_type(mut self, stream_type: impl Into<String>) -> Self {
        self.stream_type = Some(stream_type.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Defaults to the current time when not set.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns `None` if event type, stream id, stream type, version or
    /// payload is missing.
    pub fn build(self) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type?,
            stream_id: self.stream_id?,
            stream_type: self.stream_type?,
            version: self.version?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload?,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        assert!(Version::new(1) < Version::new(2));
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn stream_id_category() {
        let id = StreamId::new("variant", 42);
        assert_eq!(id.as_str(), "variant-42");
        assert_eq!(id.category(), "variant");
        assert_eq!(StreamId::from_raw("orphan").category(), "orphan");
    }

    #[test]
    fn builder_sets_all_fields() {
        let stream = StreamId::new("order", "abc");
        let envelope = EventEnvelope::builder()
            .event_type("StatusChanged")
            .stream_id(stream.clone())
            .stream_type("Order")
            .version(Version::first())
            .payload_raw(serde_json::json!({"to": "confirmed"}))
            .metadata("actor", serde_json::json!("system"))
            .build()
            .unwrap();

        assert_eq!(envelope.event_type, "StatusChanged");
        assert_eq!(envelope.stream_id, stream);
        assert_eq!(envelope.version, Version::first());
        assert_eq!(envelope.metadata.get("actor"), Some(&serde_json::json!("system")));
    }

    #[test]
    fn builder_returns_none_on_missing_fields() {
        assert!(EventEnvelope::builder().build().is_none());
    }

    #[test]
    fn decode_payload() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Payload {
            delta: i64,
        }

        let envelope = EventEnvelope::builder()
            .event_type("StockAdjusted")
            .stream_id(StreamId::new("variant", 1))
            .stream_type("StockLedger")
            .version(Version::first())
            .payload_raw(serde_json::json!({"delta": -3}))
            .build()
            .unwrap();

        assert_eq!(envelope.decode::<Payload>().unwrap(), Payload { delta: -3 });
    }
}
