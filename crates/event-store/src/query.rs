use chrono::{DateTime, Utc};

use crate::{EventEnvelope, StreamId, Version};

/// Filter over journal entries, used by audit and reconciliation tooling.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub stream_id: Option<StreamId>,

    pub stream_type: Option<String>,

    /// Any of these event types.
    pub event_types: Option<Vec<String>>,

    /// Inclusive.
    pub from_version: Option<Version>,

    /// Inclusive.
    pub to_version: Option<Version>,

    /// Inclusive.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Inclusive.
    pub to_timestamp: Option<DateTime<Utc>>,

    pub limit: Option<usize>,

    pub offset: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_stream(stream_id: StreamId) -> Self {
        Self {
            stream_id: Some(stream_id),
            ..Default::default()
        }
    }

    pub fn for_event_type(event_type: impl Into<String>) -> Self {
        Self {
            event_types: Some(vec![event_type.into()]),
            ..Default::default()
        }
    }

    pub fn stream_id(mut self, id: StreamId) -> Self {
        self.stream_id = Some(id);
        self
    }

    pub fn stream_type(mut self, stream_type: impl Into<String>) -> Self {
        self.stream_type = Some(stream_type.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types = Some(vec![event_type.into()]);
        self
    }

    pub fn event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn from_version(mut self, version: Version) -> Self {
        self.from_version = Some(version);
        self
    }

    pub fn to_version(mut self, version: Version) -> Self {
        self.to_version = Some(version);
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether an entry passes every filter (ignores limit/offset).
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        if self.stream_id.as_ref().is_some_and(|id| &event.stream_id != id) {
            return false;
        }
        if self
            .stream_type
            .as_ref()
            .is_some_and(|t| &event.stream_type != t)
        {
            return false;
        }
        if self
            .event_types
            .as_ref()
            .is_some_and(|types| !types.contains(&event.event_type))
        {
            return false;
        }
        if self.from_version.is_some_and(|v| event.version < v) {
            return false;
        }
        if self.to_version.is_some_and(|v| event.version > v) {
            return false;
        }
        if self.from_timestamp.is_some_and(|t| event.timestamp < t) {
            return false;
        }
        if self.to_timestamp.is_some_and(|t| event.timestamp > t) {
            return false;
        }
        true
    }
}
