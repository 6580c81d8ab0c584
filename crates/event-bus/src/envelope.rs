use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trace::{TraceCarrier, TraceContext};
use crate::{EventBusError, Result};

/// Unique identifier for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
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

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Where a message landed in the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// A message on the bus: opaque payload bytes plus routing key and headers.
///
/// The payload is whatever the producer serialized; the bus never looks
/// inside it. Headers carry the W3C trace context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this message.
    pub event_id: EventId,

    /// Topic the message is published to.
    pub topic: String,

    /// Partitioning key. Messages with the same key keep their relative order.
    pub key: Option<String>,

    /// When the message was created.
    pub timestamp: DateTime<Utc>,

    /// Serialized event body.
    pub payload: Vec<u8>,

    /// Propagation headers.
    pub headers: TraceCarrier,
}

impl EventEnvelope {
    /// Creates a new envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Deserializes the payload as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Trace context carried in the headers.
    pub fn trace_context(&self) -> TraceContext {
        TraceContext::extract(&self.headers)
    }
}

/// Builder for constructing envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    topic: Option<String>,
    key: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<Vec<u8>>,
    headers: TraceCarrier,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Serializes the payload as JSON.
    pub fn payload<T: Serialize + ?Sized>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_vec(payload)?);
        Ok(self)
    }

    /// Sets pre-serialized payload bytes.
    pub fn payload_raw(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Adds a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Injects `trace` into the headers.
    pub fn trace_context(mut self, trace: &TraceContext) -> Self {
        for (key, value) in trace.inject().iter() {
            self.headers.insert(key, value);
        }
        self
    }

    /// Builds the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::MissingField`] when the topic or payload is
    /// not set.
    pub fn build(self) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            topic: self.topic.ok_or(EventBusError::MissingField("topic"))?,
            key: self.key,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.ok_or(EventBusError::MissingField("payload"))?,
            headers: self.headers,
        })
    }
}

/// A message handed to a subscriber, with its position in the log.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: EventEnvelope,
    pub partition: u32,
    pub offset: u64,
    trace: TraceContext,
}

impl Delivery {
    pub fn new(envelope: EventEnvelope, partition: u32, offset: u64) -> Self {
        let trace = envelope.trace_context();
        Self {
            envelope,
            partition,
            offset,
            trace,
        }
    }

    /// Trace context extracted from the message headers.
    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    pub fn position(&self) -> RecordPosition {
        RecordPosition {
            topic: self.envelope.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }

    /// Deserializes the payload as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        self.envelope.decode()
    }
}
