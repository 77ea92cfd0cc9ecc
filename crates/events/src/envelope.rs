use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Event;

/// Envelope for a message published to a topic.
///
/// This is the unit a channel stores and hands out to consumer groups.
/// - `message_id` is unique per publish; a redelivered message keeps its id.
/// - `partition_key` decides ordering: messages with the same key are delivered in
///   publish order within a consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    message_id: Uuid,
    topic: String,
    partition_key: String,
    event_type: String,
    event_version: u32,
    published_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        message_id: Uuid,
        topic: impl Into<String>,
        partition_key: impl Into<String>,
        event_type: impl Into<String>,
        event_version: u32,
        published_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            message_id,
            topic: topic.into(),
            partition_key: partition_key.into(),
            event_type: event_type.into(),
            event_version,
            published_at,
            payload,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event for publication on `topic` with a fresh UUIDv7 message id.
    pub fn wrap(topic: impl Into<String>, payload: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            topic,
            payload.partition_key(),
            payload.event_type(),
            payload.version(),
            Utc::now(),
            payload,
        )
    }
}
