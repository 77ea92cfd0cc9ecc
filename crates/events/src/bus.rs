//! Event channel abstraction (mechanics only).
//!
//! A bus is one durable **topic**. Producers `publish` envelopes to it; consumers join a
//! named **consumer group** with `subscribe(group)`.
//!
//! ## Delivery Semantics
//!
//! - **Consumer groups**: every group sees every message; inside a group each message is
//!   handed to exactly one member at a time.
//! - **At-least-once**: a message stays owned by the group until a member acks it. A nack,
//!   or a member leaving with the message still in flight, puts it back in the queue.
//! - **Per-key ordering**: messages sharing a partition key are delivered in publish order
//!   within a group. Nothing is promised across keys.
//!
//! Consumers must therefore be idempotent: processing the same message twice must leave
//! the same observable state as processing it once.

use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use thiserror::Error;

use crate::EventEnvelope;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The channel was closed (process shutting down).
    #[error("channel closed")]
    Closed,

    /// Internal lock poisoning.
    #[error("channel state poisoned")]
    Poisoned,

    /// The transport refused the message.
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// A message handed to one member of a consumer group.
#[derive(Debug, Clone)]
pub struct Delivery<M> {
    envelope: EventEnvelope<M>,
    attempt: u32,
    offset: u64,
}

impl<M> Delivery<M> {
    pub fn new(envelope: EventEnvelope<M>, attempt: u32, offset: u64) -> Self {
        Self {
            envelope,
            attempt,
            offset,
        }
    }

    pub fn envelope(&self) -> &EventEnvelope<M> {
        &self.envelope
    }

    pub fn payload(&self) -> &M {
        self.envelope.payload()
    }

    /// 1 on first delivery, incremented on every redelivery.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Position of the message in the topic log.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Transport-side hooks behind a [`Subscription`].
///
/// Implemented by channel backends; consumers only ever talk to `Subscription`.
pub trait DeliverySource<M>: Send + Sync {
    /// Block up to `timeout` for the next message available to `member` of `group`.
    fn receive(
        &self,
        group: &str,
        member: u64,
        timeout: Duration,
    ) -> Result<Delivery<M>, RecvTimeoutError>;

    /// Mark a delivered message as processed.
    fn ack(&self, group: &str, offset: u64);

    /// Return a delivered message to the group for redelivery.
    fn nack(&self, group: &str, offset: u64);

    /// Member left the group; anything it still holds goes back to the queue.
    fn leave(&self, group: &str, member: u64);
}

/// Membership of one consumer in a consumer group.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = orders_bus.subscribe("purchase_order_group");
///
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(delivery) => match handler.handle(&delivery) {
///             Ok(()) => subscription.ack(delivery),
///             Err(_) => subscription.nack(delivery),
///         },
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// Dropping the subscription leaves the group. Unacknowledged deliveries are then handed
/// to the remaining members (or to the next member that joins).
pub struct Subscription<M> {
    group: String,
    member: u64,
    source: Arc<dyn DeliverySource<M>>,
}

impl<M> Subscription<M> {
    pub fn new(group: impl Into<String>, member: u64, source: Arc<dyn DeliverySource<M>>) -> Self {
        Self {
            group: group.into(),
            member,
            source,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn member(&self) -> u64 {
        self.member
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Delivery<M>, RecvTimeoutError> {
        self.source.receive(&self.group, self.member, timeout)
    }

    /// Take a message if one is immediately available.
    pub fn try_recv(&self) -> Result<Delivery<M>, RecvTimeoutError> {
        self.recv_timeout(Duration::ZERO)
    }

    pub fn ack(&self, delivery: Delivery<M>) {
        self.source.ack(&self.group, delivery.offset);
    }

    pub fn nack(&self, delivery: Delivery<M>) {
        self.source.nack(&self.group, delivery.offset);
    }
}

impl<M> core::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("group", &self.group)
            .field("member", &self.member)
            .finish()
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.source.leave(&self.group, self.member);
    }
}

/// A single durable topic.
///
/// The trait is object safe so components can take `Arc<dyn EventBus<M>>` and stay
/// independent of the transport behind it.
pub trait EventBus<M>: Send + Sync {
    /// Topic name (e.g. "orders").
    fn topic(&self) -> &str;

    fn publish(&self, message: EventEnvelope<M>) -> Result<(), PublishError>;

    /// Join `group` as a new member.
    fn subscribe(&self, group: &str) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn topic(&self) -> &str {
        (**self).topic()
    }

    fn publish(&self, message: EventEnvelope<M>) -> Result<(), PublishError> {
        (**self).publish(message)
    }

    fn subscribe(&self, group: &str) -> Subscription<M> {
        (**self).subscribe(group)
    }
}
