use thiserror::Error;

use crate::bus::Delivery;

/// How a consumer failed to process a delivery.
///
/// The distinction drives acknowledgement: transient failures are nacked so the channel
/// redelivers them, permanent ones are acknowledged and dropped so a poison message
/// cannot cause a retry storm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Worth retrying (store unavailable, version conflict, ...).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help (referenced record missing, illegal transition, ...).
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Processes messages delivered to a consumer group member.
///
/// Handlers run under at-least-once delivery and must be idempotent with respect to
/// their target state: the same delivery may arrive again after a crash or a nack.
pub trait MessageHandler<M>: Send + Sync {
    /// Stable consumer group name this handler joins (e.g. "purchase_order_group").
    fn group(&self) -> &'static str;

    fn handle(&self, delivery: &Delivery<M>) -> Result<(), HandlerError>;
}
