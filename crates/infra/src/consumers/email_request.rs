use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use orderflow_events::{Delivery, HandlerError, MessageHandler};
use orderflow_orders::{EmailNotice, NewNotification};

use crate::store::NotificationStore;

/// Consumer group on the `email-requests` topic.
pub const EMAIL_GROUP: &str = "email_group";

/// What to do when the same notice is delivered more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotificationPolicy {
    /// Every delivery appends a record; redelivery yields duplicates.
    #[default]
    AppendAlways,
    /// Skip the append when a record for the same customer and order exists.
    DedupeByOrder,
}

impl NotificationPolicy {
    pub fn from_dedupe_flag(dedupe: bool) -> Self {
        if dedupe {
            Self::DedupeByOrder
        } else {
            Self::AppendAlways
        }
    }
}

/// Records that an order confirmation email was sent.
///
/// Never reads or writes orders.
pub struct EmailRequestConsumer {
    notifications: Arc<dyn NotificationStore>,
    policy: NotificationPolicy,
}

impl EmailRequestConsumer {
    pub fn new(notifications: Arc<dyn NotificationStore>) -> Self {
        Self {
            notifications,
            policy: NotificationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: NotificationPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl MessageHandler<EmailNotice> for EmailRequestConsumer {
    fn group(&self) -> &'static str {
        EMAIL_GROUP
    }

    fn handle(&self, delivery: &Delivery<EmailNotice>) -> Result<(), HandlerError> {
        let notice = delivery.payload();
        let attempt = delivery.attempt();

        // Same-key deliveries never overlap within a group, so check-then-append is safe here.
        if self.policy == NotificationPolicy::DedupeByOrder {
            let existing = self
                .notifications
                .find_by_order(notice.order_id)
                .map_err(|e| HandlerError::transient(e.to_string()))?;
            if existing.iter().any(|r| r.customer_id == notice.customer_id) {
                debug!(
                    order_id = %notice.order_id,
                    customer_id = %notice.customer_id,
                    attempt,
                    "email already recorded; skipping"
                );
                return Ok(());
            }
        }

        let record = self
            .notifications
            .append(NewNotification::from_notice(notice, Utc::now()))
            .map_err(|e| HandlerError::transient(e.to_string()))?;

        info!(
            notification_id = %record.id,
            order_id = %record.order_id,
            customer_id = %record.customer_id,
            attempt,
            "email sent recorded"
        );
        Ok(())
    }
}
