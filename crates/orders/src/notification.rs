use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{CustomerId, Entity, NotificationId, OrderId};

use crate::messages::EmailNotice;

/// Persisted record that an order email was sent.
///
/// Append-only: never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub customer_id: CustomerId,
    pub order_id: OrderId,
    pub sent_at: DateTime<Utc>,
}

impl Entity for NotificationRecord {
    type Id = NotificationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Notification record before the store assigns its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewNotification {
    pub customer_id: CustomerId,
    pub order_id: OrderId,
    pub sent_at: DateTime<Utc>,
}

impl NewNotification {
    pub fn from_notice(notice: &EmailNotice, sent_at: DateTime<Utc>) -> Self {
        Self {
            customer_id: notice.customer_id,
            order_id: notice.order_id,
            sent_at,
        }
    }

    pub fn into_record(self, id: NotificationId) -> NotificationRecord {
        NotificationRecord {
            id,
            customer_id: self.customer_id,
            order_id: self.order_id,
            sent_at: self.sent_at,
        }
    }
}
