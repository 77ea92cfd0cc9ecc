//! Messages carried by the `orders` and `email-requests` topics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use orderflow_core::{CustomerId, OrderId, ProductId, ValueObject};
use orderflow_events::Event;

use crate::order::{Order, OrderStatus};

/// Topic carrying full order snapshots.
pub const ORDERS_TOPIC: &str = "orders";

/// Topic carrying email requests derived from order creation.
pub const EMAIL_REQUESTS_TOPIC: &str = "email-requests";

/// Full order snapshot published after an order is stored.
///
/// Consumers must not trust the mutable fields (`status`, `updated_at`): by the time the
/// snapshot arrives the stored order may have moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub products: BTreeSet<ProductId>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderSnapshot {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id_typed(),
            customer_id: order.customer_id(),
            products: order.products(),
            status: order.status(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

impl ValueObject for OrderSnapshot {}

impl Event for OrderSnapshot {
    fn event_type(&self) -> &'static str {
        "orders.order.snapshot"
    }

    fn version(&self) -> u32 {
        1
    }

    fn partition_key(&self) -> String {
        self.id.to_string()
    }
}

/// Request to notify a customer about a newly created order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailNotice {
    pub customer_id: CustomerId,
    pub order_id: OrderId,
}

impl EmailNotice {
    pub fn for_order(order: &Order) -> Self {
        Self {
            customer_id: order.customer_id(),
            order_id: order.id_typed(),
        }
    }
}

impl ValueObject for EmailNotice {}

impl Event for EmailNotice {
    fn event_type(&self) -> &'static str {
        "orders.email.requested"
    }

    fn version(&self) -> u32 {
        1
    }

    fn partition_key(&self) -> String {
        self.order_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{NewOrder, OrderItem};

    fn order() -> Order {
        NewOrder::build(
            CustomerId::new(7),
            &[
                OrderItem { product_id: ProductId::new(2), quantity: 1 },
                OrderItem { product_id: ProductId::new(1), quantity: 2 },
            ],
            Utc::now(),
        )
        .unwrap()
        .into_order(OrderId::new(3))
    }

    #[test]
    fn snapshot_carries_product_set_and_status() {
        let snapshot = OrderSnapshot::from(&order());

        assert_eq!(snapshot.id, OrderId::new(3));
        assert_eq!(snapshot.customer_id, CustomerId::new(7));
        assert_eq!(snapshot.products, BTreeSet::from([ProductId::new(1), ProductId::new(2)]));
        assert_eq!(snapshot.status, OrderStatus::Created);
        assert_eq!(snapshot.partition_key(), "3");
    }

    #[test]
    fn email_notice_wire_format() {
        let notice = EmailNotice::for_order(&order());
        let json = serde_json::to_value(notice).unwrap();
        assert_eq!(json, serde_json::json!({"customer_id": 7, "order_id": 3}));
        assert_eq!(notice.partition_key(), "3");
    }
}
