use std::sync::Arc;

use tracing::{debug, info};

use orderflow_events::{Delivery, HandlerError, MessageHandler};
use orderflow_orders::{OrderSnapshot, OrderStatus};

use crate::order_service::{StatusUpdate, update_order_status};
use crate::store::OrderStore;

/// Consumer group on the `orders` topic.
pub const ORDER_STATUS_GROUP: &str = "purchase_order_group";

/// Moves freshly created orders to `AWAITING_PAYMENT`.
///
/// Only the snapshot's id is trusted: the order is re-loaded from the store, so a stale or
/// duplicated snapshot can never move an order backwards.
pub struct OrderStatusConsumer {
    orders: Arc<dyn OrderStore>,
}

impl OrderStatusConsumer {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }
}

impl MessageHandler<OrderSnapshot> for OrderStatusConsumer {
    fn group(&self) -> &'static str {
        ORDER_STATUS_GROUP
    }

    fn handle(&self, delivery: &Delivery<OrderSnapshot>) -> Result<(), HandlerError> {
        let order_id = delivery.payload().id;
        let attempt = delivery.attempt();

        match update_order_status(self.orders.as_ref(), order_id, OrderStatus::AwaitingPayment) {
            Ok(StatusUpdate::Applied { order, from }) => {
                info!(%order_id, %from, to = %order.status(), attempt, "order status advanced");
                Ok(())
            }
            Ok(StatusUpdate::Unchanged(order)) => {
                debug!(%order_id, status = %order.status(), attempt, "duplicate order event ignored");
                Ok(())
            }
            // Store outage or a lost version race: let the channel redeliver.
            Err(err) if err.is_transient() => Err(HandlerError::transient(err.to_string())),
            // Unknown order or illegal transition: redelivery cannot fix it.
            Err(err) => Err(HandlerError::permanent(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orderflow_core::{AggregateRoot, CustomerId, ExpectedVersion, OrderId, ProductId};
    use orderflow_events::EventEnvelope;
    use orderflow_orders::{NewOrder, Order, OrderItem, ORDERS_TOPIC};

    use crate::store::{InMemoryOrderStore, StoreError};

    fn stored_order(store: &InMemoryOrderStore) -> Order {
        let new_order = NewOrder::build(
            CustomerId::new(7),
            &[OrderItem {
                product_id: ProductId::new(1),
                quantity: 2,
            }],
            Utc::now(),
        )
        .unwrap();
        store.insert(new_order).unwrap()
    }

    fn delivery(snapshot: OrderSnapshot, attempt: u32) -> Delivery<OrderSnapshot> {
        Delivery::new(EventEnvelope::wrap(ORDERS_TOPIC, snapshot), attempt, 0)
    }

    #[test]
    fn advances_created_order() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = stored_order(&store);
        let consumer = OrderStatusConsumer::new(store.clone());

        consumer.handle(&delivery(OrderSnapshot::from(&order), 1)).unwrap();

        let stored = store.get(order.id_typed()).unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::AwaitingPayment);
        assert_eq!(stored.version(), 2);
    }

    #[test]
    fn duplicate_delivery_is_a_noop() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = stored_order(&store);
        let consumer = OrderStatusConsumer::new(store.clone());
        let snapshot = OrderSnapshot::from(&order);

        consumer.handle(&delivery(snapshot.clone(), 1)).unwrap();
        consumer.handle(&delivery(snapshot, 2)).unwrap();

        let stored = store.get(order.id_typed()).unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::AwaitingPayment);
        assert_eq!(stored.version(), 2);
    }

    #[test]
    fn stale_snapshot_fields_are_ignored() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = stored_order(&store);
        let consumer = OrderStatusConsumer::new(store.clone());

        let mut snapshot = OrderSnapshot::from(&order);
        snapshot.status = OrderStatus::AwaitingPayment;
        consumer.handle(&delivery(snapshot, 1)).unwrap();

        let stored = store.get(order.id_typed()).unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::AwaitingPayment);
    }

    #[test]
    fn missing_order_is_permanent() {
        let store = Arc::new(InMemoryOrderStore::new());
        let ghost = stored_order(&InMemoryOrderStore::new());
        let consumer = OrderStatusConsumer::new(store.clone());

        let mut snapshot = OrderSnapshot::from(&ghost);
        snapshot.id = OrderId::new(404);
        let err = consumer.handle(&delivery(snapshot, 1)).unwrap_err();

        assert!(!err.is_transient());
        assert!(store.is_empty());
    }

    /// Store whose writes always lose the version race.
    struct RacingStore {
        inner: InMemoryOrderStore,
    }

    impl OrderStore for RacingStore {
        fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
            self.inner.insert(order)
        }

        fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
            self.inner.get(id)
        }

        fn update(&self, _order: Order, _expected: ExpectedVersion) -> Result<Order, StoreError> {
            Err(StoreError::Conflict("concurrent writer".into()))
        }

        fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
            self.inner.list_by_status(status)
        }
    }

    #[test]
    fn version_conflict_is_transient() {
        let inner = InMemoryOrderStore::new();
        let order = stored_order(&inner);
        let consumer = OrderStatusConsumer::new(Arc::new(RacingStore { inner }));

        let err = consumer.handle(&delivery(OrderSnapshot::from(&order), 1)).unwrap_err();
        assert!(err.is_transient());
    }
}
