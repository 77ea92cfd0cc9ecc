//! Order creation and status orchestration.
//!
//! ```text
//! CreateOrder
//!   ↓
//! 1. Resolve customer, then every product in input order (fail fast)
//!   ↓
//! 2. Validate items (non-empty, positive quantities)
//!   ↓
//! 3. Insert into the order store (id assigned, status CREATED)
//!   ↓
//! 4. Publish snapshot to `orders`        (retried, independent)
//! 5. Publish email notice to `email-requests` (retried, independent)
//! ```
//!
//! The order is always stored before anything is published, so a consumer that re-loads by
//! id always finds it. Insert and publish are not transactional: a publish that still fails
//! after retries surfaces as [`OrderError::Publish`] carrying the stored order's id, and
//! [`OrderService::recover_unpublished`] republishes stale `CREATED` orders. The
//! [`RecoveryWorker`](crate::workers::RecoveryWorker) runs it on an interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use orderflow_core::{AggregateRoot, CustomerId, DomainError, ExpectedVersion, OrderId, ProductId};
use orderflow_events::{Event, EventBus, EventEnvelope, PublishError};
use orderflow_orders::{
    EmailNotice, NewOrder, Order, OrderItem, OrderSnapshot, OrderStatus, StatusChange,
};

use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::store::{CustomerDirectory, OrderStore, ProductCatalog, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Malformed request (empty items, zero quantity, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("customer {0} not found")]
    CustomerNotFound(CustomerId),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The lifecycle does not allow the requested move.
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    /// Lost an optimistic concurrency race. Retryable.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),

    /// The order was stored but one of its messages could not be published.
    #[error("order {order_id} stored but publish to '{topic}' failed: {reason}")]
    Publish {
        order_id: OrderId,
        topic: String,
        reason: String,
    },
}

impl OrderError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrderError::Conflict(_) | OrderError::Store(_))
    }
}

impl From<StoreError> for OrderError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => OrderError::Conflict(msg),
            other => OrderError::Store(other),
        }
    }
}

impl From<DomainError> for OrderError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => OrderError::Validation(msg),
            DomainError::InvariantViolation(msg) => OrderError::InvalidTransition(msg),
            DomainError::Conflict(msg) => OrderError::Conflict(msg),
        }
    }
}

/// Result of [`update_order_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// The order moved and was written back.
    Applied { order: Order, from: OrderStatus },
    /// The order already was at (or past) the target; nothing was written.
    Unchanged(Order),
}

impl StatusUpdate {
    pub fn order(&self) -> &Order {
        match self {
            StatusUpdate::Applied { order, .. } | StatusUpdate::Unchanged(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            StatusUpdate::Applied { order, .. } | StatusUpdate::Unchanged(order) => order,
        }
    }
}

/// Load `id`, ask the lifecycle for a move to `target` and persist it if one applies.
///
/// The write is guarded by the loaded version, so a concurrent writer turns into
/// [`OrderError::Conflict`] instead of a lost update.
pub fn update_order_status(
    store: &dyn OrderStore,
    id: OrderId,
    target: OrderStatus,
) -> Result<StatusUpdate, OrderError> {
    let mut order = store.get(id)?.ok_or(OrderError::OrderNotFound(id))?;
    let expected = ExpectedVersion::Exact(order.version());

    match order.advance(target, Utc::now())? {
        StatusChange::Unchanged => Ok(StatusUpdate::Unchanged(order)),
        StatusChange::Applied { from, .. } => {
            let order = store.update(order, expected)?;
            Ok(StatusUpdate::Applied { order, from })
        }
    }
}

/// Application service behind the HTTP surface.
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    customers: Arc<dyn CustomerDirectory>,
    products: Arc<dyn ProductCatalog>,
    order_events: Arc<dyn EventBus<OrderSnapshot>>,
    email_requests: Arc<dyn EventBus<EmailNotice>>,
    publish_retry: RetryPolicy,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        customers: Arc<dyn CustomerDirectory>,
        products: Arc<dyn ProductCatalog>,
        order_events: Arc<dyn EventBus<OrderSnapshot>>,
        email_requests: Arc<dyn EventBus<EmailNotice>>,
    ) -> Self {
        Self {
            orders,
            customers,
            products,
            order_events,
            email_requests,
            publish_retry: RetryPolicy::default(),
        }
    }

    pub fn with_publish_retry(mut self, policy: RetryPolicy) -> Self {
        self.publish_retry = policy;
        self
    }

    pub fn orders(&self) -> &Arc<dyn OrderStore> {
        &self.orders
    }

    #[instrument(skip_all, fields(customer_id = %customer_id, items = items.len()), err)]
    pub fn create_order(
        &self,
        customer_id: CustomerId,
        items: &[OrderItem],
    ) -> Result<Order, OrderError> {
        if self.customers.get_customer(customer_id)?.is_none() {
            return Err(OrderError::CustomerNotFound(customer_id));
        }
        for item in items {
            if self.products.get_product(item.product_id)?.is_none() {
                return Err(OrderError::ProductNotFound(item.product_id));
            }
        }

        let new_order = NewOrder::build(customer_id, items, Utc::now())?;

        let order = self.orders.insert(new_order)?;
        let order_id = order.id_typed();
        info!(%order_id, %customer_id, lines = order.lines().len(), "order created");

        let snapshot = self.publish(self.order_events.as_ref(), OrderSnapshot::from(&order));
        let notice = self.publish(self.email_requests.as_ref(), EmailNotice::for_order(&order));

        match snapshot.and(notice) {
            Ok(()) => Ok(order),
            Err((topic, err)) => Err(OrderError::Publish {
                order_id,
                topic,
                reason: err.to_string(),
            }),
        }
    }

    #[instrument(skip_all, fields(order_id = %id))]
    pub fn get_order(&self, id: OrderId) -> Result<Order, OrderError> {
        self.orders.get(id)?.ok_or(OrderError::OrderNotFound(id))
    }

    #[instrument(skip_all, fields(order_id = %id, target = %status), err)]
    pub fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order, OrderError> {
        let update = update_order_status(self.orders.as_ref(), id, status)?;
        match &update {
            StatusUpdate::Applied { order, from } => {
                info!(order_id = %id, %from, to = %order.status(), "order status updated")
            }
            StatusUpdate::Unchanged(order) => {
                debug!(order_id = %id, current = %order.status(), "order status already reached")
            }
        }
        Ok(update.into_order())
    }

    /// Republish the snapshot of every order still `CREATED` after `stale_after`.
    ///
    /// Email notices are not replayed. Returns how many orders were republished.
    #[instrument(skip_all, fields(stale_after_secs = stale_after.as_secs()), err)]
    pub fn recover_unpublished(&self, stale_after: Duration) -> Result<usize, OrderError> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| OrderError::Validation(format!("stale_after out of range: {e}")))?;
        let cutoff = Utc::now() - stale_after;

        let mut republished = 0;
        for order in self.orders.list_by_status(OrderStatus::Created)? {
            if order.created_at() > cutoff {
                continue;
            }

            let order_id = order.id_typed();
            self.publish(self.order_events.as_ref(), OrderSnapshot::from(&order))
                .map_err(|(topic, err)| OrderError::Publish {
                    order_id,
                    topic,
                    reason: err.to_string(),
                })?;
            republished += 1;
        }

        if republished > 0 {
            info!(republished, "republished stale orders");
        }
        Ok(republished)
    }

    fn publish<M>(&self, bus: &dyn EventBus<M>, payload: M) -> Result<(), (String, PublishError)>
    where
        M: Event,
    {
        let topic = bus.topic().to_string();
        let envelope = EventEnvelope::wrap(topic.clone(), payload);
        let message_id = envelope.message_id();

        retry_with_backoff(
            &self.publish_retry,
            |err: &PublishError| !matches!(err, PublishError::Closed),
            |_| bus.publish(envelope.clone()),
        )
        .map_err(|err| {
            error!(%topic, %message_id, error = %err, "publish failed after retries");
            (topic, err)
        })
    }
}
