use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use orderflow_core::{AggregateRoot, ExpectedVersion, OrderId};
use orderflow_orders::{NewOrder, Order, OrderStatus};

use super::StoreError;

/// Keyed storage for orders. The store owns id assignment.
pub trait OrderStore: Send + Sync {
    /// Persist a new order and return it with its assigned id (version 1).
    fn insert(&self, order: NewOrder) -> Result<Order, StoreError>;

    fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Replace a stored order if its current version satisfies `expected`.
    ///
    /// Returns the stored order with its version bumped by one.
    fn update(&self, order: Order, expected: ExpectedVersion) -> Result<Order, StoreError>;

    /// Orders currently in `status`, ordered by id.
    fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError>;
}

impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
        (**self).insert(order)
    }

    fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).get(id)
    }

    fn update(&self, order: Order, expected: ExpectedVersion) -> Result<Order, StoreError> {
        (**self).update(order, expected)
    }

    fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        (**self).list_by_status(status)
    }
}

#[derive(Debug, Default)]
struct OrderTable {
    last_id: u64,
    rows: BTreeMap<OrderId, Order>,
}

/// In-memory order store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    inner: RwLock<OrderTable>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OrderStore for InMemoryOrderStore {
    fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut table = self.inner.write().map_err(|_| StoreError::poisoned("order store"))?;
        table.last_id += 1;
        let id = OrderId::new(table.last_id);
        let stored = order.into_order(id);
        table.rows.insert(id, stored.clone());
        Ok(stored)
    }

    fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let table = self.inner.read().map_err(|_| StoreError::poisoned("order store"))?;
        Ok(table.rows.get(&id).cloned())
    }

    fn update(&self, order: Order, expected: ExpectedVersion) -> Result<Order, StoreError> {
        let mut table = self.inner.write().map_err(|_| StoreError::poisoned("order store"))?;
        let id = order.id_typed();

        let current = table
            .rows
            .get(&id)
            .map(|o| o.version())
            .ok_or_else(|| StoreError::Conflict(format!("order {id} is not stored")))?;

        if !expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "order {id} is at version {current}, expected {expected:?}"
            )));
        }

        let stored = order.with_version(current + 1);
        table.rows.insert(id, stored.clone());
        Ok(stored)
    }

    fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        let table = self.inner.read().map_err(|_| StoreError::poisoned("order store"))?;
        Ok(table
            .rows
            .values()
            .filter(|o| o.status() == status)
            .cloned()
            .collect())
    }
}
