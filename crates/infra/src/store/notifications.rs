use std::sync::{Arc, RwLock};

use orderflow_core::{NotificationId, OrderId};
use orderflow_orders::{NewNotification, NotificationRecord};

use super::StoreError;

/// Append-only storage for sent-email records.
pub trait NotificationStore: Send + Sync {
    fn append(&self, record: NewNotification) -> Result<NotificationRecord, StoreError>;

    /// All records in insertion order.
    fn list(&self) -> Result<Vec<NotificationRecord>, StoreError>;

    fn find_by_order(&self, order_id: OrderId) -> Result<Vec<NotificationRecord>, StoreError>;
}

impl<S> NotificationStore for Arc<S>
where
    S: NotificationStore + ?Sized,
{
    fn append(&self, record: NewNotification) -> Result<NotificationRecord, StoreError> {
        (**self).append(record)
    }

    fn list(&self) -> Result<Vec<NotificationRecord>, StoreError> {
        (**self).list()
    }

    fn find_by_order(&self, order_id: OrderId) -> Result<Vec<NotificationRecord>, StoreError> {
        (**self).find_by_order(order_id)
    }
}

/// In-memory notification store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    inner: RwLock<Vec<NotificationRecord>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn append(&self, record: NewNotification) -> Result<NotificationRecord, StoreError> {
        let mut rows = self
            .inner
            .write()
            .map_err(|_| StoreError::poisoned("notification store"))?;
        let id = NotificationId::new(rows.len() as u64 + 1);
        let stored = record.into_record(id);
        rows.push(stored.clone());
        Ok(stored)
    }

    fn list(&self) -> Result<Vec<NotificationRecord>, StoreError> {
        let rows = self
            .inner
            .read()
            .map_err(|_| StoreError::poisoned("notification store"))?;
        Ok(rows.clone())
    }

    fn find_by_order(&self, order_id: OrderId) -> Result<Vec<NotificationRecord>, StoreError> {
        let rows = self
            .inner
            .read()
            .map_err(|_| StoreError::poisoned("notification store"))?;
        Ok(rows.iter().filter(|r| r.order_id == order_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orderflow_core::CustomerId;

    fn notice(customer: u64, order: u64) -> NewNotification {
        NewNotification {
            customer_id: CustomerId::new(customer),
            order_id: OrderId::new(order),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn append_assigns_ids_and_keeps_duplicates() {
        let store = InMemoryNotificationStore::new();
        let a = store.append(notice(7, 1)).unwrap();
        let b = store.append(notice(7, 1)).unwrap();

        assert_eq!(a.id, NotificationId::new(1));
        assert_eq!(b.id, NotificationId::new(2));
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn find_by_order_filters() {
        let store = InMemoryNotificationStore::new();
        store.append(notice(7, 1)).unwrap();
        store.append(notice(8, 2)).unwrap();

        let found = store.find_by_order(OrderId::new(2)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].customer_id, CustomerId::new(8));
        assert!(store.find_by_order(OrderId::new(3)).unwrap().is_empty());
    }
}
