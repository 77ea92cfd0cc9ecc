//! Infrastructure wiring: stores, topics, the order service and consumer workers.

use std::io;
use std::sync::{Arc, Mutex};

use tracing::info;

use orderflow_events::InMemoryEventBus;
use orderflow_infra::store::{InMemoryDirectory, InMemoryNotificationStore, InMemoryOrderStore};
use orderflow_infra::{
    ConsumerWorker, EmailRequestConsumer, OrderService, OrderStatusConsumer, RecoveryWorker,
    Settings, WorkerHandle,
};
use orderflow_orders::{EMAIL_REQUESTS_TOPIC, EmailNotice, ORDERS_TOPIC, OrderSnapshot};

/// Everything the HTTP handlers need, plus the background workers to stop at shutdown.
pub struct AppServices {
    order_service: Arc<OrderService>,
    notifications: Arc<InMemoryNotificationStore>,
    orders_bus: InMemoryEventBus<OrderSnapshot>,
    email_bus: InMemoryEventBus<EmailNotice>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl AppServices {
    pub fn order_service(&self) -> &OrderService {
        &self.order_service
    }

    pub fn notifications(&self) -> &Arc<InMemoryNotificationStore> {
        &self.notifications
    }

    /// Close both topics and join every worker. Idempotent.
    pub fn shutdown(&self) {
        self.orders_bus.close();
        self.email_bus.close();

        let workers = match self.workers.lock() {
            Ok(mut w) => std::mem::take(&mut *w),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for worker in workers {
            let name = worker.name();
            worker.shutdown();
            info!(worker = name, "worker stopped");
        }
    }
}

/// Build stores and topics, then start one worker per consumer group plus the recovery worker.
pub fn build_services(
    settings: &Settings,
    directory: Arc<InMemoryDirectory>,
) -> io::Result<AppServices> {
    let orders = Arc::new(InMemoryOrderStore::new());
    let notifications = Arc::new(InMemoryNotificationStore::new());

    let max_deliveries = settings.channel.max_deliveries;
    let orders_bus = InMemoryEventBus::with_max_deliveries(ORDERS_TOPIC, max_deliveries);
    let email_bus = InMemoryEventBus::with_max_deliveries(EMAIL_REQUESTS_TOPIC, max_deliveries);

    let order_service = Arc::new(
        OrderService::new(
            orders.clone(),
            directory.clone(),
            directory,
            Arc::new(orders_bus.clone()),
            Arc::new(email_bus.clone()),
        )
        .with_publish_retry(settings.publish_retry()),
    );

    let poll = settings.poll_interval();
    let status_consumer = Arc::new(OrderStatusConsumer::new(orders));
    let email_consumer = Arc::new(
        EmailRequestConsumer::new(notifications.clone()).with_policy(settings.notification_policy()),
    );

    let workers = vec![
        ConsumerWorker::start("order-status-consumer", &orders_bus, status_consumer, poll)?,
        ConsumerWorker::start("email-request-consumer", &email_bus, email_consumer, poll)?,
        RecoveryWorker::spawn(
            "order-recovery",
            order_service.clone(),
            settings.recovery_interval(),
            settings.stale_after(),
        )?,
    ];

    Ok(AppServices {
        order_service,
        notifications,
        orders_bus,
        email_bus,
        workers: Mutex::new(workers),
    })
}
