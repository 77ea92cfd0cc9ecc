//! Infrastructure layer: stores, order orchestration, consumers, workers, config.

pub mod config;
pub mod consumers;
pub mod order_service;
pub mod retry;
pub mod store;
pub mod workers;


pub use config::Settings;
pub use consumers::{EmailRequestConsumer, NotificationPolicy, OrderStatusConsumer};
pub use order_service::{OrderError, OrderService, StatusUpdate, update_order_status};
pub use retry::RetryPolicy;
pub use store::StoreError;
pub use workers::{ConsumerWorker, RecoveryWorker, WorkerHandle};
