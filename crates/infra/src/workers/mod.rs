//! Background worker threads.

pub mod consumer_worker;
pub mod recovery_worker;

pub use consumer_worker::{ConsumerWorker, WorkerHandle};
pub use recovery_worker::RecoveryWorker;
