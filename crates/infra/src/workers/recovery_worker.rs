use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::order_service::OrderService;
use crate::workers::WorkerHandle;

/// Periodic recovery loop.
///
/// - Runs [`OrderService::recover_unpublished`] once at start, then every `interval`
/// - A failed scan is logged and retried on the next tick
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct RecoveryWorker;

impl RecoveryWorker {
    pub fn spawn(
        name: &'static str,
        service: Arc<OrderService>,
        interval: Duration,
        stale_after: Duration,
    ) -> io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        info!(
            worker = name,
            interval_ms = interval.as_millis() as u64,
            stale_after_secs = stale_after.as_secs(),
            "starting recovery worker"
        );
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || recovery_loop(name, &service, shutdown_rx, interval, stale_after))?;

        Ok(WorkerHandle::new(name, shutdown_tx, join))
    }
}

fn recovery_loop(
    name: &'static str,
    service: &OrderService,
    shutdown_rx: mpsc::Receiver<()>,
    interval: Duration,
    stale_after: Duration,
) {
    loop {
        match service.recover_unpublished(stale_after) {
            Ok(0) => debug!(worker = name, "recovery scan found nothing"),
            Ok(republished) => info!(worker = name, republished, "recovery scan republished orders"),
            Err(err) => warn!(worker = name, error = %err, "recovery scan failed"),
        }

        match shutdown_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "recovery worker stopped");
}
