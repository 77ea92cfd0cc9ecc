use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use orderflow_events::{EventBus, HandlerError, MessageHandler, Subscription};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(super) fn new(
        name: &'static str,
        shutdown: mpsc::Sender<()>,
        join: thread::JoinHandle<()>,
    ) -> Self {
        Self {
            name,
            shutdown,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Consumer-group worker loop.
///
/// - Pulls deliveries from one group subscription
/// - Acks on success and on permanent failure, nacks on transient failure
/// - A panicking handler counts as a transient failure; the loop keeps running
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Spawn a worker thread draining `subscription` through `handler`.
    ///
    /// `handler` must be idempotent (at-least-once delivery).
    pub fn spawn<M, H>(
        name: &'static str,
        subscription: Subscription<M>,
        handler: Arc<H>,
        poll_interval: Duration,
    ) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        H: MessageHandler<M> + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, subscription, shutdown_rx, &*handler, poll_interval))?;

        Ok(WorkerHandle::new(name, shutdown_tx, join))
    }

    /// Join the handler's consumer group on `bus` and spawn a worker for it.
    pub fn start<M, B, H>(
        name: &'static str,
        bus: &B,
        handler: Arc<H>,
        poll_interval: Duration,
    ) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M> + ?Sized,
        H: MessageHandler<M> + ?Sized + 'static,
    {
        let subscription = bus.subscribe(handler.group());
        info!(
            worker = name,
            topic = bus.topic(),
            group = subscription.group(),
            "starting consumer worker"
        );
        Self::spawn(name, subscription, handler, poll_interval)
    }
}

fn worker_loop<M, H>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &H,
    poll_interval: Duration,
) where
    H: MessageHandler<M> + ?Sized,
{
    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let delivery = match sub.recv_timeout(poll_interval) {
            Ok(delivery) => delivery,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let message_id = delivery.envelope().message_id();
        let attempt = delivery.attempt();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&delivery)))
            .unwrap_or_else(|payload| {
                let reason = panic_reason(payload.as_ref());
                error!(
                    worker = name,
                    group = sub.group(),
                    %message_id,
                    attempt,
                    %reason,
                    "handler panicked"
                );
                Err(HandlerError::transient(format!("handler panicked: {reason}")))
            });

        match outcome {
            Ok(()) => sub.ack(delivery),
            Err(HandlerError::Permanent(reason)) => {
                warn!(
                    worker = name,
                    group = sub.group(),
                    %message_id,
                    attempt,
                    %reason,
                    "dropping message after permanent failure"
                );
                sub.ack(delivery);
            }
            Err(HandlerError::Transient(reason)) => {
                warn!(
                    worker = name,
                    group = sub.group(),
                    %message_id,
                    attempt,
                    %reason,
                    "handler failed; message will be redelivered"
                );
                sub.nack(delivery);
                thread::sleep(redelivery_pause(attempt, poll_interval));
            }
        }
    }

    debug!(worker = name, group = sub.group(), "consumer worker stopped");
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Short pause after a nack so a failing dependency is not hammered.
fn redelivery_pause(attempt: u32, poll_interval: Duration) -> Duration {
    Duration::from_millis(10u64.saturating_mul(u64::from(attempt))).min(poll_interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    use orderflow_events::{Delivery, Event, EventEnvelope, InMemoryEventBus};

    #[derive(Debug, Clone, PartialEq)]
    struct Job(u32);

    impl Event for Job {
        fn event_type(&self) -> &'static str {
            "test.job"
        }

        fn version(&self) -> u32 {
            1
        }

        fn partition_key(&self) -> String {
            self.0.to_string()
        }
    }

    /// Records every attempt; fails according to `outcome`.
    struct Recorder {
        seen: Mutex<Vec<(u32, u32)>>,
        outcome: fn(&Job, u32) -> Result<(), HandlerError>,
    }

    impl Recorder {
        fn new(outcome: fn(&Job, u32) -> Result<(), HandlerError>) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                outcome,
            })
        }

        fn seen(&self) -> Vec<(u32, u32)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl MessageHandler<Job> for Recorder {
        fn group(&self) -> &'static str {
            "recorders"
        }

        fn handle(&self, delivery: &Delivery<Job>) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push((delivery.payload().0, delivery.attempt()));
            (self.outcome)(delivery.payload(), delivery.attempt())
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for worker");
            thread::sleep(Duration::from_millis(5));
        }
    }

    const TICK: Duration = Duration::from_millis(20);

    #[test]
    fn processes_and_acks_messages() {
        let bus: InMemoryEventBus<Job> = InMemoryEventBus::new("jobs");
        let handler = Recorder::new(|_, _| Ok(()));
        let worker = ConsumerWorker::start("jobs-worker", &bus, handler.clone(), TICK).unwrap();

        bus.publish(EventEnvelope::wrap("jobs", Job(1))).unwrap();
        bus.publish(EventEnvelope::wrap("jobs", Job(2))).unwrap();

        assert!(bus.wait_until_drained("recorders", Duration::from_secs(5)));
        worker.shutdown();

        assert_eq!(handler.seen(), vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn transient_failures_are_redelivered() {
        let bus: InMemoryEventBus<Job> = InMemoryEventBus::new("jobs");
        let handler = Recorder::new(|_, attempt| {
            if attempt < 3 {
                Err(HandlerError::transient("not yet"))
            } else {
                Ok(())
            }
        });
        let worker = ConsumerWorker::start("jobs-worker", &bus, handler.clone(), TICK).unwrap();

        bus.publish(EventEnvelope::wrap("jobs", Job(9))).unwrap();
        assert!(bus.wait_until_drained("recorders", Duration::from_secs(5)));
        worker.shutdown();

        assert_eq!(handler.seen(), vec![(9, 1), (9, 2), (9, 3)]);
        assert!(bus.dead_letters("recorders").is_empty());
    }

    #[test]
    fn permanent_failures_are_dropped() {
        let bus: InMemoryEventBus<Job> = InMemoryEventBus::new("jobs");
        let handler = Recorder::new(|job, _| {
            if job.0 == 1 {
                Err(HandlerError::permanent("poison"))
            } else {
                Ok(())
            }
        });
        let worker = ConsumerWorker::start("jobs-worker", &bus, handler.clone(), TICK).unwrap();

        bus.publish(EventEnvelope::wrap("jobs", Job(1))).unwrap();
        bus.publish(EventEnvelope::wrap("jobs", Job(2))).unwrap();
        wait_for(|| handler.seen().len() == 2);
        assert!(bus.wait_until_drained("recorders", Duration::from_secs(5)));
        worker.shutdown();

        assert_eq!(handler.seen(), vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn panicking_handler_is_redelivered_and_worker_survives() {
        let bus: InMemoryEventBus<Job> = InMemoryEventBus::new("jobs");
        let handler = Recorder::new(|job, attempt| {
            if job.0 == 4 && attempt == 1 {
                panic!("handler blew up");
            }
            Ok(())
        });
        let worker = ConsumerWorker::start("jobs-worker", &bus, handler.clone(), TICK).unwrap();

        bus.publish(EventEnvelope::wrap("jobs", Job(4))).unwrap();
        bus.publish(EventEnvelope::wrap("jobs", Job(5))).unwrap();
        assert!(bus.wait_until_drained("recorders", Duration::from_secs(5)));
        worker.shutdown();

        let seen = handler.seen();
        assert!(seen.contains(&(4, 1)));
        assert!(seen.contains(&(4, 2)));
        assert!(seen.contains(&(5, 1)));
        assert!(bus.dead_letters("recorders").is_empty());
    }

    #[test]
    fn panic_reason_reads_string_payloads() {
        assert_eq!(panic_reason(&"boom"), "boom");
        assert_eq!(panic_reason(&String::from("bang")), "bang");
        assert_eq!(panic_reason(&42_u8), "non-string panic payload");
    }

    #[test]
    fn stops_when_the_bus_closes() {
        let bus: InMemoryEventBus<Job> = InMemoryEventBus::new("jobs");
        let handler = Recorder::new(|_, _| Ok(()));
        let worker = ConsumerWorker::start("jobs-worker", &bus, handler, TICK).unwrap();

        bus.close();
        // Joins promptly because the loop sees Disconnected.
        worker.shutdown();
    }

    #[test]
    fn redelivery_pause_is_bounded_by_poll_interval() {
        assert_eq!(redelivery_pause(1, TICK), Duration::from_millis(10));
        assert_eq!(redelivery_pause(50, TICK), TICK);
    }
}
