//! In-memory event channel for tests/dev.
//!
//! One `InMemoryEventBus` is one topic. It keeps the full topic log in memory and tracks,
//! per consumer group, which offsets are queued, which are in flight (and with whom), and
//! which have been dead-lettered.
//!
//! Retention: the log is never compacted. Groups that join later replay it from offset 0, so
//! memory grows with every published message for the lifetime of the bus.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::bus::{Delivery, DeliverySource, EventBus, PublishError, Subscription};
use crate::EventEnvelope;

/// Deliveries allowed per message before it is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

#[derive(Debug, Clone, Copy)]
struct Pending {
    offset: u64,
    delivered: u32,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    member: u64,
    delivered: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    queue: VecDeque<Pending>,
    in_flight: HashMap<u64, InFlight>,
    dead_letters: Vec<u64>,
}

impl GroupState {
    /// New groups start from the beginning of the topic log.
    fn replaying(log_len: u64) -> Self {
        Self {
            queue: (0..log_len)
                .map(|offset| Pending {
                    offset,
                    delivered: 0,
                })
                .collect(),
            ..Self::default()
        }
    }

    /// Put a message back in log order so per-key ordering survives redelivery.
    fn requeue(&mut self, pending: Pending) {
        let pos = self
            .queue
            .iter()
            .position(|p| p.offset > pending.offset)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, pending);
    }

    fn backlog(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }
}

#[derive(Debug)]
struct TopicState<M> {
    log: Vec<EventEnvelope<M>>,
    groups: HashMap<String, GroupState>,
    closed: bool,
}

impl<M: Clone> TopicState<M> {
    fn take_next(&mut self, group: &str, member: u64) -> Option<Delivery<M>> {
        let log = &self.log;
        let state = self.groups.get_mut(group)?;

        let busy: HashSet<&str> = state
            .in_flight
            .keys()
            .filter_map(|offset| log.get(*offset as usize))
            .map(|env| env.partition_key())
            .collect();

        let idx = state.queue.iter().position(|p| {
            log.get(p.offset as usize)
                .is_some_and(|env| !busy.contains(env.partition_key()))
        })?;
        let pending = state.queue.remove(idx)?;
        let envelope = log.get(pending.offset as usize)?.clone();

        let delivered = pending.delivered + 1;
        state.in_flight.insert(pending.offset, InFlight { member, delivered });

        Some(Delivery::new(envelope, delivered, pending.offset))
    }
}

#[derive(Debug)]
struct Inner<M> {
    topic: String,
    max_deliveries: u32,
    next_member: AtomicU64,
    state: Mutex<TopicState<M>>,
    available: Condvar,
}

impl<M> DeliverySource<M> for Inner<M>
where
    M: Clone + Send + 'static,
{
    fn receive(
        &self,
        group: &str,
        member: u64,
        timeout: Duration,
    ) -> Result<Delivery<M>, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut state = self
            .state
            .lock()
            .map_err(|_| RecvTimeoutError::Disconnected)?;

        loop {
            if state.closed {
                return Err(RecvTimeoutError::Disconnected);
            }
            if let Some(delivery) = state.take_next(group, member) {
                return Ok(delivery);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RecvTimeoutError::Timeout);
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .map_err(|_| RecvTimeoutError::Disconnected)?;
            state = guard;
        }
    }

    fn ack(&self, group: &str, offset: u64) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(g) = state.groups.get_mut(group) {
                g.in_flight.remove(&offset);
            }
        }
        // A blocked partition key may be free again.
        self.available.notify_all();
    }

    fn nack(&self, group: &str, offset: u64) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(g) = state.groups.get_mut(group) {
                if let Some(flight) = g.in_flight.remove(&offset) {
                    if flight.delivered >= self.max_deliveries {
                        g.dead_letters.push(offset);
                        warn!(
                            topic = %self.topic,
                            group,
                            offset,
                            attempts = flight.delivered,
                            "message exceeded max deliveries; moved to dead-letter list"
                        );
                    } else {
                        g.requeue(Pending {
                            offset,
                            delivered: flight.delivered,
                        });
                        debug!(topic = %self.topic, group, offset, "message requeued for redelivery");
                    }
                }
            }
        }
        self.available.notify_all();
    }

    fn leave(&self, group: &str, member: u64) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(g) = state.groups.get_mut(group) {
                let held: Vec<u64> = g
                    .in_flight
                    .iter()
                    .filter(|(_, f)| f.member == member)
                    .map(|(offset, _)| *offset)
                    .collect();

                for offset in held {
                    if let Some(flight) = g.in_flight.remove(&offset) {
                        g.requeue(Pending {
                            offset,
                            delivered: flight.delivered,
                        });
                    }
                }
            }
        }
        self.available.notify_all();
    }
}

/// In-memory durable topic with consumer groups.
///
/// - No IO, blocking receive via a condition variable
/// - At-least-once: unacknowledged messages are redelivered
/// - Messages failing `max_deliveries` times are dead-lettered per group
/// - Unbounded retention: acked messages stay in the log for late-joining groups
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for InMemoryEventBus<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M> InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    pub fn new(topic: impl Into<String>) -> Self {
        Self::with_max_deliveries(topic, DEFAULT_MAX_DELIVERIES)
    }

    pub fn with_max_deliveries(topic: impl Into<String>, max_deliveries: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                topic: topic.into(),
                max_deliveries: max_deliveries.max(1),
                next_member: AtomicU64::new(1),
                state: Mutex::new(TopicState {
                    log: Vec::new(),
                    groups: HashMap::new(),
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Close the topic: members get `Disconnected`, publishers get `Closed`.
    pub fn close(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.closed = true;
        }
        self.inner.available.notify_all();
    }

    /// Everything ever published, in publish order.
    pub fn published(&self) -> Vec<EventEnvelope<M>> {
        match self.inner.state.lock() {
            Ok(state) => state.log.clone(),
            Err(_) => vec![],
        }
    }

    pub fn dead_letters(&self, group: &str) -> Vec<EventEnvelope<M>> {
        let state = match self.inner.state.lock() {
            Ok(s) => s,
            Err(_) => return vec![],
        };

        state
            .groups
            .get(group)
            .map(|g| {
                g.dead_letters
                    .iter()
                    .filter_map(|offset| state.log.get(*offset as usize).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Messages the group has not acknowledged yet (queued + in flight).
    pub fn backlog(&self, group: &str) -> usize {
        match self.inner.state.lock() {
            Ok(state) => state.groups.get(group).map(GroupState::backlog).unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Block until `group` has no backlog, or `timeout` elapses. Returns whether it drained.
    pub fn wait_until_drained(&self, group: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut state) = self.inner.state.lock() else {
            return false;
        };

        loop {
            let backlog = state.groups.get(group).map(GroupState::backlog).unwrap_or(0);
            if backlog == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.inner.available.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => state = guard,
                Err(_) => return false,
            }
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    fn topic(&self) -> &str {
        &self.inner.topic
    }

    fn publish(&self, message: EventEnvelope<M>) -> Result<(), PublishError> {
        if message.topic() != self.inner.topic {
            return Err(PublishError::Rejected(format!(
                "envelope addressed to '{}' published on '{}'",
                message.topic(),
                self.inner.topic
            )));
        }

        let mut state = self.inner.state.lock().map_err(|_| PublishError::Poisoned)?;
        if state.closed {
            return Err(PublishError::Closed);
        }

        let offset = state.log.len() as u64;
        state.log.push(message);
        for group in state.groups.values_mut() {
            group.queue.push_back(Pending {
                offset,
                delivered: 0,
            });
        }
        drop(state);

        self.inner.available.notify_all();
        Ok(())
    }

    fn subscribe(&self, group: &str) -> Subscription<M> {
        let member = self.inner.next_member.fetch_add(1, Ordering::Relaxed);

        // If the lock is poisoned we still hand out a subscription; receive reports
        // `Disconnected` on first use.
        if let Ok(mut state) = self.inner.state.lock() {
            let log_len = state.log.len() as u64;
            state
                .groups
                .entry(group.to_string())
                .or_insert_with(|| GroupState::replaying(log_len));
        }

        let source: Arc<dyn DeliverySource<M>> = self.inner.clone();
        Subscription::new(group, member, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Ping {
        key: String,
        n: u32,
    }

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            "test.ping"
        }

        fn version(&self) -> u32 {
            1
        }

        fn partition_key(&self) -> String {
            self.key.clone()
        }
    }

    fn ping(key: &str, n: u32) -> EventEnvelope<Ping> {
        EventEnvelope::wrap("pings", Ping { key: key.to_string(), n })
    }

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn each_group_sees_every_message_once() {
        let bus = InMemoryEventBus::new("pings");
        let a1 = bus.subscribe("a");
        let a2 = bus.subscribe("a");
        let b = bus.subscribe("b");

        bus.publish(ping("k1", 1)).unwrap();

        let got = a1.recv_timeout(SHORT).unwrap();
        assert_eq!(got.payload().n, 1);
        assert_eq!(got.attempt(), 1);
        assert!(matches!(a2.try_recv(), Err(RecvTimeoutError::Timeout)));
        a1.ack(got);

        let got_b = b.recv_timeout(SHORT).unwrap();
        assert_eq!(got_b.payload().n, 1);
        b.ack(got_b);

        assert_eq!(bus.backlog("a"), 0);
        assert_eq!(bus.backlog("b"), 0);
    }

    #[test]
    fn late_group_replays_from_start_of_log() {
        let bus = InMemoryEventBus::new("pings");
        bus.publish(ping("k1", 1)).unwrap();
        bus.publish(ping("k2", 2)).unwrap();

        let late = bus.subscribe("late");
        let first = late.recv_timeout(SHORT).unwrap();
        let second = late.recv_timeout(SHORT).unwrap();
        assert_eq!((first.payload().n, second.payload().n), (1, 2));
    }

    #[test]
    fn fully_acked_messages_are_retained_for_new_groups() {
        let bus = InMemoryEventBus::new("pings");
        let early = bus.subscribe("early");
        bus.publish(ping("k1", 1)).unwrap();
        early.ack(early.recv_timeout(SHORT).unwrap());
        assert_eq!(bus.backlog("early"), 0);

        assert_eq!(bus.published().len(), 1);
        let late = bus.subscribe("late");
        assert_eq!(late.recv_timeout(SHORT).unwrap().payload().n, 1);
    }

    #[test]
    fn nack_redelivers_with_incremented_attempt() {
        let bus = InMemoryEventBus::new("pings");
        let sub = bus.subscribe("g");
        bus.publish(ping("k1", 1)).unwrap();

        let first = sub.recv_timeout(SHORT).unwrap();
        let id = first.envelope().message_id();
        sub.nack(first);

        let again = sub.recv_timeout(SHORT).unwrap();
        assert_eq!(again.envelope().message_id(), id);
        assert_eq!(again.attempt(), 2);
        assert!(again.is_redelivery());
    }

    #[test]
    fn dead_letters_after_max_deliveries() {
        let bus = InMemoryEventBus::with_max_deliveries("pings", 2);
        let sub = bus.subscribe("g");
        bus.publish(ping("k1", 1)).unwrap();

        sub.nack(sub.recv_timeout(SHORT).unwrap());
        sub.nack(sub.recv_timeout(SHORT).unwrap());

        assert!(matches!(sub.try_recv(), Err(RecvTimeoutError::Timeout)));
        let dead = bus.dead_letters("g");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload().n, 1);
        assert_eq!(bus.backlog("g"), 0);
    }

    #[test]
    fn dropped_member_releases_in_flight_messages() {
        let bus = InMemoryEventBus::new("pings");
        let crashing = bus.subscribe("g");
        let survivor = bus.subscribe("g");
        bus.publish(ping("k1", 1)).unwrap();

        let taken = crashing.recv_timeout(SHORT).unwrap();
        assert_eq!(taken.attempt(), 1);
        drop(crashing);

        let redelivered = survivor.recv_timeout(SHORT).unwrap();
        assert_eq!(redelivered.payload().n, 1);
        assert_eq!(redelivered.attempt(), 2);
    }

    #[test]
    fn same_key_waits_for_in_flight_message() {
        let bus = InMemoryEventBus::new("pings");
        let m1 = bus.subscribe("g");
        let m2 = bus.subscribe("g");
        bus.publish(ping("order-1", 1)).unwrap();
        bus.publish(ping("order-1", 2)).unwrap();
        bus.publish(ping("order-2", 3)).unwrap();

        let first = m1.recv_timeout(SHORT).unwrap();
        assert_eq!(first.payload().n, 1);

        // Key "order-1" is busy, so the other member skips ahead to "order-2".
        let other = m2.recv_timeout(SHORT).unwrap();
        assert_eq!(other.payload().n, 3);
        m2.ack(other);
        assert!(matches!(m2.try_recv(), Err(RecvTimeoutError::Timeout)));

        m1.ack(first);
        let second = m2.recv_timeout(SHORT).unwrap();
        assert_eq!(second.payload().n, 2);
    }

    #[test]
    fn rejects_envelopes_for_other_topics() {
        let bus = InMemoryEventBus::new("pings");
        let env = EventEnvelope::wrap("pongs", Ping { key: "k".into(), n: 0 });
        assert!(matches!(bus.publish(env), Err(PublishError::Rejected(_))));
    }

    #[test]
    fn close_disconnects_members_and_publishers() {
        let bus = InMemoryEventBus::new("pings");
        let sub = bus.subscribe("g");
        bus.close();

        assert!(matches!(sub.recv_timeout(SHORT), Err(RecvTimeoutError::Disconnected)));
        assert_eq!(bus.publish(ping("k", 1)), Err(PublishError::Closed));
    }

    #[test]
    fn wait_until_drained_observes_acks_from_other_threads() {
        let bus = InMemoryEventBus::new("pings");
        let sub = bus.subscribe("g");
        bus.publish(ping("k", 1)).unwrap();

        let worker = std::thread::spawn(move || {
            let d = sub.recv_timeout(Duration::from_secs(1)).unwrap();
            sub.ack(d);
        });

        assert!(bus.wait_until_drained("g", Duration::from_secs(2)));
        worker.join().unwrap();
    }
}
