//! Integration events and the event channel abstraction.
//!
//! Producers wrap messages in an [`EventEnvelope`] and publish them to a topic through an
//! [`EventBus`]. Consumers join a named consumer group with [`EventBus::subscribe`] and
//! acknowledge each [`Delivery`] once their [`MessageHandler`] is done with it.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{Delivery, DeliverySource, EventBus, PublishError, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::{HandlerError, MessageHandler};
pub use in_memory_bus::InMemoryEventBus;
