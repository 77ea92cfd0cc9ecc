//! Orders domain module.
//!
//! This crate contains the order lifecycle rules and the messages exchanged between the
//! order service and its consumers, implemented purely as deterministic domain logic
//! (no IO, no HTTP, no storage).

pub mod messages;
pub mod notification;
pub mod order;
pub mod party;

pub use messages::{EMAIL_REQUESTS_TOPIC, EmailNotice, ORDERS_TOPIC, OrderSnapshot};
pub use notification::{NewNotification, NotificationRecord};
pub use order::{NewOrder, Order, OrderItem, OrderLine, OrderStatus, StatusChange};
pub use party::{Customer, Product};
