//! Consumer-group handlers for the two topics.

pub mod email_request;
pub mod order_status;

pub use email_request::{EMAIL_GROUP, EmailRequestConsumer, NotificationPolicy};
pub use order_status::{ORDER_STATUS_GROUP, OrderStatusConsumer};
