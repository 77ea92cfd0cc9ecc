/// A domain-agnostic integration event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - **partitioned** by a stable key (messages sharing a key keep their relative order
///   within a consumer group)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "orders.order.created").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Partition key; the order id for every message in this workspace.
    fn partition_key(&self) -> String;
}
