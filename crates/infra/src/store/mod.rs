//! Storage ports and their in-memory implementations.
//!
//! Stores are synchronous and `Send + Sync` so they can be shared between the HTTP path and
//! the consumer worker threads behind an `Arc<dyn ...>`.

use thiserror::Error;

pub mod directory;
pub mod notifications;
pub mod orders;

pub use directory::{CustomerDirectory, DirectorySeed, InMemoryDirectory, ProductCatalog, SeedError};
pub use notifications::{InMemoryNotificationStore, NotificationStore};
pub use orders::{InMemoryOrderStore, OrderStore};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Backend unreachable or its state is unusable (e.g. a poisoned lock). Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Optimistic concurrency check failed. Retryable after a reload.
    #[error("store conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Unavailable(format!("{what} lock poisoned"))
    }
}
