//! Key-value store contract consumed by the cache layer.
//!
//! A [`Connector`] turns a store URL into a [`Store`] handle. Handles are
//! cheap to share (`Arc<dyn Store>`) and may connect lazily: a bad URL is the
//! only failure `connect` reports, everything else surfaces on first use.
//!
//! Two backends ship with the crate:
//!
//! - [`RedisConnector`]: the production backend, one multiplexed Redis
//!   connection per handle.
//! - [`MemoryConnector`]: an in-process table shared by all handles it
//!   creates, with call counters for inspection.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::{MemoryConnector, MemoryStats};
pub use self::redis::{RedisConnector, RedisStore};

/// Errors reported by a store handle.
///
/// Only [`StoreError::ConnectionClosed`] is recoverable: callers reconnect
/// once and retry. Every other variant means "treat as uncached".
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store connection is closed")]
    ConnectionClosed,

    #[error("invalid store url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` for the one error class that warrants a reconnect.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

/// A handle to a key-value store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads `key`, returning `None` when it is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value` under `key` with no expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Sets the time-to-live of `key` in whole seconds.
    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError>;

    /// Closes the handle. Later calls on it fail with
    /// [`StoreError::ConnectionClosed`].
    async fn close(&self) -> Result<(), StoreError>;
}

/// Opens store handles for a URL.
pub trait Connector: Send + Sync {
    /// Opens a new, independent handle for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUrl`] if `url` cannot address this backend.
    fn connect(&self, url: &str) -> Result<Arc<dyn Store>, StoreError>;
}
