//! Store connection ownership: one shared connection plus per-call exclusive ones.
//!
//! A [`ConnectionManager`] owns at most one long-lived *shared* connection,
//! bound to the URL it was opened for. Callers borrow connections as
//! [`Lease`]s:
//!
//! - a lease on the shared connection when the requested URL matches it;
//! - otherwise an *exclusive* lease on a freshly opened connection that the
//!   caller alone owns.
//!
//! Leases go back through [`ConnectionManager::release`], which closes
//! exclusive connections and never touches the shared one. The shared
//! connection is only ever closed by [`ConnectionManager::ensure_shared`]
//! (when the URL changes) and [`ConnectionManager::shutdown`].
//!
//! Closing is advisory cleanup: a failed close is logged and never
//! propagated.
//!
//! The manager is an ordinary value. The hosting application creates one,
//! wraps it in an [`Arc`], and hands it to every middleware and writer that
//! should share connections.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::store::{Connector, Store, StoreError};

struct SharedConnection {
    url: String,
    handle: Arc<dyn Store>,
}

/// A borrowed store connection.
///
/// Dropping a lease without [`release`](ConnectionManager::release) leaks an
/// exclusive connection until its handle is dropped.
pub struct Lease {
    handle: Arc<dyn Store>,
    exclusive: bool,
}

impl Lease {
    /// The store handle behind this lease.
    pub fn handle(&self) -> Arc<dyn Store> {
        Arc::clone(&self.handle)
    }

    /// Returns `true` if the caller owns the connection outright.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

/// Owner of the shared store connection.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    shared: RwLock<Option<SharedConnection>>,
}

impl ConnectionManager {
    /// Creates a manager with no shared connection yet.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            shared: RwLock::new(None),
        }
    }

    /// Makes sure the shared connection targets `url`.
    ///
    /// Returns immediately if it already does. If it targets a different URL
    /// the old connection is closed first, then a new one is opened.
    ///
    /// Intended to be called once during start-up, where a failure should
    /// halt the process; the middleware also calls it per request and treats
    /// a failure as "uncached".
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUrl`] if the connector rejects `url`.
    pub async fn ensure_shared(&self, url: &str) -> Result<(), StoreError> {
        if self.shared_url().await.as_deref() == Some(url) {
            return Ok(());
        }

        let mut slot = self.shared.write().await;
        // Another task may have installed it while we waited for the lock.
        if slot.as_ref().is_some_and(|s| s.url == url) {
            return Ok(());
        }

        let handle = self.connector.connect(url)?;
        if let Some(old) = slot.take() {
            info!(old = %old.url, new = %url, "store url changed, replacing shared connection");
            close_quietly(&old.handle).await;
        } else {
            info!(url = %url, "shared store connection opened");
        }
        *slot = Some(SharedConnection {
            url: url.to_owned(),
            handle,
        });
        Ok(())
    }

    /// URL of the current shared connection, if any.
    pub async fn shared_url(&self) -> Option<String> {
        self.shared.read().await.as_ref().map(|s| s.url.clone())
    }

    /// Borrows a connection for `url`: the shared one if it matches,
    /// otherwise a new exclusive one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUrl`] if a new connection is needed and
    /// the connector rejects `url`.
    pub async fn acquire(&self, url: &str) -> Result<Lease, StoreError> {
        if let Some(shared) = self.shared.read().await.as_ref() {
            if shared.url == url {
                return Ok(Lease {
                    handle: Arc::clone(&shared.handle),
                    exclusive: false,
                });
            }
        }

        Ok(Lease {
            handle: self.connector.connect(url)?,
            exclusive: true,
        })
    }

    /// Returns a lease. Exclusive connections are closed; the shared one
    /// is left alone.
    pub async fn release(&self, lease: Lease) {
        if lease.exclusive {
            close_quietly(&lease.handle).await;
        }
    }

    /// Opens a replacement after a [`StoreError::ConnectionClosed`].
    ///
    /// An exclusive caller simply gets a brand-new exclusive connection. A
    /// shared caller replaces the shared slot, so unrelated requests pick up
    /// the healed connection too. The broken shared handle is dropped, not
    /// closed: in-flight requests may still hold it and will reconnect on
    /// their own.
    ///
    /// If the shared slot has meanwhile moved to another URL (or been shut
    /// down) it is left as is and the caller gets an exclusive connection.
    pub async fn reconnect(&self, url: &str, exclusive: bool) -> Result<Lease, StoreError> {
        let handle = self.connector.connect(url)?;
        if !exclusive {
            let mut slot = self.shared.write().await;
            if let Some(shared) = slot.as_mut().filter(|s| s.url == url) {
                shared.handle = Arc::clone(&handle);
                debug!(url = %url, "replaced shared store connection");
                return Ok(Lease {
                    handle,
                    exclusive: false,
                });
            }
        }

        debug!(url = %url, "reopened exclusive store connection");
        Ok(Lease {
            handle,
            exclusive: true,
        })
    }

    /// Runs `op` against a connection for `url`.
    ///
    /// If `op` fails with [`StoreError::ConnectionClosed`] the connection is
    /// reopened through [`reconnect`](Self::reconnect) and `op` runs exactly
    /// once more; a second failure is returned as-is. The lease is released
    /// before returning.
    pub async fn run<T, F, Fut>(&self, url: &str, op: F) -> Result<T, StoreError>
    where
        F: Fn(Arc<dyn Store>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let lease = self.acquire(url).await?;
        let (lease, result) = match op(lease.handle()).await {
            Err(StoreError::ConnectionClosed) => {
                let exclusive = lease.is_exclusive();
                self.release(lease).await;
                let lease = self.reconnect(url, exclusive).await?;
                let retried = op(lease.handle()).await;
                (lease, retried)
            }
            other => (lease, other),
        };
        self.release(lease).await;
        result
    }

    /// Closes the shared connection. Call once during process tear-down.
    pub async fn shutdown(&self) {
        if let Some(shared) = self.shared.write().await.take() {
            info!(url = %shared.url, "closing shared store connection");
            close_quietly(&shared.handle).await;
        }
    }
}

async fn close_quietly(handle: &Arc<dyn Store>) {
    if let Err(e) = handle.close().await {
        warn!(error = %e, "failed to close store connection");
    }
}
