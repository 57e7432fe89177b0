//! In-process store backend.
//!
//! Every handle opened by one [`MemoryConnector`] talks to the same table,
//! the way every Redis connection to one server sees the same keyspace.
//! Useful for single-process deployments and for exercising the cache layer
//! without a server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Connector, Store, StoreError};

/// Counters of every call that reached the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connects: u64,
    pub closes: u64,
    pub gets: u64,
    pub sets: u64,
    pub expires: u64,
}

impl MemoryStats {
    /// Total key-value operations (get, set, expire).
    pub fn operations(&self) -> u64 {
        self.gets + self.sets + self.expires
    }
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct Counters {
    connects: AtomicU64,
    closes: AtomicU64,
    gets: AtomicU64,
    sets: AtomicU64,
    expires: AtomicU64,
}

#[derive(Default)]
struct Shared {
    entries: Mutex<HashMap<String, Entry>>,
    counters: Counters,
}

impl Shared {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Opens [`MemoryStore`] handles onto one shared table. Clones share the table.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MemoryStats {
        let c = &self.shared.counters;
        MemoryStats {
            connects: c.connects.load(Ordering::Relaxed),
            closes: c.closes.load(Ordering::Relaxed),
            gets: c.gets.load(Ordering::Relaxed),
            sets: c.sets.load(Ordering::Relaxed),
            expires: c.expires.load(Ordering::Relaxed),
        }
    }

    /// Reads `key` directly, bypassing handles and counters.
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.shared
            .entries()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }

    /// Writes `key` directly, bypassing handles and counters.
    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        self.shared.entries().insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    /// Remaining time-to-live of `key`; `None` if absent or without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.shared
            .entries()
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn Store>, StoreError> {
        if url.trim().is_empty() {
            return Err(StoreError::InvalidUrl {
                url: url.to_owned(),
                reason: "empty url".to_owned(),
            });
        }
        self.shared.counters.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryStore {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One handle onto a [`MemoryConnector`]'s table.
pub struct MemoryStore {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemoryStore {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_open()?;
        self.shared.counters.gets.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut entries = self.shared.entries();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_open()?;
        self.shared.counters.sets.fetch_add(1, Ordering::Relaxed);
        self.shared.entries().insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        self.check_open()?;
        self.shared.counters.expires.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.shared.entries();
        // Like Redis, a non-positive TTL deletes the key.
        if seconds == 0 {
            entries.remove(key);
        } else if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Instant::now().checked_add(Duration::from_secs(seconds));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::ConnectionClosed);
        }
        self.shared.counters.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
