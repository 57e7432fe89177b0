//! Shared fixtures for unit tests.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::Context;
use crate::http::{Method, Request};
use crate::store::{Connector, MemoryConnector, Store, StoreError};

pub(crate) const STORE_URL: &str = "redis://127.0.0.1:6379";

/// Installs a test subscriber once; honours `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Log lines captured by [`capture_logs`].
#[derive(Clone, Default)]
pub(crate) struct Logs(Arc<Mutex<Vec<u8>>>);

impl Logs {
    pub(crate) fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl io::Write for Logs {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routes every event on the current thread, down to `DEBUG`, into the
/// returned buffer until the guard drops.
pub(crate) fn capture_logs() -> (tracing::subscriber::DefaultGuard, Logs) {
    let logs = Logs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (tracing::subscriber::set_default(subscriber), logs)
}

pub(crate) fn global_config() -> Value {
    json!({ "storeUrl": STORE_URL, "debug": true })
}

pub(crate) fn get(target: &str) -> Context {
    Context::new(Request::new(Method::Get, target))
}

/// Memory-backed connector whose first `n` key-value operations, across all
/// handles, fail with [`StoreError::ConnectionClosed`] or a chosen error.
#[derive(Clone)]
pub(crate) struct FlakyConnector {
    memory: MemoryConnector,
    error: StoreError,
    remaining: Arc<AtomicU64>,
    injected: Arc<AtomicU64>,
}

impl FlakyConnector {
    pub(crate) fn new(failures: u64) -> Self {
        Self::failing_with(failures, StoreError::ConnectionClosed)
    }

    /// Like [`new`](Self::new) but injects `error` instead.
    pub(crate) fn failing_with(failures: u64, error: StoreError) -> Self {
        Self {
            memory: MemoryConnector::new(),
            error,
            remaining: Arc::new(AtomicU64::new(failures)),
            injected: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn memory(&self) -> &MemoryConnector {
        &self.memory
    }

    pub(crate) fn failures_injected(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }
}

impl Connector for FlakyConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn Store>, StoreError> {
        Ok(Arc::new(FlakyStore {
            inner: self.memory.connect(url)?,
            error: self.error.clone(),
            remaining: Arc::clone(&self.remaining),
            injected: Arc::clone(&self.injected),
        }))
    }
}

struct FlakyStore {
    inner: Arc<dyn Store>,
    error: StoreError,
    remaining: Arc<AtomicU64>,
    injected: Arc<AtomicU64>,
}

impl FlakyStore {
    fn trip(&self) -> Result<(), StoreError> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.trip()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.trip()?;
        self.inner.set(key, value).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        self.trip()?;
        self.inner.expire(key, seconds).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}
