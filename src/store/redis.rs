//! Redis backend.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Connector, Store, StoreError};

/// Opens [`RedisStore`] handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for RedisConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn Store>, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(RedisStore::new(client)))
    }
}

// Connection slot of a handle. `Closed` is terminal.
enum Slot {
    Idle,
    Open(MultiplexedConnection),
    Closed,
}

/// A single Redis connection, established on first use.
pub struct RedisStore {
    client: redis::Client,
    slot: Mutex<Slot>,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            slot: Mutex::new(Slot::Idle),
        }
    }

    // Returns a clone of the live connection, dialing it if needed.
    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut slot = self.slot.lock().await;
        match &*slot {
            Slot::Open(conn) => Ok(conn.clone()),
            Slot::Closed => Err(StoreError::ConnectionClosed),
            Slot::Idle => {
                let conn = self
                    .client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(classify)?;
                debug!("redis connection established");
                *slot = Slot::Open(conn.clone());
                Ok(conn)
            }
        }
    }
}

/// Maps a Redis error onto the store taxonomy. Dropped connections and
/// socket-level failures are the reconnectable class.
fn classify(err: redis::RedisError) -> StoreError {
    if err.is_connection_dropped() || err.is_io_error() {
        StoreError::ConnectionClosed
    } else {
        StoreError::Backend(err.to_string())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key).await.map_err(classify)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(key, value).await.map_err(classify)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        conn.expire::<_, ()>(key, seconds).await.map_err(classify)
    }

    async fn close(&self) -> Result<(), StoreError> {
        // Dropping the multiplexed connection tears down its driver task.
        *self.slot.lock().await = Slot::Closed;
        Ok(())
    }
}
