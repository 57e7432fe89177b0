//! Store writes, shared by deferred commits and [`CacheWriter`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use super::pending::CommitOutcome;
use crate::Request;
use crate::config::{CacheConfig, ConfigRegistry, GlobalCacheConfig};
use crate::connection::ConnectionManager;
use crate::duration;

/// Store key for `request` under `route`: the custom key if set, the
/// request URL otherwise.
pub(crate) fn cache_key(route: &CacheConfig, request: &Request) -> String {
    route.cache_key.clone().unwrap_or_else(|| request.url())
}

/// Makes the shared connection follow the configured URL when sharing is on.
/// Returns `false` if the store cannot be reached at all.
pub(crate) async fn prepare_connection(
    connections: &ConnectionManager,
    global: &GlobalCacheConfig,
) -> bool {
    if !global.shared_connection {
        return true;
    }
    match connections.ensure_shared(&global.store_url).await {
        Ok(()) => true,
        Err(e) => {
            error!(url = %global.store_url, error = %e, "cannot open store connection");
            false
        }
    }
}

/// Writes `body` under `key`, then sets its expiry from the duration string `ttl_source`.
///
/// The pair runs as one unit: a closed connection reopens once and the
/// whole sequence is replayed.
pub(crate) async fn write_entry(
    connections: &ConnectionManager,
    store_url: &str,
    key: &str,
    body: &str,
    ttl_source: &str,
) -> CommitOutcome {
    let ttl = duration::parse(ttl_source).as_secs();
    if ttl == 0 {
        warn!(key = %key, duration = %ttl_source, "duration is under one second, not caching");
        return CommitOutcome::Failed;
    }

    let result = connections
        .run(store_url, |store| async move {
            store.set(key, body).await?;
            store.expire(key, ttl).await
        })
        .await;

    match result {
        Ok(()) => {
            debug!(key = %key, ttl, "cached response");
            CommitOutcome::Stored
        }
        Err(e) => {
            error!(key = %key, error = %e, "failed to write cache entry");
            CommitOutcome::Failed
        }
    }
}

/// Writes cache entries outside the middleware flow.
///
/// Application code that builds a response on its own (a background
/// refresh, a handler behind a different router) can still populate the
/// cache. Global configuration is read afresh on every write and, as with
/// the middleware, any problem turns the write into a no-op.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::cache::CacheWriter;
/// use rttp_cache::config::{CacheConfig, MemoryRegistry};
/// use rttp_cache::connection::ConnectionManager;
/// use rttp_cache::http::{Method, Request};
/// use rttp_cache::store::RedisConnector;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let connections = Arc::new(ConnectionManager::new(Arc::new(RedisConnector::new())));
/// let writer = CacheWriter::new(Arc::new(MemoryRegistry::new()), connections);
///
/// let route = CacheConfig::new("10m")?;
/// let request = Request::new(Method::Get, "/reports/daily");
/// writer.write(&request, &route, &vec!["a", "b"]).await;
/// # Ok(())
/// # }
/// ```
pub struct CacheWriter {
    registry: Arc<dyn ConfigRegistry>,
    connections: Arc<ConnectionManager>,
}

impl CacheWriter {
    pub fn new(registry: Arc<dyn ConfigRegistry>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            registry,
            connections,
        }
    }

    /// Caches `body` for `request` under `route`.
    ///
    /// Returns [`CommitOutcome::Disabled`] without touching the store when
    /// the global configuration is missing or invalid, or caching is
    /// switched off globally or for the route.
    pub async fn write<T>(&self, request: &Request, route: &CacheConfig, body: &T) -> CommitOutcome
    where
        T: Serialize + ?Sized,
    {
        let global = match GlobalCacheConfig::from_registry(self.registry.as_ref()) {
            Ok(global) => global,
            Err(e) => {
                error!(error = %e, "cache configuration unusable, skipping write");
                return CommitOutcome::Disabled;
            }
        };
        if !global.enabled || !route.enabled {
            return CommitOutcome::Disabled;
        }

        let body = match serde_json::to_string(body) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "cannot serialize cache entry");
                return CommitOutcome::Failed;
            }
        };

        if !prepare_connection(&self.connections, &global).await {
            return CommitOutcome::Failed;
        }
        let key = cache_key(route, request);
        write_entry(
            &self.connections,
            &global.store_url,
            &key,
            &body,
            &route.duration,
        )
        .await
    }
}
