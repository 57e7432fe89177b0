//! Cache-aside response caching.
//!
//! [`CacheMiddleware`] sits in front of a handler. For every request it:
//!
//! 1. reads the global options from the registry (fresh each time) and
//!    passes straight through when caching is off, the options are invalid,
//!    or the path is excluded;
//! 2. installs a [`PendingWrite`] in the request context, *before* any store
//!    I/O, so the handler can always call [`JsonResponse::commit`];
//! 3. looks the key up. A hit is returned immediately with `X-Cache: HIT` and
//!    the handler never runs. A miss, or any store failure, runs the handler
//!    and tags its response `X-Cache: MISS`.
//!
//! Nothing is cached automatically: the handler decides by committing.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use rttp_cache::cache::CacheMiddleware;
//! use rttp_cache::config::{CacheConfig, MemoryRegistry};
//! use rttp_cache::connection::ConnectionManager;
//! use rttp_cache::middleware::{Next, from_middleware, handler_fn};
//! use rttp_cache::store::RedisConnector;
//! use rttp_cache::StatusCode;
//!
//! # fn build() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(MemoryRegistry::new());
//! let connections = Arc::new(ConnectionManager::new(Arc::new(RedisConnector::new())));
//! let cache = CacheMiddleware::new(CacheConfig::new("5m")?, registry, connections);
//!
//! let chain = vec![
//!     from_middleware(Arc::new(cache)),
//!     handler_fn(|ctx| async move {
//!         let mut res = match ctx.json_response(StatusCode::Ok, &json!({ "users": [] })) {
//!             Ok(res) => res,
//!             Err(_) => return rttp_cache::Response::new(StatusCode::InternalServerError),
//!         };
//!         res.commit().await;
//!         res.into_response()
//!     }),
//! ];
//! # let _ = Next::new(chain);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::{CacheConfig, ConfigError, ConfigRegistry, GlobalCacheConfig};
use crate::connection::ConnectionManager;
use crate::context::Context;
use crate::middleware::{BoxResponse, Middleware, Next};
use crate::{Response, StatusCode};

mod pending;
mod writer;

pub use pending::{CommitOutcome, JsonResponse, PendingWrite};
pub use writer::CacheWriter;

use writer::{cache_key, prepare_connection};

/// Response header carrying the cache status.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Cache status of a response served from the store.
pub const HIT: &str = "HIT";

/// Cache status of every other response.
pub const MISS: &str = "MISS";

/// Cache-aside middleware for one route.
pub struct CacheMiddleware {
    route: Arc<CacheConfig>,
    registry: Arc<dyn ConfigRegistry>,
    connections: Arc<ConnectionManager>,
}

impl CacheMiddleware {
    /// Creates the middleware for a route with already-validated options.
    pub fn new(
        route: CacheConfig,
        registry: Arc<dyn ConfigRegistry>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            route: Arc::new(route),
            registry,
            connections,
        }
    }

    /// Creates the middleware from the route options stored in `registry`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the route options are missing or invalid,
    /// including a missing or unit-less `duration`.
    pub fn from_registry(
        registry: Arc<dyn ConfigRegistry>,
        connections: Arc<ConnectionManager>,
    ) -> Result<Self, ConfigError> {
        let route = CacheConfig::from_registry(registry.as_ref())?;
        Ok(Self::new(route, registry, connections))
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponse {
        let route = Arc::clone(&self.route);
        let registry = Arc::clone(&self.registry);
        let connections = Arc::clone(&self.connections);

        Box::pin(async move { serve(&route, registry.as_ref(), connections, ctx, next).await })
    }
}

async fn serve(
    route: &CacheConfig,
    registry: &dyn ConfigRegistry,
    connections: Arc<ConnectionManager>,
    mut ctx: Context,
    next: Next,
) -> Response {
    let global = match GlobalCacheConfig::from_registry(registry) {
        Ok(global) => global,
        Err(e) => {
            error!(error = %e, "cache configuration unusable, passing through");
            return pass_through(ctx, next).await;
        }
    };

    let path = ctx.request().path();
    if !global.enabled || !route.enabled || global.is_excluded(path) {
        if global.debug {
            debug!(path = %path, "caching not applicable, passing through");
        }
        return pass_through(ctx, next).await;
    }

    let key = cache_key(route, ctx.request());
    let pending = PendingWrite::new(
        Arc::clone(&connections),
        global.store_url.as_str(),
        key.as_str(),
        route.duration.as_str(),
    );
    ctx.extensions_mut().insert(pending.clone());

    match lookup(&connections, &global, &key).await {
        Some(cached) => {
            if global.debug {
                debug!(key = %key, "cache hit");
            }
            pending.mark_hit();
            Response::json_text(StatusCode::Ok, cached).header(CACHE_STATUS_HEADER, HIT)
        }
        None => {
            if global.debug {
                debug!(key = %key, "cache miss");
            }
            pass_through(ctx, next).await
        }
    }
}

// Reads `key`, mapping every failure to a miss.
async fn lookup(
    connections: &ConnectionManager,
    global: &GlobalCacheConfig,
    key: &str,
) -> Option<String> {
    if !prepare_connection(connections, global).await {
        return None;
    }

    let cached = connections
        .run(&global.store_url, |store| async move { store.get(key).await })
        .await;

    match cached {
        Ok(Some(value)) => match serde_json::from_str::<serde_json::Value>(&value) {
            Ok(_) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "cached value is not valid JSON, ignoring");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            if global.debug {
                debug!(key = %key, error = %e, "cache lookup failed, treating as miss");
            }
            None
        }
    }
}

async fn pass_through(ctx: Context, next: Next) -> Response {
    let mut response = next.run(ctx).await;
    if !response.headers().contains(CACHE_STATUS_HEADER) {
        response.add_header(CACHE_STATUS_HEADER, MISS);
    }
    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::{GLOBAL_CONFIG_KEY, MemoryRegistry, ROUTE_CONFIG_KEY};
    use crate::middleware::{from_middleware, handler_fn};
    use crate::store::{Connector, MemoryConnector, StoreError};
    use crate::testing::{
        FlakyConnector, STORE_URL, capture_logs, get, global_config, init_tracing,
    };

    struct Harness {
        registry: Arc<MemoryRegistry>,
        connections: Arc<ConnectionManager>,
        calls: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(connector: Arc<dyn Connector>) -> Self {
            init_tracing();
            let registry = MemoryRegistry::new();
            registry.set(GLOBAL_CONFIG_KEY, global_config());
            Self {
                registry: Arc::new(registry),
                connections: Arc::new(ConnectionManager::new(connector)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        // Runs one request through cache → handler. The handler answers
        // `{"n": <call number>}` and commits `commits` times.
        async fn request(&self, route: &CacheConfig, path: &str, commits: usize) -> Response {
            let cache = CacheMiddleware::new(
                route.clone(),
                self.registry.clone(),
                Arc::clone(&self.connections),
            );
            let calls = Arc::clone(&self.calls);
            let handler = handler_fn(move |ctx: Context| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    let mut res = ctx.json_response(StatusCode::Ok, &json!({ "n": n })).unwrap();
                    for _ in 0..commits {
                        res.commit().await;
                    }
                    res.into_response()
                }
            });
            Next::new(vec![from_middleware(Arc::new(cache)), handler])
                .run(get(path))
                .await
        }
    }

    fn route(duration: &str) -> CacheConfig {
        CacheConfig::new(duration).unwrap()
    }

    fn status(response: &Response) -> Option<&str> {
        response.headers().get(CACHE_STATUS_HEADER)
    }

    #[tokio::test]
    async fn hit_short_circuits_handler() {
        let memory = MemoryConnector::new();
        memory.seed("/users", r#"{"cached":true}"#);
        let h = Harness::new(Arc::new(memory.clone()));

        let response = h.request(&route("1m"), "/users", 1).await;

        assert_eq!(h.calls(), 0);
        assert_eq!(status(&response), Some(HIT));
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body_str(), Some(r#"{"cached":true}"#));
        assert_eq!(memory.stats().sets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn miss_then_commit_fills_cache() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));

        let response = h.request(&route("2h"), "/users?page=1", 1).await;

        assert_eq!(h.calls(), 1);
        assert_eq!(status(&response), Some(MISS));
        assert_eq!(memory.peek("/users?page=1").as_deref(), Some(r#"{"n":1}"#));
        assert_eq!(memory.ttl("/users?page=1"), Some(Duration::from_secs(7_200)));

        let second = h.request(&route("2h"), "/users?page=1", 1).await;
        assert_eq!(h.calls(), 1);
        assert_eq!(status(&second), Some(HIT));
        assert_eq!(second.body_str(), Some(r#"{"n":1}"#));
    }

    #[tokio::test]
    async fn miss_without_commit_leaves_store_empty() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));

        let response = h.request(&route("1m"), "/users", 0).await;

        assert_eq!(h.calls(), 1);
        assert_eq!(status(&response), Some(MISS));
        assert_eq!(memory.peek("/users"), None);
        assert_eq!(memory.stats().sets, 0);
    }

    #[tokio::test]
    async fn double_commit_writes_once() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));

        h.request(&route("1m"), "/users", 2).await;

        assert_eq!(memory.stats().sets, 1);
        assert_eq!(memory.stats().expires, 1);
    }

    #[tokio::test]
    async fn repeat_commit_returns_first_outcome() {
        let memory = MemoryConnector::new();
        let connections = Arc::new(ConnectionManager::new(Arc::new(memory.clone())));
        let pending = PendingWrite::new(connections, STORE_URL, "k", "1m");

        assert_eq!(pending.outcome(), None);
        assert_eq!(pending.commit("1").await, CommitOutcome::Stored);
        assert_eq!(pending.commit("2").await, CommitOutcome::Stored);
        assert_eq!(pending.outcome(), Some(CommitOutcome::Stored));
        assert_eq!(memory.peek("k").as_deref(), Some("1"));
        assert_eq!(pending.key(), "k");
    }

    #[tokio::test]
    async fn custom_key_overrides_url() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));

        h.request(&route("1m").cache_key("all-users"), "/users?x=1", 1)
            .await;

        assert!(memory.peek("all-users").is_some());
        assert_eq!(memory.peek("/users?x=1"), None);
    }

    #[tokio::test]
    async fn excluded_path_never_touches_store() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));
        h.registry.set(
            GLOBAL_CONFIG_KEY,
            json!({ "storeUrl": STORE_URL, "excludedPathPrefixes": ["/admin"] }),
        );

        let response = h.request(&route("1m"), "/admin/stats", 1).await;

        assert_eq!(h.calls(), 1);
        assert_eq!(status(&response), Some(MISS));
        assert_eq!(memory.stats(), Default::default());
    }

    #[tokio::test]
    async fn disabled_caching_passes_through() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));

        h.request(&route("1m").enabled(false), "/users", 1).await;
        h.registry.set(
            GLOBAL_CONFIG_KEY,
            json!({ "storeUrl": STORE_URL, "enabled": false }),
        );
        h.request(&route("1m"), "/users", 1).await;

        assert_eq!(h.calls(), 2);
        assert_eq!(memory.stats(), Default::default());
    }

    #[tokio::test]
    async fn invalid_global_config_passes_through() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));
        h.registry.set(GLOBAL_CONFIG_KEY, json!({ "storeUrl": 42 }));

        let response = h.request(&route("1m"), "/users", 1).await;

        assert_eq!(h.calls(), 1);
        assert_eq!(status(&response), Some(MISS));
        assert_eq!(response.body_str(), Some(r#"{"n":1}"#));
        assert_eq!(memory.stats(), Default::default());
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let memory = MemoryConnector::new();
        memory.seed("/users", "{not json");
        let h = Harness::new(Arc::new(memory.clone()));

        let response = h.request(&route("1m"), "/users", 1).await;

        assert_eq!(h.calls(), 1);
        assert_eq!(status(&response), Some(MISS));
        assert_eq!(memory.peek("/users").as_deref(), Some(r#"{"n":1}"#));
    }

    #[tokio::test]
    async fn requests_reuse_shared_connection() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));

        h.request(&route("1m"), "/a", 1).await;
        h.request(&route("1m"), "/b", 1).await;

        assert_eq!(memory.stats().connects, 1);
        assert_eq!(memory.stats().closes, 0);
    }

    #[tokio::test]
    async fn store_url_change_replaces_shared_connection() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));

        h.request(&route("1m"), "/a", 0).await;
        h.registry.set(
            GLOBAL_CONFIG_KEY,
            json!({ "storeUrl": "redis://replica:6379" }),
        );
        h.request(&route("1m"), "/a", 0).await;

        assert_eq!(memory.stats().connects, 2);
        assert_eq!(memory.stats().closes, 1);
        assert_eq!(
            h.connections.shared_url().await.as_deref(),
            Some("redis://replica:6379")
        );
    }

    #[tokio::test]
    async fn unshared_mode_closes_each_connection() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));
        h.registry.set(
            GLOBAL_CONFIG_KEY,
            json!({ "storeUrl": STORE_URL, "sharedConnection": false }),
        );

        h.request(&route("1m"), "/a", 1).await;

        let stats = memory.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.closes, 2);
        assert_eq!(h.connections.shared_url().await, None);
    }

    #[tokio::test]
    async fn closed_connection_is_retried_once() {
        let flaky = FlakyConnector::new(1);
        flaky.memory().seed("/users", r#"[1,2,3]"#);
        let h = Harness::new(Arc::new(flaky.clone()));

        let response = h.request(&route("1m"), "/users", 1).await;

        assert_eq!(flaky.failures_injected(), 1);
        assert_eq!(h.calls(), 0);
        assert_eq!(status(&response), Some(HIT));
        assert_eq!(flaky.memory().stats().connects, 2);
    }

    #[tokio::test]
    async fn second_failure_degrades_to_pass_through() {
        let flaky = FlakyConnector::new(2);
        flaky.memory().seed("/users", r#"[1,2,3]"#);
        let h = Harness::new(Arc::new(flaky.clone()));

        let response = h.request(&route("1m"), "/users", 0).await;

        assert_eq!(flaky.failures_injected(), 2);
        assert_eq!(h.calls(), 1);
        assert_eq!(status(&response), Some(MISS));
    }

    #[tokio::test]
    async fn store_error_skips_reconnect() {
        let flaky = FlakyConnector::failing_with(1, StoreError::Backend("READONLY".into()));
        flaky.memory().seed("/users", r#"[1,2,3]"#);
        let h = Harness::new(Arc::new(flaky.clone()));

        let response = h.request(&route("1m"), "/users", 0).await;

        assert_eq!(flaky.failures_injected(), 1);
        assert_eq!(h.calls(), 1);
        assert_eq!(status(&response), Some(MISS));
        assert_eq!(response.body_str(), Some(r#"{"n":1}"#));
        assert_eq!(flaky.memory().stats().connects, 1);
    }

    #[tokio::test]
    async fn lookup_failure_is_logged_only_in_debug_mode() {
        let flaky = FlakyConnector::failing_with(2, StoreError::Backend("READONLY".into()));
        let h = Harness::new(Arc::new(flaky.clone()));
        let (_guard, logs) = capture_logs();

        h.registry.set(GLOBAL_CONFIG_KEY, json!({ "storeUrl": STORE_URL }));
        h.request(&route("1m"), "/users", 0).await;
        assert!(!logs.contents().contains("cache lookup failed"));

        h.registry.set(GLOBAL_CONFIG_KEY, global_config());
        h.request(&route("1m"), "/users", 0).await;
        assert!(logs.contents().contains("cache lookup failed"));
        assert_eq!(flaky.failures_injected(), 2);
    }

    #[tokio::test]
    async fn commit_after_failed_lookup_still_stores() {
        let flaky = FlakyConnector::new(2);
        let h = Harness::new(Arc::new(flaky.clone()));

        let response = h.request(&route("1m"), "/users", 1).await;

        assert_eq!(flaky.failures_injected(), 2);
        assert_eq!(h.calls(), 1);
        assert_eq!(status(&response), Some(MISS));
        assert_eq!(flaky.memory().peek("/users").as_deref(), Some(r#"{"n":1}"#));
        assert_eq!(flaky.memory().stats().sets, 1);
    }

    #[tokio::test]
    async fn array_shaped_global_config_passes_through() {
        let memory = MemoryConnector::new();
        let h = Harness::new(Arc::new(memory.clone()));
        h.registry.set(GLOBAL_CONFIG_KEY, json!([STORE_URL]));

        let response = h.request(&route("1m"), "/users", 1).await;

        assert_eq!(h.calls(), 1);
        assert_eq!(status(&response), Some(MISS));
        assert_eq!(memory.stats(), Default::default());
        assert_eq!(h.connections.shared_url().await, None);
    }

    #[tokio::test]
    async fn healed_shared_connection_serves_later_requests() {
        let flaky = FlakyConnector::new(1);
        let h = Harness::new(Arc::new(flaky.clone()));

        h.request(&route("1m"), "/a", 1).await;
        h.request(&route("1m"), "/a", 1).await;

        // initial shared + one reconnect, nothing per request
        assert_eq!(flaky.memory().stats().connects, 2);
        assert_eq!(flaky.memory().stats().closes, 0);
        assert_eq!(h.calls(), 1);
    }

    #[tokio::test]
    async fn from_registry_requires_duration() {
        let h = Harness::new(Arc::new(MemoryConnector::new()));
        let connections = Arc::clone(&h.connections);

        h.registry.set(ROUTE_CONFIG_KEY, json!({ "cacheKey": "k" }));
        assert!(CacheMiddleware::from_registry(h.registry.clone(), Arc::clone(&connections)).is_err());

        h.registry.set(ROUTE_CONFIG_KEY, json!({ "duration": "10m" }));
        assert!(CacheMiddleware::from_registry(h.registry.clone(), connections).is_ok());
    }
}
