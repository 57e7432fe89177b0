//! # rttp-cache
//!
//! Cache-aside response caching for rttp handlers, backed by Redis.
//!
//! A [`CacheMiddleware`](cache::CacheMiddleware) in front of a handler serves
//! stored responses on a hit and, on a miss, lets the handler decide whether
//! to cache what it returns by committing it. Time-to-live values are written
//! as duration strings such as `"1h30m"` (see [`duration`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use rttp_cache::cache::CacheMiddleware;
//! use rttp_cache::config::{GLOBAL_CONFIG_KEY, MemoryRegistry, ROUTE_CONFIG_KEY};
//! use rttp_cache::connection::ConnectionManager;
//! use rttp_cache::context::Context;
//! use rttp_cache::http::Request;
//! use rttp_cache::middleware::{Next, from_middleware, handler_fn};
//! use rttp_cache::store::RedisConnector;
//! use rttp_cache::{Response, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(MemoryRegistry::new());
//!     registry.set(GLOBAL_CONFIG_KEY, json!({ "storeUrl": "redis://127.0.0.1:6379" }));
//!     registry.set(ROUTE_CONFIG_KEY, json!({ "duration": "10m" }));
//!
//!     let connections = Arc::new(ConnectionManager::new(Arc::new(RedisConnector::new())));
//!     connections.ensure_shared("redis://127.0.0.1:6379").await?;
//!
//!     let cache = CacheMiddleware::from_registry(registry, Arc::clone(&connections))?;
//!     let next = Next::new(vec![
//!         from_middleware(Arc::new(cache)),
//!         handler_fn(|ctx: Context| async move {
//!             match ctx.json_response(StatusCode::Ok, &json!({ "hello": "world" })) {
//!                 Ok(mut res) => {
//!                     res.commit().await;
//!                     res.into_response()
//!                 }
//!                 Err(_) => Response::new(StatusCode::InternalServerError),
//!             }
//!         }),
//!     ]);
//!
//!     let (request, _) = Request::parse(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
//!     let response = next.run(Context::new(request)).await;
//!     println!("{:?}", response.headers().get("X-Cache"));
//!
//!     connections.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod context;
pub mod duration;
pub mod http;
pub mod middleware;
pub mod store;

#[cfg(test)]
mod testing;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheMiddleware, CacheWriter, CommitOutcome, JsonResponse};
pub use http::{Headers, Method, Request, Response, StatusCode};
