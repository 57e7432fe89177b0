//! Deferred cache writes.
//!
//! The middleware installs a [`PendingWrite`] before it looks anything up.
//! Handlers reach it through [`Context::json_response`](crate::context::Context::json_response),
//! which wraps the serialized body in a [`JsonResponse`]. Nothing is written
//! until [`JsonResponse::commit`] is awaited, and at most one write ever
//! happens per request.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;

use super::writer::write_entry;
use super::{CACHE_STATUS_HEADER, MISS};
use crate::connection::ConnectionManager;
use crate::{Response, StatusCode};

/// Result of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitOutcome {
    /// The body was written and its expiry set.
    Stored,
    /// The write was attempted and failed; the response is unaffected.
    Failed,
    /// No caching applies to this request.
    Disabled,
    /// The request was served from the cache; there is nothing to write.
    Hit,
}

struct Inner {
    connections: Arc<ConnectionManager>,
    store_url: String,
    key: String,
    duration: String,
    outcome: OnceCell<CommitOutcome>,
}

/// A cache write for one request that only happens on demand.
///
/// Clones share state: committing through any clone commits them all.
#[derive(Clone)]
pub struct PendingWrite {
    inner: Arc<Inner>,
}

impl PendingWrite {
    pub(crate) fn new(
        connections: Arc<ConnectionManager>,
        store_url: impl Into<String>,
        key: impl Into<String>,
        duration: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections,
                store_url: store_url.into(),
                key: key.into(),
                duration: duration.into(),
                outcome: OnceCell::new(),
            }),
        }
    }

    /// The store key this write targets.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The outcome of the first commit, if one has happened.
    pub fn outcome(&self) -> Option<CommitOutcome> {
        self.inner.outcome.get().copied()
    }

    /// Writes `body` under the key with the route's time-to-live.
    ///
    /// Only the first call touches the store; later calls, including
    /// concurrent ones, return the first call's outcome.
    pub async fn commit(&self, body: &str) -> CommitOutcome {
        let inner = &self.inner;
        *inner
            .outcome
            .get_or_init(|| {
                write_entry(
                    &inner.connections,
                    &inner.store_url,
                    &inner.key,
                    body,
                    &inner.duration,
                )
            })
            .await
    }

    // A hit has nothing left to write.
    pub(crate) fn mark_hit(&self) {
        let _ = self.inner.outcome.set(CommitOutcome::Hit);
    }
}

/// A JSON response whose body can be committed to the cache.
pub struct JsonResponse {
    response: Response,
    pending: Option<PendingWrite>,
}

impl JsonResponse {
    /// Serializes `value` into a JSON response tied to `pending`.
    pub fn new<T>(
        status: StatusCode,
        value: &T,
        pending: Option<PendingWrite>,
    ) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self {
            response: Response::json(status, value)?,
            pending,
        })
    }

    /// The response as it stands.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Writes the body to the cache, once.
    ///
    /// A successful write tags the response as a filled miss.
    pub async fn commit(&mut self) -> CommitOutcome {
        let Some(pending) = &self.pending else {
            return CommitOutcome::Disabled;
        };
        let body = self.response.body_str().unwrap_or_default();
        let outcome = pending.commit(body).await;
        if outcome == CommitOutcome::Stored {
            self.response.set_header(CACHE_STATUS_HEADER, MISS);
        }
        outcome
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}

impl From<JsonResponse> for Response {
    fn from(json: JsonResponse) -> Self {
        json.into_response()
    }
}
