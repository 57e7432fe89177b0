//! Per-request context: the request plus type-erased extensions.
//!
//! Middleware hands state to downstream handlers through [`Extensions`]. The
//! cache middleware installs a [`PendingWrite`] there, which
//! [`Context::json_response`] picks up so the handler can commit its body.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use serde::Serialize;

use crate::cache::{JsonResponse, PendingWrite};
use crate::{Request, StatusCode};

/// Type-erased request extensions map, keyed by type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }
}

/// Per-request context.
pub struct Context {
    request: Request,
    extensions: Extensions,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// The deferred cache write installed by the cache middleware, if any.
    pub fn pending_write(&self) -> Option<&PendingWrite> {
        self.extensions.get::<PendingWrite>()
    }

    /// Serializes `value` into a JSON response that can be committed to the
    /// cache with [`JsonResponse::commit`].
    ///
    /// When no cache middleware ran for this request the response is still
    /// produced; committing it is then a no-op.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error if `value` cannot be represented as JSON.
    pub fn json_response<T>(
        &self,
        status: StatusCode,
        value: &T,
    ) -> Result<JsonResponse, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        JsonResponse::new(status, value, self.pending_write().cloned())
    }
}
