//! Cache configuration: the registry contract and the two option schemas.
//!
//! Configuration lives in an external [`ConfigRegistry`] as loosely typed
//! JSON values under two keys:
//!
//! | Key                   | Schema                | Read                         |
//! |-----------------------|-----------------------|------------------------------|
//! | [`GLOBAL_CONFIG_KEY`] | [`GlobalCacheConfig`] | on every request             |
//! | [`ROUTE_CONFIG_KEY`]  | [`CacheConfig`]       | once, when a route is set up |
//!
//! Field names are camelCase:
//!
//! ```json
//! { "cache":       { "storeUrl": "redis://127.0.0.1:6379", "excludedPathPrefixes": ["/admin"] },
//!   "cache.route": { "duration": "1h30m", "cacheKey": "users:all" } }
//! ```
//!
//! The per-route `duration` has no default. A missing duration, or one with
//! no recognized unit, is rejected when the route is configured.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::duration::DurationSpec;

/// Registry key of the process-wide options.
pub const GLOBAL_CONFIG_KEY: &str = "cache";

/// Registry key of the per-route options.
pub const ROUTE_CONFIG_KEY: &str = "cache.route";

/// Errors raised while reading or validating cache configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration registered under `{key}`")]
    Missing { key: String },

    #[error("invalid configuration under `{key}`: {source}")]
    Invalid {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid store url `{url}`: {source}")]
    StoreUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("duration `{value}` contains no recognized time unit")]
    Duration { value: String },
}

/// A string-keyed source of configuration values.
pub trait ConfigRegistry: Send + Sync {
    /// Returns the raw value under `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;
}

/// Thread-safe in-process registry. Values may be replaced at any time.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    /// Removes the value under `key`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}

impl ConfigRegistry for MemoryRegistry {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

fn lookup<T>(registry: &dyn ConfigRegistry, key: &str) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned,
{
    let value = registry.get(key).ok_or_else(|| ConfigError::Missing {
        key: key.to_owned(),
    })?;
    decode(key, value)
}

/// Deserializes an option object. Derived struct impls also accept JSON
/// arrays positionally, so anything but an object is rejected up front.
fn decode<T>(key: &str, value: Value) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned,
{
    let invalid = |source| ConfigError::Invalid {
        key: key.to_owned(),
        source,
    };
    if !value.is_object() {
        return Err(invalid(serde::de::Error::custom(format_args!(
            "expected an object, found {value}"
        ))));
    }
    serde_json::from_value(value).map_err(invalid)
}

fn default_true() -> bool {
    true
}

/// Per-route cache options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Route-level switch.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Store key; the request URL is used when absent.
    #[serde(default)]
    pub cache_key: Option<String>,

    /// Time-to-live as a duration string, e.g. `"10m"`.
    pub duration: String,
}

impl CacheConfig {
    /// Builds an enabled route config keyed by request URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Duration`] if `duration` has no recognized unit.
    pub fn new(duration: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            enabled: true,
            cache_key: None,
            duration: duration.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Uses `key` instead of the request URL.
    #[must_use]
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Enables or disables caching for the route.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates a raw value against the per-route schema.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let config: Self = decode(ROUTE_CONFIG_KEY, value)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates [`ROUTE_CONFIG_KEY`] from `registry`.
    pub fn from_registry(registry: &dyn ConfigRegistry) -> Result<Self, ConfigError> {
        let config: Self = lookup(registry, ROUTE_CONFIG_KEY)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if DurationSpec::parse(&self.duration).is_empty() {
            return Err(ConfigError::Duration {
                value: self.duration.clone(),
            });
        }
        Ok(())
    }

    /// Time-to-live in whole seconds, parsed afresh from `duration`.
    pub fn ttl_secs(&self) -> u64 {
        DurationSpec::parse(&self.duration).total().as_secs()
    }
}

/// Process-wide cache options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCacheConfig {
    /// Address of the key-value store.
    pub store_url: String,

    /// Global switch.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests whose path starts with any of these bypass the cache.
    #[serde(default)]
    pub excluded_path_prefixes: Vec<String>,

    /// Emit per-request decision logs.
    #[serde(default)]
    pub debug: bool,

    /// Keep one long-lived connection for `store_url` instead of opening
    /// one per request.
    #[serde(default = "default_true")]
    pub shared_connection: bool,
}

impl GlobalCacheConfig {
    /// Validates a raw value against the global schema.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let config: Self = decode(GLOBAL_CONFIG_KEY, value)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates [`GLOBAL_CONFIG_KEY`] from `registry`.
    pub fn from_registry(registry: &dyn ConfigRegistry) -> Result<Self, ConfigError> {
        let config: Self = lookup(registry, GLOBAL_CONFIG_KEY)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.store_url).map_err(|source| ConfigError::StoreUrl {
            url: self.store_url.clone(),
            source,
        })?;
        Ok(())
    }

    /// Returns `true` if `path` falls under an excluded prefix.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}
