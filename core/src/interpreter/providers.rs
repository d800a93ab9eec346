//! Storage providers
//!
//! A provider is a named backend reachable through the addressing scheme
//! (`session:user`, `map_cache:key`, `log:message`, ...). Reads report
//! absence as `Ok(None)`; errors are for backends that cannot serve the
//! request at all.

use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

use super::context::RequestContext;
use super::errors::ProviderError;
use super::properties::Properties;
use super::values::to_text;

/// What a provider gets to see of the running request.
pub struct ProviderContext<'a> {
    pub request: &'a RequestContext,
    pub properties: &'a Properties,
}

pub trait StorageProvider: Send + Sync {
    /// Whether `name.path` addresses are split for this provider.
    fn path_supported(&self) -> bool {
        true
    }

    fn read(
        &self,
        ctx: &ProviderContext<'_>,
        sub_level: &str,
        key: &str,
    ) -> Result<Option<JsonValue>, ProviderError>;

    fn save(
        &self,
        ctx: &ProviderContext<'_>,
        sub_level: &str,
        key: &str,
        value: JsonValue,
    ) -> Result<(), ProviderError>;

    fn delete(&self, ctx: &ProviderContext<'_>, sub_level: &str, key: &str) -> Result<(), ProviderError>;
}

/// Provider set keyed by lowercase keyword.
#[derive(Clone, Default)]
pub struct Providers {
    entries: HashMap<String, Arc<dyn StorageProvider>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The six built-in providers.
    pub fn standard() -> Self {
        let mut providers = Self::new();
        providers.register("session", SessionProvider);
        providers.register("map", MapProvider::default());
        providers.register("global", GlobalProvider);
        providers.register("request", RequestProvider);
        providers.register("log", LogProvider);
        providers.register("error", ErrorProvider);
        providers
    }

    /// Add or replace a provider.
    pub fn register(&mut self, name: &str, provider: impl StorageProvider + 'static) {
        self.entries.insert(name.to_lowercase(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageProvider>> {
        self.entries.get(name).cloned()
    }

    /// `Some(path support)` for a known provider, `None` otherwise.
    pub fn path_supported(&self, name: &str) -> Option<bool> {
        self.entries.get(name).map(|p| p.path_supported())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/* ===================== Built-in providers ===================== */

/// Values stored on the request's session.
pub struct SessionProvider;

impl StorageProvider for SessionProvider {
    fn read(
        &self,
        ctx: &ProviderContext<'_>,
        _sub_level: &str,
        key: &str,
    ) -> Result<Option<JsonValue>, ProviderError> {
        let session = ctx
            .request
            .session()
            .ok_or_else(|| ProviderError::NoSession(key.to_string()))?;
        Ok(session.get(key))
    }

    fn save(
        &self,
        ctx: &ProviderContext<'_>,
        _sub_level: &str,
        key: &str,
        value: JsonValue,
    ) -> Result<(), ProviderError> {
        let session = ctx
            .request
            .session()
            .ok_or_else(|| ProviderError::NoSession(key.to_string()))?;
        session.set(key, value);
        Ok(())
    }

    fn delete(&self, ctx: &ProviderContext<'_>, _sub_level: &str, key: &str) -> Result<(), ProviderError> {
        let session = ctx
            .request
            .session()
            .ok_or_else(|| ProviderError::NoSession(key.to_string()))?;
        session.remove(key);
        Ok(())
    }
}

/// Process-wide cache, bucketed by sub-level.
#[derive(Default)]
pub struct MapProvider {
    buckets: DashMap<String, DashMap<String, JsonValue>>,
}

impl StorageProvider for MapProvider {
    fn read(
        &self,
        _ctx: &ProviderContext<'_>,
        sub_level: &str,
        key: &str,
    ) -> Result<Option<JsonValue>, ProviderError> {
        Ok(self
            .buckets
            .get(sub_level)
            .and_then(|bucket| bucket.get(key).map(|v| v.value().clone())))
    }

    fn save(
        &self,
        _ctx: &ProviderContext<'_>,
        sub_level: &str,
        key: &str,
        value: JsonValue,
    ) -> Result<(), ProviderError> {
        self.buckets
            .entry(sub_level.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, _ctx: &ProviderContext<'_>, sub_level: &str, key: &str) -> Result<(), ProviderError> {
        if let Some(bucket) = self.buckets.get(sub_level) {
            bucket.remove(key);
        }
        Ok(())
    }
}

/// The process-wide properties store.
pub struct GlobalProvider;

impl StorageProvider for GlobalProvider {
    fn read(
        &self,
        ctx: &ProviderContext<'_>,
        _sub_level: &str,
        key: &str,
    ) -> Result<Option<JsonValue>, ProviderError> {
        Ok(ctx.properties.get(key))
    }

    fn save(
        &self,
        ctx: &ProviderContext<'_>,
        _sub_level: &str,
        key: &str,
        value: JsonValue,
    ) -> Result<(), ProviderError> {
        ctx.properties.set(key, value);
        Ok(())
    }

    fn delete(&self, ctx: &ProviderContext<'_>, _sub_level: &str, key: &str) -> Result<(), ProviderError> {
        ctx.properties.remove(key);
        Ok(())
    }
}

/// The request-global scope, regardless of call depth.
pub struct RequestProvider;

impl StorageProvider for RequestProvider {
    fn read(
        &self,
        ctx: &ProviderContext<'_>,
        _sub_level: &str,
        key: &str,
    ) -> Result<Option<JsonValue>, ProviderError> {
        let request = ctx.request;
        Ok(request.scopes().get_local(request.root(), key))
    }

    fn save(
        &self,
        ctx: &ProviderContext<'_>,
        _sub_level: &str,
        key: &str,
        value: JsonValue,
    ) -> Result<(), ProviderError> {
        let request = ctx.request;
        request.scopes().set(request.root(), key, value);
        Ok(())
    }

    fn delete(&self, ctx: &ProviderContext<'_>, _sub_level: &str, key: &str) -> Result<(), ProviderError> {
        let request = ctx.request;
        request.scopes().remove(request.root(), key);
        Ok(())
    }
}

/// Write-only sink into the log.
pub struct LogProvider;

impl StorageProvider for LogProvider {
    fn path_supported(&self) -> bool {
        false
    }

    fn read(&self, _: &ProviderContext<'_>, _: &str, _: &str) -> Result<Option<JsonValue>, ProviderError> {
        Ok(None)
    }

    fn save(
        &self,
        ctx: &ProviderContext<'_>,
        sub_level: &str,
        key: &str,
        value: JsonValue,
    ) -> Result<(), ProviderError> {
        tracing::info!(
            request = %ctx.request.id(),
            category = sub_level,
            key,
            value = %to_text(&value),
            "Action log"
        );
        Ok(())
    }

    fn delete(&self, _: &ProviderContext<'_>, _: &str, _: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Write-only sink that logs and records an error on the request.
pub struct ErrorProvider;

impl StorageProvider for ErrorProvider {
    fn path_supported(&self) -> bool {
        false
    }

    fn read(&self, _: &ProviderContext<'_>, _: &str, _: &str) -> Result<Option<JsonValue>, ProviderError> {
        Ok(None)
    }

    fn save(
        &self,
        ctx: &ProviderContext<'_>,
        sub_level: &str,
        key: &str,
        value: JsonValue,
    ) -> Result<(), ProviderError> {
        let message = to_text(&value);
        tracing::error!(
            request = %ctx.request.id(),
            category = sub_level,
            key,
            "{}",
            message
        );
        ctx.request.record_error(message);
        Ok(())
    }

    fn delete(&self, _: &ProviderContext<'_>, _: &str, _: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}
