//! Method registry for inbound requests

use crate::channel::RpcChannel;
use crate::error::MethodError;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Result of a method handler
pub type MethodResult = Result<Value, MethodError>;

/// Future type for async method handlers
pub type MethodFuture = Pin<Box<dyn Future<Output = MethodResult> + Send>>;

/// Method handler function type
///
/// Handlers receive the request params and the channel the request arrived
/// on, so they can identify the calling session or call back into the
/// device.
pub type MethodHandler = Arc<dyn Fn(Value, Arc<RpcChannel>) -> MethodFuture + Send + Sync>;

/// Wrap an async closure as a [`MethodHandler`]
pub fn handler<F, Fut>(f: F) -> MethodHandler
where
    F: Fn(Value, Arc<RpcChannel>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    Arc::new(move |params, channel| Box::pin(f(params, channel)) as MethodFuture)
}

/// Name → handler table owned by one channel
///
/// Registration is last-write-wins and may happen at any time, including
/// while requests are being dispatched.
pub struct MethodRegistry {
    methods: DashMap<String, MethodHandler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            methods: DashMap::new(),
        }
    }

    /// Register a method, replacing any handler with the same name
    #[instrument(skip(self, name, handler))]
    pub fn register(&self, name: impl Into<String>, handler: MethodHandler) {
        let name = name.into();
        debug!(method = %name, "Registering method");
        self.methods.insert(name, handler);
    }

    /// Remove a method, returning whether it was registered
    #[instrument(skip(self))]
    pub fn unregister(&self, name: &str) -> bool {
        debug!(method = %name, "Unregistering method");
        self.methods.remove(name).is_some()
    }

    /// Look up a handler
    pub fn get(&self, name: &str) -> Option<MethodHandler> {
        self.methods.get(name).map(|h| h.clone())
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A pre-declared set of methods installed on every channel
///
/// The gateway builds one of these at startup and the coordinator copies it
/// into each new channel's registry.
#[derive(Clone, Default)]
pub struct MethodSet {
    methods: Vec<(String, MethodHandler)>,
}

impl MethodSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method; a later entry with the same name wins
    pub fn add(&mut self, name: impl Into<String>, handler: MethodHandler) -> &mut Self {
        let name = name.into();
        self.methods.retain(|(existing, _)| *existing != name);
        self.methods.push((name, handler));
        self
    }

    /// Builder form of [`MethodSet::add`]
    pub fn with(mut self, name: impl Into<String>, handler: MethodHandler) -> Self {
        self.add(name, handler);
        self
    }

    /// Copy every method into `registry`
    pub fn install(&self, registry: &MethodRegistry) {
        for (name, handler) in &self.methods {
            registry.register(name.clone(), handler.clone());
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.methods.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for MethodSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodSet")
            .field("methods", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: Value) -> MethodHandler {
        handler(move |_params, _channel| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    #[test]
    fn test_register_last_write_wins() {
        let registry = MethodRegistry::new();
        registry.register("a", constant(json!(1)));
        registry.register("a", constant(json!(2)));
        registry.register("b", constant(json!(3)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.method_names(), vec!["a", "b"]);

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(!registry.has_method("a"));
        assert!(registry.get("b").is_some());
    }

    #[test]
    fn test_method_set_install() {
        let set = MethodSet::new()
            .with("get_config", constant(json!({})))
            .with("get_states", constant(json!({})))
            .with("get_config", constant(json!(null)));
        assert_eq!(set.names(), vec!["get_states", "get_config"]);

        let registry = MethodRegistry::new();
        set.install(&registry);
        assert!(registry.has_method("get_config"));
        assert!(registry.has_method("get_states"));
        assert_eq!(registry.len(), 2);
    }
}
