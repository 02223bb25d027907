//! Plugin registration, route namespacing, and lifecycle hooks.
//!
//! Plugins extend the issuer without joining the authentication flow:
//! routes mount under `/plugin/<id>`, hooks observe startup, authorize,
//! success and error events. Hooks-only plugins (no routes) are legal.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::MethodRouter;
use axum::Router;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{error, warn};

use tollgate_storage::Storage;

/// Context handed to every hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Id of the plugin being invoked
    pub plugin_id: String,
    /// Invocation time
    pub now: DateTime<Utc>,
    /// The issuer's storage adapter
    pub storage: Arc<dyn Storage>,
    /// Request method, when the hook fires inside a request
    pub method: Option<String>,
    /// Request path, when the hook fires inside a request
    pub path: Option<String>,
}

/// A route contributed by a plugin, mounted at `/plugin/<id><path>`.
pub struct PluginRoute {
    /// Path within the plugin's namespace; must start with `/`
    pub path: String,
    /// Handler(s) for that path
    pub handler: MethodRouter,
}

impl PluginRoute {
    #[allow(missing_docs)]
    pub fn new(path: impl Into<String>, handler: MethodRouter) -> Self {
        Self {
            path: path.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for PluginRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRoute").field("path", &self.path).finish_non_exhaustive()
    }
}

/// An in-process issuer extension.
///
/// All hooks default to no-ops; implement only what the plugin needs.
/// Hook failures are `String` messages - plugins are not part of the
/// protocol surface, so their errors never map to OAuth codes directly.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Unique plugin id; becomes the route namespace segment.
    fn id(&self) -> &str;

    /// Routes to mount under `/plugin/<id>`. Called once at build time.
    fn routes(&self) -> Vec<PluginRoute> {
        Vec::new()
    }

    /// Runs sequentially at issuer startup; an error fails the build.
    async fn on_init(&self, _ctx: &HookContext) -> Result<(), String> {
        Ok(())
    }

    /// Runs sequentially before `/authorize` processing; an error surfaces
    /// as a 500.
    async fn on_authorize(&self, _ctx: &HookContext) -> Result<(), String> {
        Ok(())
    }

    /// Runs in parallel after a provider completes; failures are logged.
    async fn on_success(&self, _ctx: &HookContext) -> Result<(), String> {
        Ok(())
    }

    /// Runs sequentially when the error funnel fires; failures are logged.
    async fn on_error(&self, _ctx: &HookContext) -> Result<(), String> {
        Ok(())
    }
}

/// Errors raised while assembling the plugin registry.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Two plugins registered under one id
    #[error("duplicate plugin id: {0}")]
    DuplicateId(String),

    /// Two routes resolve to the same full path
    #[error("duplicate plugin route: {0}")]
    DuplicateRoute(String),

    /// A plugin's `on_init` hook failed
    #[error("plugin {id} failed to initialize: {message}")]
    Init {
        #[allow(missing_docs)]
        id: String,
        #[allow(missing_docs)]
        message: String,
    },
}

/// Ordered plugin registry.
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("ids", &self.plugins.iter().map(|p| p.id().to_string()).collect::<Vec<_>>())
            .finish()
    }
}

impl PluginManager {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, rejecting duplicate ids.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        if self.plugins.iter().any(|p| p.id() == plugin.id()) {
            return Err(PluginError::DuplicateId(plugin.id().to_string()));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// True when no plugins are registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Assemble the `/plugin/<id>/...` router, rejecting duplicate full
    /// paths across the whole registry.
    pub fn build_router(&self) -> Result<Router, PluginError> {
        let mut seen = HashSet::new();
        let mut router = Router::new();
        for plugin in &self.plugins {
            for route in plugin.routes() {
                let full = format!("/{}{}", plugin.id(), route.path);
                if !seen.insert(full.clone()) {
                    return Err(PluginError::DuplicateRoute(full));
                }
                router = router.route(&full, route.handler);
            }
        }
        Ok(router)
    }

    fn ctx(&self, plugin_id: &str, storage: &Arc<dyn Storage>) -> HookContext {
        HookContext {
            plugin_id: plugin_id.to_string(),
            now: Utc::now(),
            storage: storage.clone(),
            method: None,
            path: None,
        }
    }

    fn request_ctx(
        &self,
        plugin_id: &str,
        storage: &Arc<dyn Storage>,
        method: &str,
        path: &str,
    ) -> HookContext {
        HookContext {
            method: Some(method.to_string()),
            path: Some(path.to_string()),
            ..self.ctx(plugin_id, storage)
        }
    }

    /// Run every `on_init` hook in registration order, failing fast.
    pub async fn run_init(&self, storage: &Arc<dyn Storage>) -> Result<(), PluginError> {
        for plugin in &self.plugins {
            let ctx = self.ctx(plugin.id(), storage);
            plugin.on_init(&ctx).await.map_err(|message| PluginError::Init {
                id: plugin.id().to_string(),
                message,
            })?;
        }
        Ok(())
    }

    /// Run every `on_authorize` hook sequentially; the first failure wins.
    pub async fn run_authorize(
        &self,
        storage: &Arc<dyn Storage>,
        method: &str,
        path: &str,
    ) -> Result<(), String> {
        for plugin in &self.plugins {
            let ctx = self.request_ctx(plugin.id(), storage, method, path);
            plugin
                .on_authorize(&ctx)
                .await
                .map_err(|e| format!("plugin {}: {e}", plugin.id()))?;
        }
        Ok(())
    }

    /// Fan every `on_success` hook out in parallel, logging failures.
    pub async fn run_success(&self, storage: &Arc<dyn Storage>, method: &str, path: &str) {
        let futures = self.plugins.iter().map(|plugin| {
            let ctx = self.request_ctx(plugin.id(), storage, method, path);
            async move {
                if let Err(e) = plugin.on_success(&ctx).await {
                    warn!(plugin = plugin.id(), error = %e, "on_success hook failed");
                }
            }
        });
        join_all(futures).await;
    }

    /// Run every `on_error` hook sequentially, logging failures.
    pub async fn run_error(&self, storage: &Arc<dyn Storage>, method: &str, path: &str) {
        for plugin in &self.plugins {
            let ctx = self.request_ctx(plugin.id(), storage, method, path);
            if let Err(e) = plugin.on_error(&ctx).await {
                error!(plugin = plugin.id(), error = %e, "on_error hook failed");
            }
        }
    }
}
