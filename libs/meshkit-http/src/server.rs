//! axum-backed server driven by [`ServerLifecycle`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::routing::MethodRouter;
use meshkit_registry::{Endpoint, Registry};
use meshkit_runtime::{ManagedServer, ServerError, ServerLifecycle, ServerOptions, ServerState};
use parking_lot::RwLock;
use tokio::net::TcpListener;

/// HTTP server that registers itself and keeps a list of its route paths.
///
/// Routes added after `start` take effect on the next start.
pub struct HttpServer {
    lifecycle: ServerLifecycle,
    router: RwLock<Router>,
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl HttpServer {
    #[must_use]
    pub fn new(options: ServerOptions, registry: Arc<dyn Registry>) -> Self {
        Self::from_lifecycle(ServerLifecycle::new("http", options, registry))
    }

    /// Wrap a pre-configured lifecycle (custom listener, TLS, retry policy).
    #[must_use]
    pub fn from_lifecycle(lifecycle: ServerLifecycle) -> Self {
        Self {
            lifecycle,
            router: RwLock::new(Router::new()),
        }
    }

    #[must_use]
    pub fn with_listener(self, listener: TcpListener) -> Self {
        Self {
            lifecycle: self.lifecycle.with_listener(listener),
            router: self.router,
        }
    }

    #[must_use]
    pub fn with_tls(self, config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            lifecycle: self.lifecycle.with_tls(config),
            router: self.router,
        }
    }

    /// Route `path` to `handler`, publishing `path` as an endpoint the first
    /// time it is seen.
    pub fn handle(&self, path: &str, handler: MethodRouter) {
        let mut router = self.router.write();
        *router = std::mem::take(&mut *router).route(path, handler);
        if self.lifecycle.add_endpoint(Endpoint::new(path)) {
            tracing::debug!(server = %self.lifecycle.options().name, path, "route added");
        }
    }

    /// Replace the whole router. Endpoints already published are kept.
    pub fn set_router(&self, router: Router) {
        *self.router.write() = router;
    }

    /// Start serving the current router.
    ///
    /// # Errors
    /// See [`ServerLifecycle::start`].
    pub async fn start(&self) -> Result<(), ServerError> {
        let router = self.router.read().clone();
        self.lifecycle.start(router).await
    }

    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }

    #[must_use]
    pub fn options(&self) -> ServerOptions {
        self.lifecycle.options()
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.bound_address()
    }

    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.lifecycle.endpoints()
    }

    #[must_use]
    pub fn lifecycle(&self) -> &ServerLifecycle {
        &self.lifecycle
    }
}

#[async_trait]
impl ManagedServer for HttpServer {
    fn name(&self) -> String {
        format!("http:{}", self.lifecycle.options().name)
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(HttpServer::start(self).await?)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        HttpServer::stop(self).await;
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use meshkit_registry::NoopRegistry;

    #[test]
    fn handle_publishes_each_path_once() {
        let server = HttpServer::new(ServerOptions::http_defaults(), Arc::new(NoopRegistry));
        server.handle("/hello", get(|| async { "hi" }));
        server.handle("/users", get(|| async { "list" }));
        server.handle("/users", post(|| async { "created" }));

        let names: Vec<_> = server.endpoints().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["/hello", "/users"]);
    }

    #[test]
    fn name_uses_configured_service() {
        let server = HttpServer::new(
            ServerOptions::http_defaults().with_name("web"),
            Arc::new(NoopRegistry),
        );
        assert_eq!(ManagedServer::name(&server), "http:web");
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
