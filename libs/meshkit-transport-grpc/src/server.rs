//! gRPC variant of the meshkit server.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use http::{Request, Response};
use meshkit_registry::{Endpoint, Registry};
use meshkit_runtime::{
    ManagedServer, RequestBody, ServerError, ServerLifecycle, ServerOptions, ServerState,
};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::service::Routes;

/// gRPC server: a set of tonic services behind a [`ServerLifecycle`].
///
/// Each added service is published to the registry as an endpoint named after
/// its fully qualified gRPC name (`package.Service`).
pub struct RpcServer {
    lifecycle: ServerLifecycle,
    routes: RwLock<Routes>,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl RpcServer {
    #[must_use]
    pub fn new(options: ServerOptions, registry: Arc<dyn Registry>) -> Self {
        Self::from_lifecycle(ServerLifecycle::new("grpc", options, registry))
    }

    /// Wrap a pre-configured lifecycle (custom listener, TLS, retry policy).
    #[must_use]
    pub fn from_lifecycle(lifecycle: ServerLifecycle) -> Self {
        Self {
            lifecycle,
            routes: RwLock::new(Routes::default()),
        }
    }

    #[must_use]
    pub fn with_listener(self, listener: TcpListener) -> Self {
        Self {
            lifecycle: self.lifecycle.with_listener(listener),
            routes: self.routes,
        }
    }

    /// Serve over TLS; the config should advertise `h2` via ALPN.
    #[must_use]
    pub fn with_tls(self, config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            lifecycle: self.lifecycle.with_tls(config),
            routes: self.routes,
        }
    }

    /// Mount a tonic service. Takes effect on the next start; a second
    /// service with an already mounted name is ignored.
    pub fn add_service<S>(&self, service: S)
    where
        S: tower::Service<Request<Body>, Response = Response<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let name = self.lifecycle.options().name;
        if !self.lifecycle.add_endpoint(Endpoint::new(S::NAME)) {
            tracing::warn!(server = %name, service = S::NAME, "grpc service already mounted");
            return;
        }
        let mut routes = self.routes.write();
        *routes = std::mem::take(&mut *routes).add_service(service);
        tracing::debug!(server = %name, service = S::NAME, "grpc service added");
    }

    /// Start serving the mounted services.
    ///
    /// # Errors
    /// See [`ServerLifecycle::start`].
    pub async fn start(&self) -> Result<(), ServerError> {
        let routes = self.routes.read().clone();
        self.lifecycle.start(GrpcRoutes { routes }).await
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
impl ManagedServer for RpcServer {
    fn name(&self) -> String {
        format!("grpc:{}", self.lifecycle.options().name)
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(RpcServer::start(self).await?)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        RpcServer::stop(self).await;
        Ok(())
    }
}

/// Hands size-limited hyper bodies to tonic's router.
#[derive(Clone)]
struct GrpcRoutes {
    routes: Routes,
}

impl tower::Service<Request<RequestBody>> for GrpcRoutes {
    type Response = <Routes as tower::Service<Request<Body>>>::Response;
    type Error = <Routes as tower::Service<Request<Body>>>::Error;
    type Future = <Routes as tower::Service<Request<Body>>>::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        tower::Service::<Request<Body>>::poll_ready(&mut self.routes, cx)
    }

    fn call(&mut self, req: Request<RequestBody>) -> Self::Future {
        tower::Service::<Request<Body>>::call(&mut self.routes, req.map(Body::new))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use meshkit_registry::NoopRegistry;

    #[derive(Clone)]
    struct Ping;

    impl NamedService for Ping {
        const NAME: &'static str = "test.Ping";
    }

    impl tower::Service<Request<Body>> for Ping {
        type Response = Response<Body>;
        type Error = Infallible;
        type Future = std::future::Ready<Result<Response<Body>, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Body>) -> Self::Future {
            std::future::ready(Ok(Response::new(Body::empty())))
        }
    }

    #[test]
    fn services_are_published_once_by_grpc_name() {
        let server = RpcServer::new(ServerOptions::rpc_defaults(), Arc::new(NoopRegistry));
        server.add_service(Ping);
        server.add_service(Ping);
        assert_eq!(server.endpoints(), vec![Endpoint::new("test.Ping")]);
        assert_eq!(ManagedServer::name(&server), "grpc:meshkit.server");
    }
}
