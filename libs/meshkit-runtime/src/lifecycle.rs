//! Start/heartbeat/stop state machine shared by the RPC and HTTP servers.
//!
//! A running server owns two tasks: the accept loop from [`crate::serve`] and a
//! heartbeat task that re-registers the node every `register_interval`. `stop`
//! cancels the heartbeat task, which deregisters and starts the graceful drain;
//! connections still open after `shutdown_grace` are forced closed. Both tasks
//! are gone before `stop` returns, so a restart never overlaps an old run.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response};
use hyper::body::Body;
use meshkit_registry::noop::NOOP_SCHEME;
use meshkit_registry::{
    DeregisterOptions, Endpoint, Node, RegisterOptions, Registry, Service, new_instance_id,
    node_id,
};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::address::{bind_address, registration_address};
use crate::backoff::RegisterRetry;
use crate::config::ServerOptions;
use crate::error::ServerError;
use crate::serve::{BoxError, RequestBody, ServeConfig, ServeSignals, serve};
use crate::tls::load_server_config;

/// Run state of a [`ServerLifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug)]
struct RunState {
    state: ServerState,
    registered: bool,
    bound: Option<SocketAddr>,
}

/// Settings frozen when a run starts. Option updates made while running only
/// reach the registry on the next start, so one run never writes two records.
#[derive(Debug)]
struct RunConfig {
    options: ServerOptions,
    bound: SocketAddr,
}

/// Everything `stop` needs to tear one run down.
#[derive(Debug)]
struct RunningHandles {
    stop: CancellationToken,
    signals: ServeSignals,
    heartbeat: JoinHandle<()>,
    serving: JoinHandle<()>,
    stop_timeout: Duration,
    shutdown_grace: Duration,
}

/// State reachable from the heartbeat task.
struct Shared {
    transport: &'static str,
    options: RwLock<ServerOptions>,
    registry: Arc<dyn Registry>,
    retry: RegisterRetry,
    run: RwLock<RunState>,
    endpoints: RwLock<Vec<Endpoint>>,
}

/// Lifecycle of one listening server.
///
/// `start` and `stop` are idempotent and serialized: concurrent calls queue
/// behind each other, and a call that finds the server already in the wanted
/// state returns `Ok` without doing anything.
pub struct ServerLifecycle {
    shared: Arc<Shared>,
    running: Mutex<Option<RunningHandles>>,
    listener: Mutex<Option<TcpListener>>,
    tls: RwLock<Option<Arc<rustls::ServerConfig>>>,
    transition: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ServerLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLifecycle")
            .field("transport", &self.shared.transport)
            .field("name", &self.shared.options.read().name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServerLifecycle {
    /// `transport` labels logs and node metadata (`"grpc"`, `"http"`).
    /// A missing instance id is generated here so the node id stays stable
    /// across restarts of this value.
    #[must_use]
    pub fn new(transport: &'static str, mut options: ServerOptions, registry: Arc<dyn Registry>) -> Self {
        if options.id.as_deref().is_none_or(str::is_empty) {
            options.id = Some(new_instance_id());
        }
        Self {
            shared: Arc::new(Shared {
                transport,
                options: RwLock::new(options),
                registry,
                retry: RegisterRetry::default(),
                run: RwLock::new(RunState {
                    state: ServerState::Stopped,
                    registered: false,
                    bound: None,
                }),
                endpoints: RwLock::new(Vec::new()),
            }),
            running: Mutex::new(None),
            listener: Mutex::new(None),
            tls: RwLock::new(None),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Serve on an already bound listener instead of `options.address`.
    /// Used once; a later restart binds the configured address.
    #[must_use]
    pub fn with_listener(self, listener: TcpListener) -> Self {
        *self.listener.lock() = Some(listener);
        self
    }

    /// TLS config taking precedence over `options.tls` files.
    #[must_use]
    pub fn with_tls(self, config: Arc<rustls::ServerConfig>) -> Self {
        *self.tls.write() = Some(config);
        self
    }

    /// Override the registration retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RegisterRetry) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.retry = retry;
        }
        self
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.shared.run.read().state
    }

    #[must_use]
    pub fn options(&self) -> ServerOptions {
        self.shared.options.read().clone()
    }

    /// Apply `f` to the options. Takes effect on the next `start`.
    pub fn update_options(&self, f: impl FnOnce(&mut ServerOptions)) {
        f(&mut self.shared.options.write());
    }

    /// Address the listener is bound to while running.
    #[must_use]
    pub fn bound_address(&self) -> Option<SocketAddr> {
        self.shared.run.read().bound
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.shared.run.read().registered
    }

    #[must_use]
    pub fn node_id(&self) -> String {
        self.shared.node_id()
    }

    #[must_use]
    pub fn registry(&self) -> Arc<dyn Registry> {
        Arc::clone(&self.shared.registry)
    }

    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.shared.endpoints.read().clone()
    }

    /// Append `endpoint` unless one with the same name is already known.
    /// Returns whether it was added.
    pub fn add_endpoint(&self, endpoint: Endpoint) -> bool {
        let mut endpoints = self.shared.endpoints.write();
        if endpoints.iter().any(|e| e.name == endpoint.name) {
            return false;
        }
        endpoints.push(endpoint);
        true
    }

    /// Bind, start serving `service`, register and launch the heartbeat.
    ///
    /// Returns once the initial registration attempts are over. A registration
    /// that never succeeds is logged and leaves the server running.
    ///
    /// # Errors
    /// [`ServerError::Bind`], [`ServerError::LocalAddr`] or [`ServerError::Tls`];
    /// the server stays stopped.
    pub async fn start<S, B>(&self, service: S) -> Result<(), ServerError>
    where
        S: tower::Service<Request<RequestBody>, Response = Response<B>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let _transition = self.transition.lock().await;
        {
            let mut run = self.shared.run.write();
            if run.state != ServerState::Stopped {
                tracing::debug!(server = %self.shared.name(), state = ?run.state, "start ignored");
                return Ok(());
            }
            run.state = ServerState::Starting;
        }

        let (listener, config) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.shared.run.write().state = ServerState::Stopped;
                return Err(e);
            }
        };
        let bound = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.shared.run.write().state = ServerState::Stopped;
                return Err(ServerError::LocalAddr(e));
            }
        };
        self.shared.run.write().bound = Some(bound);
        let run = Arc::new(RunConfig {
            options: self.options(),
            bound,
        });

        let signals = ServeSignals::default();
        let serving = tokio::spawn(serve(listener, config, service, signals.clone()));
        tracing::info!(
            server = %run.options.name,
            transport = self.shared.transport,
            %bound,
            "server listening"
        );

        if let Err(e) = self.shared.register(&run).await {
            tracing::error!(
                server = %run.options.name,
                error = %e,
                source = ?std::error::Error::source(&e),
                "registration failed; serving without discovery"
            );
        }

        let stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat(
            Arc::clone(&self.shared),
            Arc::clone(&run),
            stop.clone(),
            signals.graceful.clone(),
        ));

        *self.running.lock() = Some(RunningHandles {
            stop,
            signals,
            heartbeat,
            serving,
            stop_timeout: run.options.stop_timeout,
            shutdown_grace: run.options.shutdown_grace,
        });
        self.shared.run.write().state = ServerState::Running;
        Ok(())
    }

    /// Deregister, drain and close. No-op unless running.
    ///
    /// Deregistration gets `stop_timeout`; past that it is abandoned and the
    /// registry TTL cleans up. In-flight requests get `shutdown_grace` before
    /// their connections are cut. The listener is closed when this returns.
    pub async fn stop(&self) {
        let _transition = self.transition.lock().await;
        {
            let mut run = self.shared.run.write();
            if run.state != ServerState::Running {
                return;
            }
            run.state = ServerState::Stopping;
        }
        let handles = self.running.lock().take();
        let name = self.shared.name();

        if let Some(handles) = handles {
            let RunningHandles {
                stop,
                signals,
                mut heartbeat,
                mut serving,
                stop_timeout,
                shutdown_grace,
            } = handles;

            stop.cancel();
            if tokio::time::timeout(stop_timeout, &mut heartbeat).await.is_err() {
                tracing::warn!(
                    server = %name,
                    timeout_ms = u64::try_from(stop_timeout.as_millis()).unwrap_or(u64::MAX),
                    "deregistration did not finish in time; relying on TTL expiry"
                );
                heartbeat.abort();
                if let Err(e) = heartbeat.await
                    && !e.is_cancelled()
                {
                    tracing::warn!(server = %name, error = %e, "heartbeat task ended abnormally");
                }
            }

            signals.graceful.cancel();
            if tokio::time::timeout(shutdown_grace, &mut serving).await.is_err() {
                tracing::warn!(
                    server = %name,
                    grace_ms = u64::try_from(shutdown_grace.as_millis()).unwrap_or(u64::MAX),
                    "graceful drain timed out, closing connections"
                );
                signals.force.cancel();
                if let Err(e) = serving.await {
                    tracing::warn!(server = %name, error = %e, "serving task ended abnormally");
                }
            }
        }

        let mut run = self.shared.run.write();
        run.state = ServerState::Stopped;
        run.registered = false;
        run.bound = None;
        tracing::info!(server = %name, "server stopped");
    }

    async fn prepare(&self) -> Result<(TcpListener, ServeConfig), ServerError> {
        let opts = self.options();

        let tls = match self.tls.read().clone() {
            Some(cfg) => Some(cfg),
            None => opts.tls.as_ref().map(load_server_config).transpose()?,
        };

        let supplied = self.listener.lock().take();
        let listener = match supplied {
            Some(l) => l,
            None => {
                let addr = bind_address(&opts.address);
                TcpListener::bind(&addr)
                    .await
                    .map_err(|source| ServerError::Bind { addr, source })?
            }
        };

        Ok((
            listener,
            ServeConfig {
                tls: tls.map(TlsAcceptor::from),
                max_connections: opts.max_connections,
                max_body_size: Some(opts.max_message_size),
            },
        ))
    }
}

impl Shared {
    fn name(&self) -> String {
        self.options.read().name.clone()
    }

    fn node_id(&self) -> String {
        let opts = self.options.read();
        node_id(&opts.name, opts.id.as_deref().unwrap_or_default())
    }

    /// Registry record of this node for `run`.
    fn record(&self, run: &RunConfig) -> Result<Service, ServerError> {
        let opts = &run.options;
        let address = registration_address(opts.advertise.as_deref(), run.bound)?;

        let mut node = Node::new(
            node_id(&opts.name, opts.id.as_deref().unwrap_or_default()),
            address,
        );
        node.metadata.clone_from(&opts.metadata);
        node.metadata
            .insert("transport".to_owned(), self.transport.to_owned());
        node.metadata
            .insert("registry".to_owned(), self.registry.scheme().to_owned());

        let mut service = Service::new(opts.name.clone())
            .with_version(opts.version.clone())
            .with_node(node);
        service.endpoints = self.endpoints.read().clone();
        Ok(service)
    }

    async fn register(&self, run: &RunConfig) -> Result<(), ServerError> {
        if self.registry.scheme() == NOOP_SCHEME {
            return Ok(());
        }
        let service = self.record(run)?;
        let mut opts = RegisterOptions::with_ttl(run.options.register_ttl);
        opts.domain.clone_from(&run.options.namespace);

        if !self.run.read().registered {
            tracing::info!(
                server = %service.name,
                node = %service.nodes[0].id,
                address = %service.nodes[0].address,
                registry = self.registry.scheme(),
                "registering node"
            );
        }

        self.retry
            .run(&service.name, || self.registry.register(&service, &opts))
            .await
            .map_err(ServerError::Register)?;

        self.run.write().registered = true;
        Ok(())
    }

    async fn deregister(&self, run: &RunConfig) -> Result<(), ServerError> {
        if self.registry.scheme() == NOOP_SCHEME {
            return Ok(());
        }
        let service = self.record(run)?;
        tracing::info!(
            server = %service.name,
            node = %service.nodes[0].id,
            registry = self.registry.scheme(),
            "deregistering node"
        );

        self.registry
            .deregister(
                &service,
                &DeregisterOptions::in_domain(run.options.namespace.clone()),
            )
            .await
            .map_err(ServerError::Deregister)?;

        self.run.write().registered = false;
        Ok(())
    }
}

fn heartbeat_ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn heartbeat(
    shared: Arc<Shared>,
    run: Arc<RunConfig>,
    stop: CancellationToken,
    graceful: CancellationToken,
) {
    let mut ticker = heartbeat_ticker(run.options.register_interval);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            () = next_tick(&mut ticker) => {
                if let Err(e) = shared.register(&run).await {
                    tracing::error!(
                        server = %run.options.name,
                        error = %e,
                        source = ?std::error::Error::source(&e),
                        "heartbeat registration failed"
                    );
                }
            }
        }
    }

    if let Err(e) = shared.deregister(&run).await {
        tracing::error!(
            server = %run.options.name,
            error = %e,
            source = ?std::error::Error::source(&e),
            "deregistration failed; relying on TTL expiry"
        );
    }
    graceful.cancel();
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use meshkit_registry::{MemoryRegistry, NoopRegistry};

    fn lifecycle(registry: Arc<dyn Registry>) -> ServerLifecycle {
        ServerLifecycle::new(
            "http",
            ServerOptions::http_defaults()
                .with_name("unit")
                .with_address("127.0.0.1:0"),
            registry,
        )
    }

    #[test]
    fn instance_id_is_generated_once() {
        let lc = lifecycle(Arc::new(NoopRegistry));
        let id = lc.node_id();
        assert!(id.starts_with("unit-"));
        assert_eq!(lc.node_id(), id);
    }

    #[test]
    fn explicit_instance_id_is_kept() {
        let lc = ServerLifecycle::new(
            "grpc",
            ServerOptions::rpc_defaults().with_name("svc").with_id("7"),
            Arc::new(NoopRegistry),
        );
        assert_eq!(lc.node_id(), "svc-7");
    }

    #[test]
    fn endpoints_are_append_only_without_duplicates() {
        let lc = lifecycle(Arc::new(NoopRegistry));
        assert!(lc.add_endpoint(Endpoint::new("/a")));
        assert!(lc.add_endpoint(Endpoint::new("/b")));
        assert!(!lc.add_endpoint(Endpoint::new("/a")));
        let names: Vec<_> = lc.endpoints().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["/a", "/b"]);
    }

    #[test]
    fn zero_interval_disables_heartbeat() {
        assert!(heartbeat_ticker(Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn record_carries_endpoints_and_transport_metadata() {
        let registry = Arc::new(MemoryRegistry::new());
        let lc = lifecycle(registry);
        lc.add_endpoint(Endpoint::new("/hello"));
        let run = RunConfig {
            options: lc.options(),
            bound: "127.0.0.1:8080".parse().unwrap(),
        };

        let service = lc.shared.record(&run).unwrap();
        assert_eq!(service.name, "unit");
        assert_eq!(service.endpoints, vec![Endpoint::new("/hello")]);
        assert_eq!(service.nodes[0].address, "127.0.0.1:8080");
        assert_eq!(service.nodes[0].metadata["transport"], "http");
        assert_eq!(service.nodes[0].metadata["registry"], "memory");
        assert_eq!(run.options.namespace, None);
        assert_eq!(run.options.register_ttl, Duration::from_secs(60));
    }
}
