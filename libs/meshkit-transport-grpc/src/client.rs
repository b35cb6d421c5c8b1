//! Client connector: dial a logical service name through a registry.
//!
//! Connecting is non-blocking. The returned channel starts empty and fills as
//! the resolver finds nodes; calls made before that fail with a connection
//! error rather than failing `connect` itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use meshkit_registry::{NoopRegistry, Registry};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::service::interceptor::InterceptedService;
use tonic::transport::Channel;

use crate::interceptor::{CallInterceptor, InterceptorChain};
use crate::resolver::{BalanceSink, DEFAULT_POLL_INTERVAL, EndpointSettings, NameResolver};
use crate::target::{Target, TargetError};

/// Failure to set up a client.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error(transparent)]
    InvalidTarget(#[from] TargetError),

    #[error("no registry installed for scheme '{0}'")]
    UnknownScheme(String),
}

/// Client settings. Every knob is optional; unset ones use the defaults below.
#[derive(Clone)]
#[must_use]
pub struct ClientOptions {
    /// Registry to resolve through; [`NoopRegistry`] when unset.
    pub registry: Option<Arc<dyn Registry>>,
    /// Shared catalog `connect` installs the registry into; none when unset.
    pub catalog: Option<SchemeCatalog>,
    pub interceptors: InterceptorChain,
    pub connect_timeout: Duration,
    /// Per-call deadline applied by the transport.
    pub rpc_timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Capacity of the resolver-to-balancer change queue.
    pub buffer: usize,
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("registry", &self.registry.as_ref().map(|r| r.scheme().to_owned()))
            .field("interceptors", &self.interceptors)
            .field("connect_timeout", &self.connect_timeout)
            .field("rpc_timeout", &self.rpc_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            registry: None,
            catalog: None,
            interceptors: InterceptorChain::new(),
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: Some(Duration::from_secs(30)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            buffer: 1024,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_catalog(mut self, catalog: SchemeCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Append an interceptor; interceptors run in the order they were added.
    pub fn with_interceptor(mut self, interceptor: impl CallInterceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn endpoint_settings(&self) -> EndpointSettings {
        EndpointSettings {
            connect_timeout: self.connect_timeout,
            rpc_timeout: self.rpc_timeout,
        }
    }
}

/// Registries addressable by target scheme.
///
/// Cheap to clone; clones share the same mapping.
#[derive(Clone, Default)]
pub struct SchemeCatalog {
    schemes: Arc<RwLock<HashMap<String, Arc<dyn Registry>>>>,
}

impl fmt::Debug for SchemeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeCatalog")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl SchemeCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `registry` reachable under its scheme, replacing whatever was
    /// installed for that scheme before. Installing the registry that is
    /// already there changes nothing; returns whether the mapping changed.
    pub fn install(&self, registry: Arc<dyn Registry>) -> bool {
        let scheme = registry.scheme().to_owned();
        let mut schemes = self.schemes.write();
        if schemes
            .get(&scheme)
            .is_some_and(|current| Arc::ptr_eq(current, &registry))
        {
            return false;
        }
        if schemes.insert(scheme.clone(), registry).is_some() {
            tracing::debug!(%scheme, "resolver scheme replaced");
        } else {
            tracing::debug!(%scheme, "resolver scheme installed");
        }
        true
    }

    #[must_use]
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Registry>> {
        self.schemes.read().get(scheme).cloned()
    }

    /// Installed schemes, sorted.
    #[must_use]
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.schemes.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Open a balanced channel to `target` (`<scheme>:///<service>`).
    ///
    /// Must be called from within a tokio runtime; the resolver runs on a
    /// background task until the client is closed or dropped.
    ///
    /// # Errors
    /// [`ConnectError::InvalidTarget`] for a malformed target and
    /// [`ConnectError::UnknownScheme`] when no registry serves its scheme.
    pub fn dial(&self, target: &str, options: &ClientOptions) -> Result<RpcClient, ConnectError> {
        let target = Target::parse(target)?;
        let registry = self
            .get(&target.scheme)
            .ok_or_else(|| ConnectError::UnknownScheme(target.scheme.clone()))?;
        Ok(open(registry, target, options))
    }
}

fn open(registry: Arc<dyn Registry>, target: Target, options: &ClientOptions) -> RpcClient {
    let (channel, tx) = Channel::balance_channel::<String>(options.buffer.max(1));
    let sink = BalanceSink::new(tx, options.endpoint_settings());
    let cancel = CancellationToken::new();
    let resolver = NameResolver::new(Arc::clone(&registry), target.clone())
        .with_poll_interval(options.poll_interval);
    let task = resolver.spawn(sink, cancel.clone());

    tracing::info!(
        target = %target,
        connect_timeout_ms = u64::try_from(options.connect_timeout.as_millis()).unwrap_or(u64::MAX),
        interceptors = options.interceptors.len(),
        "rpc client created"
    );

    RpcClient {
        target,
        registry,
        channel,
        interceptors: options.interceptors.clone(),
        cancel: cancel.clone(),
        _guard: cancel.drop_guard(),
        resolver: task,
    }
}

/// Balanced connection to every live node of one service.
///
/// Dropping the client stops its resolver; channels already cloned out keep
/// their current endpoints but no longer follow the registry.
pub struct RpcClient {
    target: Target,
    registry: Arc<dyn Registry>,
    channel: Channel,
    interceptors: InterceptorChain,
    cancel: CancellationToken,
    _guard: DropGuard,
    resolver: JoinHandle<()>,
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("target", &self.target)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Connect to `service` through `options.registry`.
    ///
    /// The registry is installed into the options' catalog under its scheme,
    /// replacing any registry installed there before, and the client resolves
    /// `<scheme>:///<service>` through it.
    ///
    /// # Errors
    /// [`ConnectError::InvalidTarget`] when `service` is empty.
    pub fn connect(service: &str, options: &ClientOptions) -> Result<Self, ConnectError> {
        let registry = options
            .registry
            .clone()
            .unwrap_or_else(|| Arc::new(NoopRegistry));
        let target = Target::parse(&format!("{}:///{service}", registry.scheme()))?;
        if let Some(catalog) = &options.catalog {
            catalog.install(Arc::clone(&registry));
        }
        Ok(open(registry, target, options))
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Registry this client resolves through.
    #[must_use]
    pub fn registry(&self) -> Arc<dyn Registry> {
        Arc::clone(&self.registry)
    }

    /// Raw balanced channel, for generated clients without interceptors.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Channel wrapped in the configured interceptors, for generated clients:
    /// `GreeterClient::new(client.intercepted())`.
    #[must_use]
    pub fn intercepted(&self) -> InterceptedService<Channel, InterceptorChain> {
        InterceptedService::new(self.channel.clone(), self.interceptors.clone())
    }

    /// Stop following the registry and wait for the resolver task to end.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.resolver.await {
            tracing::warn!(target = %self.target, error = %e, "resolver task ended abnormally");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use meshkit_registry::{MemoryRegistry, Node, RegisterOptions, Service};

    #[test]
    fn install_replaces_per_scheme_and_is_idempotent() {
        let catalog = SchemeCatalog::new();
        let first: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let second: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        assert!(catalog.install(first.clone()));
        assert!(!catalog.install(first.clone()));
        assert!(catalog.install(second.clone()));
        assert!(catalog.install(Arc::new(NoopRegistry)));

        assert!(Arc::ptr_eq(&catalog.get("memory").unwrap(), &second));
        assert_eq!(catalog.schemes(), vec!["memory", "noop"]);
    }

    #[tokio::test]
    async fn dial_rejects_unknown_schemes_and_bad_targets() {
        let catalog = SchemeCatalog::new();
        let opts = ClientOptions::new();
        assert!(matches!(
            catalog.dial("etcd:///orders", &opts),
            Err(ConnectError::UnknownScheme(s)) if s == "etcd"
        ));
        assert!(matches!(
            catalog.dial("orders", &opts),
            Err(ConnectError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn connect_defaults_to_noop_registry() {
        let client = RpcClient::connect("orders", &ClientOptions::new()).unwrap();
        assert_eq!(client.target().to_string(), "noop:///orders");
        client.close().await;
    }

    #[tokio::test]
    async fn connect_installs_into_shared_catalog() {
        let catalog = SchemeCatalog::new();
        let opts = ClientOptions::new()
            .with_registry(Arc::new(MemoryRegistry::new()))
            .with_catalog(catalog.clone());

        let a = RpcClient::connect("orders", &opts).unwrap();
        let b = RpcClient::connect("billing", &opts).unwrap();
        assert_eq!(catalog.schemes(), vec!["memory"]);
        assert_eq!(b.target().service, "billing");
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn connect_resolves_through_its_own_registry_when_scheme_is_shared() {
        let catalog = SchemeCatalog::new();
        let stale: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let live: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        live.register(
            &Service::new("orders").with_node(Node::new("orders-1", "127.0.0.1:7001")),
            &RegisterOptions::default(),
        )
        .await
        .unwrap();

        let a = RpcClient::connect(
            "orders",
            &ClientOptions::new()
                .with_registry(stale.clone())
                .with_catalog(catalog.clone()),
        )
        .unwrap();
        let b = RpcClient::connect(
            "orders",
            &ClientOptions::new()
                .with_registry(live.clone())
                .with_catalog(catalog.clone()),
        )
        .unwrap();

        assert!(Arc::ptr_eq(&a.registry(), &stale));
        assert!(Arc::ptr_eq(&b.registry(), &live));
        assert!(Arc::ptr_eq(&catalog.get("memory").unwrap(), &live));
        let resolver = NameResolver::new(b.registry(), b.target().clone());
        assert_eq!(
            resolver.lookup_addresses().await.unwrap(),
            vec!["127.0.0.1:7001".to_owned()]
        );

        a.close().await;
        b.close().await;
    }
}
