//! Registry-backed name resolution for tonic balance channels.
//!
//! [`NameResolver`] polls [`Registry::lookup`] on a fixed period and hands the
//! full address list to an [`AddressSink`] every time, changed or not.
//! [`BalanceSink`] turns those lists into the `Insert`/`Remove` changes a
//! `Channel::balance_channel` expects.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshkit_registry::{Registry, RegistryError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;
use tonic::transport::channel::Change;

use crate::target::Target;

/// Default period between two lookups.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The receiving side went away; resolution can stop.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("address sink closed")]
pub struct SinkClosed;

/// Consumer of resolved address lists.
#[async_trait]
pub trait AddressSink: Send {
    /// Replace the known address set with `addresses`.
    ///
    /// # Errors
    /// [`SinkClosed`] once nobody listens anymore.
    async fn update(&mut self, addresses: Vec<String>) -> Result<(), SinkClosed>;
}

/// Per-endpoint settings applied to every discovered address.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub connect_timeout: Duration,
    pub rpc_timeout: Option<Duration>,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: None,
        }
    }
}

impl EndpointSettings {
    /// Plaintext HTTP/2 endpoint with keepalive for `address`.
    ///
    /// # Errors
    /// Returns an error when `address` does not form a valid URI.
    pub fn endpoint(&self, address: &str) -> Result<Endpoint, tonic::transport::Error> {
        let mut endpoint = Endpoint::from_shared(format!("http://{address}"))?
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .http2_keep_alive_interval(Duration::from_secs(30))
            .keep_alive_timeout(Duration::from_secs(10))
            .keep_alive_while_idle(true);
        if let Some(timeout) = self.rpc_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        Ok(endpoint)
    }
}

/// Feeds a tonic balance channel by diffing successive address lists.
pub struct BalanceSink {
    tx: mpsc::Sender<Change<String, Endpoint>>,
    settings: EndpointSettings,
    current: HashSet<String>,
}

impl BalanceSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Change<String, Endpoint>>, settings: EndpointSettings) -> Self {
        Self {
            tx,
            settings,
            current: HashSet::new(),
        }
    }

    /// Addresses currently inserted into the channel.
    #[must_use]
    pub fn current(&self) -> &HashSet<String> {
        &self.current
    }
}

#[async_trait]
impl AddressSink for BalanceSink {
    async fn update(&mut self, addresses: Vec<String>) -> Result<(), SinkClosed> {
        let wanted: HashSet<String> = addresses.into_iter().collect();

        let gone: Vec<String> = self.current.difference(&wanted).cloned().collect();
        for addr in gone {
            self.tx
                .send(Change::Remove(addr.clone()))
                .await
                .map_err(|_| SinkClosed)?;
            self.current.remove(&addr);
            tracing::debug!(address = %addr, "endpoint removed");
        }

        let new: Vec<String> = wanted.difference(&self.current).cloned().collect();
        for addr in new {
            let endpoint = match self.settings.endpoint(&addr) {
                Ok(ep) => ep,
                Err(e) => {
                    tracing::warn!(address = %addr, error = %e, "skipping unusable address");
                    continue;
                }
            };
            self.tx
                .send(Change::Insert(addr.clone(), endpoint))
                .await
                .map_err(|_| SinkClosed)?;
            tracing::debug!(address = %addr, "endpoint added");
            self.current.insert(addr);
        }
        Ok(())
    }
}

/// Keeps one target's address list in sync with the registry.
pub struct NameResolver {
    registry: Arc<dyn Registry>,
    target: Target,
    poll_interval: Duration,
}

impl NameResolver {
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>, target: Target) -> Self {
        Self {
            registry,
            target,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.poll_interval = interval;
        }
        self
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Hook for an immediate refresh. Intentionally empty: the poll loop is
    /// the only refresh path, so a topology change is seen within one period.
    pub fn resolve_now(&self) {
        tracing::trace!(target = %self.target, "resolve_now ignored");
    }

    /// Every node address of every version of the target service, in lookup
    /// order without duplicates. An unknown service resolves to no addresses.
    ///
    /// # Errors
    /// Any registry error other than [`RegistryError::NotFound`].
    pub async fn lookup_addresses(&self) -> Result<Vec<String>, RegistryError> {
        let services = match self.registry.lookup(&self.target.service).await {
            Ok(services) => services,
            Err(RegistryError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut seen = HashSet::new();
        Ok(services
            .iter()
            .flat_map(|svc| svc.addresses())
            .filter(|addr| seen.insert(*addr))
            .map(str::to_owned)
            .collect())
    }

    /// Poll until `cancel` fires or the sink closes.
    ///
    /// The first lookup runs immediately. A failed lookup pushes nothing, so
    /// the sink keeps serving the previous list.
    pub async fn run<S: AddressSink>(self, mut sink: S, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<Vec<String>> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let addresses = match self.lookup_addresses().await {
                Ok(addresses) => addresses,
                Err(e) => {
                    tracing::warn!(
                        target = %self.target,
                        error = %e,
                        "lookup failed, keeping previous addresses"
                    );
                    continue;
                }
            };

            if last.as_ref() != Some(&addresses) {
                tracing::debug!(
                    target = %self.target,
                    count = addresses.len(),
                    "resolved address set changed"
                );
                last = Some(addresses.clone());
            }

            if sink.update(addresses).await.is_err() {
                tracing::debug!(target = %self.target, "address sink closed, stopping resolver");
                break;
            }
        }
    }

    /// Run the poll loop on a background task.
    pub fn spawn<S: AddressSink + 'static>(self, sink: S, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(sink, cancel))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use meshkit_registry::{MemoryRegistry, Node, RegisterOptions, Service};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<Vec<String>>>>);

    #[async_trait]
    impl AddressSink for Recording {
        async fn update(&mut self, addresses: Vec<String>) -> Result<(), SinkClosed> {
            self.0.lock().push(addresses);
            Ok(())
        }
    }

    /// Registry whose lookups can be switched off.
    struct Flaky {
        inner: MemoryRegistry,
        down: AtomicBool,
    }

    #[async_trait]
    impl Registry for Flaky {
        fn scheme(&self) -> &str {
            "flaky"
        }

        async fn register(
            &self,
            service: &Service,
            opts: &RegisterOptions,
        ) -> Result<(), RegistryError> {
            self.inner.register(service, opts).await
        }

        async fn deregister(
            &self,
            service: &Service,
            opts: &meshkit_registry::DeregisterOptions,
        ) -> Result<(), RegistryError> {
            self.inner.deregister(service, opts).await
        }

        async fn lookup(&self, name: &str) -> Result<Vec<Service>, RegistryError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(RegistryError::Unavailable("partitioned".into()));
            }
            self.inner.lookup(name).await
        }
    }

    fn hello(id: &str, addr: &str) -> Service {
        Service::new("hello").with_node(Node::new(id, addr))
    }

    #[tokio::test]
    async fn lookup_flattens_versions_and_dedups() {
        let reg = Arc::new(MemoryRegistry::new());
        let opts = RegisterOptions::default();
        reg.register(&hello("a", "10.0.0.1:1").with_version("v1"), &opts)
            .await
            .unwrap();
        reg.register(&hello("b", "10.0.0.2:1").with_version("v2"), &opts)
            .await
            .unwrap();
        reg.register(&hello("c", "10.0.0.1:1").with_version("v2"), &opts)
            .await
            .unwrap();

        let resolver = NameResolver::new(reg, Target::new("memory", "hello"));
        let addrs = resolver.lookup_addresses().await.unwrap();
        assert_eq!(addrs, vec!["10.0.0.1:1", "10.0.0.2:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_every_period_and_keeps_list_on_failure() {
        let reg = Arc::new(Flaky {
            inner: MemoryRegistry::new(),
            down: AtomicBool::new(false),
        });
        reg.register(&hello("a", "10.0.0.1:1"), &RegisterOptions::default())
            .await
            .unwrap();

        let sink = Recording::default();
        let cancel = CancellationToken::new();
        let task = NameResolver::new(reg.clone(), Target::new("flaky", "hello"))
            .spawn(sink.clone(), cancel.clone());

        // Initial push plus two periodic ones, all identical.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(
            *sink.0.lock(),
            vec![vec!["10.0.0.1:1".to_owned()]; 3]
        );

        reg.down.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.0.lock().len(), 3);

        reg.down.store(false, Ordering::SeqCst);
        reg.deregister(&hello("a", "10.0.0.1:1"), &meshkit_registry::DeregisterOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.0.lock().last().unwrap(), &Vec::<String>::new());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn balance_sink_diffs_successive_lists() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sink = BalanceSink::new(tx, EndpointSettings::default());

        sink.update(vec!["127.0.0.1:1".into(), "127.0.0.1:2".into()])
            .await
            .unwrap();
        sink.update(vec!["127.0.0.1:2".into(), "127.0.0.1:3".into()])
            .await
            .unwrap();
        sink.update(vec!["127.0.0.1:2".into(), "127.0.0.1:3".into()])
            .await
            .unwrap();

        let mut inserted = Vec::new();
        let mut removed = Vec::new();
        while let Ok(change) = rx.try_recv() {
            match change {
                Change::Insert(addr, _) => inserted.push(addr),
                Change::Remove(addr) => removed.push(addr),
            }
        }
        inserted.sort();
        assert_eq!(inserted, vec!["127.0.0.1:1", "127.0.0.1:2", "127.0.0.1:3"]);
        assert_eq!(removed, vec!["127.0.0.1:1"]);
        assert_eq!(sink.current().len(), 2);
    }

    #[tokio::test]
    async fn closed_channel_stops_the_resolver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let reg = Arc::new(MemoryRegistry::new());
        reg.register(&hello("a", "10.0.0.1:1"), &RegisterOptions::default())
            .await
            .unwrap();

        let sink = BalanceSink::new(tx, EndpointSettings::default());
        let resolver = NameResolver::new(reg, Target::new("memory", "hello"));
        // Returns on its own; no cancellation needed.
        tokio::time::timeout(Duration::from_secs(5), resolver.run(sink, CancellationToken::new()))
            .await
            .unwrap();
    }
}
