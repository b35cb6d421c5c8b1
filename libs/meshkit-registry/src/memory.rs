//! In-process registry backend.
//!
//! Records live in a `domain -> service name -> version` map guarded by a
//! single `RwLock`. Expired nodes are pruned lazily on every read and write,
//! so no background sweeper is needed.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::RegistryError;
use crate::model::{Endpoint, Node, Service};
use crate::registry::{
    DEFAULT_DOMAIN, DeregisterOptions, RegisterOptions, Registry, WatchAction, WatchEvent,
    WatchStream,
};

/// Scheme reported by [`MemoryRegistry`].
pub const MEMORY_SCHEME: &str = "memory";

const WATCH_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct NodeRecord {
    node: Node,
    expires_at: Option<Instant>,
}

impl NodeRecord {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Clone, Default)]
struct VersionRecord {
    metadata: HashMap<String, String>,
    endpoints: Vec<Endpoint>,
    nodes: Vec<NodeRecord>,
}

type Versions = BTreeMap<String, VersionRecord>;
type Names = BTreeMap<String, Versions>;

/// Registry kept entirely in process memory.
///
/// Suited to tests and single-process deployments where servers and clients
/// share one `Arc<MemoryRegistry>`. Lookups through the [`Registry`] trait read
/// the default domain; use [`MemoryRegistry::lookup_in_domain`] for others.
pub struct MemoryRegistry {
    domains: RwLock<HashMap<String, Names>>,
    events: broadcast::Sender<WatchEvent>,
}

impl std::fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("domains", &self.domains.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            domains: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Live services named `name` in `domain`, one entry per version.
    ///
    /// Returns an empty list for unknown names.
    #[must_use]
    pub fn lookup_in_domain(&self, domain: &str, name: &str) -> Vec<Service> {
        let mut expired = Vec::new();
        let services = {
            let mut domains = self.domains.write();
            let Some(names) = domains.get_mut(domain) else {
                return Vec::new();
            };
            prune_name(names, name, Instant::now(), &mut expired);
            names
                .get(name)
                .map(|versions| collect_versions(name, versions))
                .unwrap_or_default()
        };
        self.publish_expired(expired);
        services
    }

    fn publish(&self, action: WatchAction, service: Service) {
        // No subscribers is the common case.
        let _ = self.events.send(WatchEvent { action, service });
    }

    fn publish_expired(&self, expired: Vec<Service>) {
        for service in expired {
            tracing::debug!(
                service = %service.name,
                nodes = service.nodes.len(),
                "registry nodes expired"
            );
            self.publish(WatchAction::Delete, service);
        }
    }
}

fn expiry(ttl: Duration, now: Instant) -> Option<Instant> {
    if ttl.is_zero() { None } else { now.checked_add(ttl) }
}

fn collect_versions(name: &str, versions: &Versions) -> Vec<Service> {
    versions
        .iter()
        .filter(|(_, rec)| !rec.nodes.is_empty())
        .map(|(version, rec)| Service {
            name: name.to_owned(),
            version: version.clone(),
            metadata: rec.metadata.clone(),
            endpoints: rec.endpoints.clone(),
            nodes: rec.nodes.iter().map(|r| r.node.clone()).collect(),
        })
        .collect()
}

/// Drop expired nodes of `name`, remembering them as delete events.
fn prune_name(names: &mut Names, name: &str, now: Instant, expired: &mut Vec<Service>) {
    let Some(versions) = names.get_mut(name) else {
        return;
    };
    for (version, rec) in versions.iter_mut() {
        let (live, dead): (Vec<_>, Vec<_>) = rec.nodes.drain(..).partition(|n| n.is_live(now));
        rec.nodes = live;
        if !dead.is_empty() {
            expired.push(Service {
                name: name.to_owned(),
                version: version.clone(),
                metadata: rec.metadata.clone(),
                endpoints: rec.endpoints.clone(),
                nodes: dead.into_iter().map(|r| r.node).collect(),
            });
        }
    }
    versions.retain(|_, rec| !rec.nodes.is_empty());
    if versions.is_empty() {
        names.remove(name);
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn scheme(&self) -> &str {
        MEMORY_SCHEME
    }

    async fn register(&self, service: &Service, opts: &RegisterOptions) -> Result<(), RegistryError> {
        service.validate()?;
        let now = Instant::now();
        let expires_at = expiry(opts.ttl, now);

        let mut expired = Vec::new();
        let created = {
            let mut domains = self.domains.write();
            let names = domains.entry(opts.domain_or_default().to_owned()).or_default();
            prune_name(names, &service.name, now, &mut expired);

            let rec = names
                .entry(service.name.clone())
                .or_default()
                .entry(service.version.clone())
                .or_default();
            rec.metadata.clone_from(&service.metadata);
            rec.endpoints.clone_from(&service.endpoints);

            let mut created = false;
            for node in &service.nodes {
                let record = NodeRecord {
                    node: node.clone(),
                    expires_at,
                };
                if let Some(existing) = rec.nodes.iter_mut().find(|r| r.node.id == node.id) {
                    *existing = record;
                } else {
                    rec.nodes.push(record);
                    created = true;
                }
            }
            created
        };

        self.publish_expired(expired);
        let action = if created {
            WatchAction::Create
        } else {
            WatchAction::Update
        };
        self.publish(action, service.clone());
        Ok(())
    }

    async fn deregister(
        &self,
        service: &Service,
        opts: &DeregisterOptions,
    ) -> Result<(), RegistryError> {
        let removed = {
            let mut domains = self.domains.write();
            let Some(names) = domains.get_mut(opts.domain_or_default()) else {
                return Ok(());
            };
            let Some(versions) = names.get_mut(&service.name) else {
                return Ok(());
            };
            let Some(rec) = versions.get_mut(&service.version) else {
                return Ok(());
            };

            let before = rec.nodes.len();
            rec.nodes
                .retain(|r| !service.nodes.iter().any(|n| n.id == r.node.id));
            let removed = before - rec.nodes.len();

            if rec.nodes.is_empty() {
                versions.remove(&service.version);
            }
            if versions.is_empty() {
                names.remove(&service.name);
            }
            removed
        };

        if removed > 0 {
            self.publish(WatchAction::Delete, service.clone());
        }
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Vec<Service>, RegistryError> {
        Ok(self.lookup_in_domain(DEFAULT_DOMAIN, name))
    }

    async fn list_services(&self) -> Result<Vec<Service>, RegistryError> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let services = {
            let mut domains = self.domains.write();
            let Some(names) = domains.get_mut(DEFAULT_DOMAIN) else {
                return Ok(Vec::new());
            };
            let keys: Vec<String> = names.keys().cloned().collect();
            for key in &keys {
                prune_name(names, key, now, &mut expired);
            }
            names
                .iter()
                .flat_map(|(name, versions)| collect_versions(name, versions))
                .collect()
        };
        self.publish_expired(expired);
        Ok(services)
    }

    async fn watch(&self, name: &str) -> Result<WatchStream, RegistryError> {
        let wanted = name.to_owned();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |ev| match ev {
            Ok(ev) if ev.service.name == wanted => Some(Ok(ev)),
            Ok(_) => None,
            Err(lagged) => {
                tracing::warn!(service = %wanted, error = %lagged, "registry watcher lagged");
                None
            }
        });
        Ok(Box::pin(stream))
    }
}
