//! The registry contract implemented by every discovery backend.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::RegistryError;
use crate::model::Service;

/// Domain used when a registration does not name one.
pub const DEFAULT_DOMAIN: &str = "default";

/// Options attached to a [`Registry::register`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOptions {
    /// How long the record stays visible without being refreshed.
    /// `Duration::ZERO` keeps it until an explicit deregister.
    pub ttl: Duration,
    /// Namespace the record is written to.
    pub domain: Option<String>,
}

impl RegisterOptions {
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, domain: None }
    }

    #[must_use]
    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Domain to write to, falling back to [`DEFAULT_DOMAIN`].
    #[must_use]
    pub fn domain_or_default(&self) -> &str {
        self.domain.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self::with_ttl(Duration::ZERO)
    }
}

/// Options attached to a [`Registry::deregister`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeregisterOptions {
    pub domain: Option<String>,
}

impl DeregisterOptions {
    #[must_use]
    pub fn in_domain(domain: Option<String>) -> Self {
        Self { domain }
    }

    #[must_use]
    pub fn domain_or_default(&self) -> &str {
        self.domain.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }
}

/// Kind of change reported by [`Registry::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Create,
    Update,
    Delete,
}

/// A single change to a watched service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub action: WatchAction,
    /// The service as it looks after the change; for `Delete`, the removed nodes.
    pub service: Service,
}

/// Infinite, cancellable stream of watch events. Dropping it cancels the watch.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent, RegistryError>> + Send>>;

/// Discovery backend.
///
/// Implementations must be safe for concurrent use by any number of servers
/// and resolvers; callers take no lock around registry calls.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Backend identifier, also used as the client target scheme (`<scheme>:///<name>`).
    fn scheme(&self) -> &str;

    /// Write or refresh the nodes carried by `service`.
    ///
    /// Registering a node id that already exists refreshes its TTL and replaces
    /// its address and metadata.
    ///
    /// # Errors
    /// [`RegistryError::Unavailable`] when the backend cannot be reached,
    /// [`RegistryError::InvalidArgument`] when the record is malformed.
    async fn register(
        &self,
        service: &Service,
        opts: &RegisterOptions,
    ) -> Result<(), RegistryError>;

    /// Remove the nodes carried by `service`. Unknown nodes are ignored.
    ///
    /// # Errors
    /// [`RegistryError::Unavailable`] when the backend cannot be reached.
    async fn deregister(
        &self,
        service: &Service,
        opts: &DeregisterOptions,
    ) -> Result<(), RegistryError>;

    /// Live services registered under `name`, one entry per version.
    ///
    /// # Errors
    /// [`RegistryError::NotFound`] or [`RegistryError::Unavailable`], depending on the backend.
    async fn lookup(&self, name: &str) -> Result<Vec<Service>, RegistryError>;

    /// Every live service known to the backend.
    ///
    /// # Errors
    /// [`RegistryError::Unsupported`] unless the backend overrides it.
    async fn list_services(&self) -> Result<Vec<Service>, RegistryError> {
        Err(RegistryError::Unsupported("list_services"))
    }

    /// Stream of changes to `name`. Optional: callers fall back to polling
    /// [`Registry::lookup`] when this returns [`RegistryError::Unsupported`].
    ///
    /// # Errors
    /// [`RegistryError::Unsupported`] unless the backend overrides it.
    async fn watch(&self, name: &str) -> Result<WatchStream, RegistryError> {
        let _ = name;
        Err(RegistryError::Unsupported("watch"))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn register_options_domain_fallback() {
        let opts = RegisterOptions::with_ttl(Duration::from_secs(90));
        assert_eq!(opts.domain_or_default(), DEFAULT_DOMAIN);
        assert_eq!(opts.in_domain("prod").domain_or_default(), "prod");
        assert_eq!(
            DeregisterOptions::in_domain(None).domain_or_default(),
            DEFAULT_DOMAIN
        );
    }
}
