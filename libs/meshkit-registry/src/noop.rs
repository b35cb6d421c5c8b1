//! Registry that disables discovery without special-casing callers.

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::model::Service;
use crate::registry::{DeregisterOptions, RegisterOptions, Registry};

/// Scheme reported by [`NoopRegistry`].
pub const NOOP_SCHEME: &str = "noop";

/// Accepts every write and never resolves anything.
///
/// Useful for fixed-address deployments. Servers recognise the `noop` scheme
/// and skip registration entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistry;

#[async_trait]
impl Registry for NoopRegistry {
    fn scheme(&self) -> &str {
        NOOP_SCHEME
    }

    async fn register(&self, _service: &Service, _opts: &RegisterOptions) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn deregister(
        &self,
        _service: &Service,
        _opts: &DeregisterOptions,
    ) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn lookup(&self, _name: &str) -> Result<Vec<Service>, RegistryError> {
        Ok(Vec::new())
    }

    async fn list_services(&self) -> Result<Vec<Service>, RegistryError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::model::Node;

    #[tokio::test]
    async fn noop_accepts_writes_and_resolves_nothing() {
        let reg = NoopRegistry;
        let svc = Service::new("hello").with_node(Node::new("hello-1", "10.0.0.1:9000"));

        reg.register(&svc, &RegisterOptions::default()).await.unwrap();
        assert!(reg.lookup("hello").await.unwrap().is_empty());
        reg.deregister(&svc, &DeregisterOptions::default()).await.unwrap();
        assert_eq!(reg.scheme(), "noop");
        assert!(matches!(
            reg.watch("hello").await,
            Err(RegistryError::Unsupported("watch"))
        ));
    }
}
