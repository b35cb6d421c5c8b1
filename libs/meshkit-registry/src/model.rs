//! Service, node and endpoint records exchanged with a registry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// One running instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique per instance, stable across heartbeats (`<service>-<instance>`).
    pub id: String,
    /// `host:port` reachable by clients.
    pub address: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A named handler exposed by a service (route or RPC method).
///
/// Endpoints are informational: they never influence address resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Endpoint {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A named, versioned group of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Resolution key.
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Service {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "latest".to_owned(),
            metadata: HashMap::new(),
            endpoints: Vec::new(),
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Addresses of every node in this service, in node order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.address.as_str())
    }

    /// Reject records a backend must not store.
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidArgument`] when the service name is empty,
    /// or when a node has an empty id or address.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "service name must not be empty".to_owned(),
            ));
        }
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(RegistryError::InvalidArgument(format!(
                    "node of service '{}' has an empty id",
                    self.name
                )));
            }
            if node.address.is_empty() {
                return Err(RegistryError::InvalidArgument(format!(
                    "node '{}' has an empty address",
                    node.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn service_builder_defaults_to_latest() {
        let svc = Service::new("hello").with_node(Node::new("hello-1", "10.0.0.1:9000"));
        assert_eq!(svc.version, "latest");
        assert_eq!(svc.addresses().collect::<Vec<_>>(), vec!["10.0.0.1:9000"]);
    }

    #[test]
    fn validate_rejects_empty_name_and_nodes() {
        assert!(matches!(
            Service::new(" ").validate(),
            Err(RegistryError::InvalidArgument(_))
        ));
        assert!(
            Service::new("svc")
                .with_node(Node::new("", "127.0.0.1:1"))
                .validate()
                .is_err()
        );
        assert!(
            Service::new("svc")
                .with_node(Node::new("svc-1", ""))
                .validate()
                .is_err()
        );
        assert!(
            Service::new("svc")
                .with_node(Node::new("svc-1", "127.0.0.1:1"))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn service_serializes_without_empty_metadata() {
        let svc = Service::new("hello")
            .with_endpoint(Endpoint::new("/hello"))
            .with_node(Node::new("hello-1", "10.0.0.1:9000").with_metadata("zone", "a"));
        let json = serde_json::to_value(&svc).unwrap();
        assert!(json.get("metadata").is_none());
        assert_eq!(json["nodes"][0]["metadata"]["zone"], "a");
        let back: Service = serde_json::from_value(json).unwrap();
        assert_eq!(back, svc);
    }
}
