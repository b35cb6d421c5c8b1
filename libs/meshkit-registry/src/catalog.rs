//! Config-driven selection of the registry backend.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory::MemoryRegistry;
use crate::noop::NoopRegistry;
use crate::registry::Registry;

/// Built-in backends selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// Discovery disabled.
    Noop,
    /// Process-local registry.
    #[default]
    Memory,
}

/// `registry:` section of the application config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub kind: RegistryKind,
}

impl RegistryConfig {
    /// Instantiate the configured backend.
    #[must_use]
    pub fn build(&self) -> Arc<dyn Registry> {
        match self.kind {
            RegistryKind::Noop => Arc::new(NoopRegistry),
            RegistryKind::Memory => Arc::new(MemoryRegistry::new()),
        }
    }
}
