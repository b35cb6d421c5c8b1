#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Service registry contract for meshkit.
//!
//! A [`Registry`] stores [`Service`] records (a named, versioned group of
//! [`Node`]s) with a time-to-live. Servers write their own node on start and on
//! every heartbeat; clients read the node set back through [`Registry::lookup`].
//!
//! Two backends ship with the crate:
//! - [`NoopRegistry`] accepts writes and resolves nothing (discovery disabled)
//! - [`MemoryRegistry`] keeps records in process memory and honors TTL expiry
//!
//! Distributed backends live outside this crate and only need to implement the
//! [`Registry`] trait.

pub mod catalog;
pub mod error;
pub mod id;
pub mod memory;
pub mod model;
pub mod noop;
pub mod registry;

pub use catalog::{RegistryConfig, RegistryKind};
pub use error::RegistryError;
pub use id::{new_instance_id, node_id};
pub use memory::MemoryRegistry;
pub use model::{Endpoint, Node, Service};
pub use noop::NoopRegistry;
pub use registry::{
    DEFAULT_DOMAIN, DeregisterOptions, RegisterOptions, Registry, WatchAction, WatchEvent,
    WatchStream,
};
