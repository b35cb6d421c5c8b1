#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Server lifecycle for meshkit services.
//!
//! [`ServerLifecycle`] binds a listener, serves a tower service on it, keeps
//! the node registered in a [`meshkit_registry::Registry`] through periodic
//! heartbeats and shuts down in two phases: a bounded graceful drain, then a
//! forced close. The RPC and HTTP servers are thin wrappers around it.
//!
//! [`App`] composes several servers into one process and stops them on OS
//! signals.

pub mod address;
pub mod app;
pub mod backoff;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod serve;
pub mod shutdown;
pub mod tls;

pub use app::{App, ManagedServer, ShutdownOptions};
pub use backoff::{Backoff, RegisterRetry, backoff};
pub use config::{ServerOptions, TlsOptions};
pub use error::ServerError;
pub use lifecycle::{ServerLifecycle, ServerState};
pub use logging::{LogFormat, LoggingConfig, init_logging};
pub use serve::{BoxError, RequestBody};
