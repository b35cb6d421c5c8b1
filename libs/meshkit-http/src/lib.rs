#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! HTTP variant of the meshkit server.
//!
//! Routes are plain axum [`MethodRouter`](axum::routing::MethodRouter)s; every
//! distinct path is also published to the registry as an endpoint.

pub mod server;

pub use server::HttpServer;
