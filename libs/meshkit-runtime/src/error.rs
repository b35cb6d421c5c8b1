//! Errors surfaced by server start-up.

use std::io;

/// Failure that keeps a server from serving.
///
/// Bind and TLS problems fail `start`. Registry variants are only ever logged
/// by the lifecycle, never returned from `start` or `stop`.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read the bound address")]
    LocalAddr(#[source] io::Error),

    #[error("no local IP address to advertise")]
    NoLocalIp(#[source] local_ip_address::Error),

    #[error("TLS configuration rejected: {0}")]
    Tls(String),

    #[error("registry write failed")]
    Register(#[source] meshkit_registry::RegistryError),

    #[error("registry delete failed")]
    Deregister(#[source] meshkit_registry::RegistryError),
}
