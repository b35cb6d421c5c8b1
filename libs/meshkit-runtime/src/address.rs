//! Bind and advertise address handling.

use std::net::{IpAddr, SocketAddr};

use crate::error::ServerError;

/// Normalize a configured bind address; `:port` means every interface.
#[must_use]
pub fn bind_address(address: &str) -> String {
    let address = address.trim();
    if address.is_empty() {
        "0.0.0.0:0".to_owned()
    } else if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_owned()
    }
}

/// Address written to the registry for this node.
///
/// `advertise` wins over the bound address; an advertise value without a port
/// borrows the bound port. Unspecified hosts (`0.0.0.0`, `::`, empty) are
/// replaced with the machine's primary local IP so the record is dialable.
///
/// # Errors
/// [`ServerError::NoLocalIp`] when the host is unspecified and no local IP can
/// be determined.
pub fn registration_address(advertise: Option<&str>, bound: SocketAddr) -> Result<String, ServerError> {
    let (host, port) = match advertise.map(str::trim).filter(|a| !a.is_empty()) {
        Some(adv) => split_host_port(adv).unwrap_or_else(|| (adv.to_owned(), bound.port())),
        None => (bound.ip().to_string(), bound.port()),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']').to_owned();

    let host = if is_unspecified(&host) {
        local_ip_address::local_ip()
            .map_err(ServerError::NoLocalIp)?
            .to_string()
    } else {
        host
    };

    Ok(join_host_port(&host, port))
}

fn is_unspecified(host: &str) -> bool {
    host.is_empty() || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified())
}

fn split_host_port(addr: &str) -> Option<(String, u16)> {
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Some((sock.ip().to_string(), sock.port()));
    }
    // Bare IPv6 literals contain colons but no port.
    if addr.parse::<IpAddr>().is_ok() {
        return None;
    }
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.to_owned(), port))
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
