//! Server-side TLS configuration from PEM files.

use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::TlsOptions;
use crate::error::ServerError;

/// Build a rustls server config advertising `h2` and `http/1.1` over ALPN.
///
/// # Errors
/// [`ServerError::Tls`] when a file cannot be read or the key does not match
/// the certificate.
pub fn load_server_config(opts: &TlsOptions) -> Result<Arc<ServerConfig>, ServerError> {
    let certs = CertificateDer::pem_file_iter(&opts.cert_file)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| {
            ServerError::Tls(format!(
                "certificate chain {}: {e}",
                opts.cert_file.display()
            ))
        })?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificates in {}",
            opts.cert_file.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_file(&opts.key_file).map_err(|e| {
        ServerError::Tls(format!("private key {}: {e}", opts.key_file.display()))
    })?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_files_are_reported() {
        let opts = TlsOptions {
            cert_file: "/nonexistent/cert.pem".into(),
            key_file: "/nonexistent/key.pem".into(),
        };
        let err = load_server_config(&opts).unwrap_err();
        assert!(matches!(err, ServerError::Tls(msg) if msg.contains("cert.pem")));
    }

    #[test]
    fn file_without_certificates_is_rejected() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        let opts = TlsOptions {
            cert_file: cert.path().to_path_buf(),
            key_file: cert.path().to_path_buf(),
        };
        assert!(matches!(
            load_server_config(&opts),
            Err(ServerError::Tls(_))
        ));
    }
}
