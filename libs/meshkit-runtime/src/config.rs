//! Server options shared by the RPC and HTTP variants.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default request/response size limit for RPC servers.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Settings of one managed server.
///
/// Every field has a default, so config sections only name what they change:
///
/// ```yaml
/// rpc:
///   name: greeter
///   address: 0.0.0.0:50051
///   register_ttl: 90s
///   register_interval: 30s
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[must_use]
pub struct ServerOptions {
    /// Registry name clients resolve.
    pub name: String,
    pub version: String,
    /// Instance id; generated once per process when absent.
    pub id: Option<String>,
    /// Bind address. Port 0 asks the OS for an ephemeral port; `:port` binds
    /// every interface.
    pub address: String,
    /// Address written to the registry instead of the bound one (NAT, proxies).
    pub advertise: Option<String>,
    /// Registry domain.
    pub namespace: Option<String>,
    #[serde(with = "duration_str")]
    pub register_ttl: Duration,
    /// Heartbeat period. Zero disables re-registration.
    #[serde(with = "duration_str")]
    pub register_interval: Duration,
    /// How long in-flight requests may drain before connections are cut.
    #[serde(with = "duration_str")]
    pub shutdown_grace: Duration,
    /// Upper bound on how long `stop` waits for shutdown to finish.
    #[serde(with = "duration_str")]
    pub stop_timeout: Duration,
    /// Concurrent connection cap; unlimited when absent.
    pub max_connections: Option<usize>,
    pub max_message_size: usize,
    /// PEM material; serves TLS when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsOptions>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Certificate chain and private key files, both PEM encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsOptions {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::rpc_defaults()
    }
}

impl ServerOptions {
    /// Defaults for RPC servers: 90s TTL, 30s heartbeat.
    pub fn rpc_defaults() -> Self {
        Self {
            name: "meshkit.server".to_owned(),
            version: "latest".to_owned(),
            id: None,
            address: "0.0.0.0:0".to_owned(),
            advertise: None,
            namespace: None,
            register_ttl: Duration::from_secs(90),
            register_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
            max_connections: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tls: None,
            metadata: HashMap::new(),
        }
    }

    /// Defaults for HTTP servers: 60s TTL, 30s heartbeat.
    pub fn http_defaults() -> Self {
        Self {
            name: "meshkit.web".to_owned(),
            register_ttl: Duration::from_secs(60),
            ..Self::rpc_defaults()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_advertise(mut self, advertise: impl Into<String>) -> Self {
        self.advertise = Some(advertise.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_register_ttl(mut self, ttl: Duration) -> Self {
        self.register_ttl = ttl;
        self
    }

    pub fn with_register_interval(mut self, interval: Duration) -> Self {
        self.register_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn with_tls_files(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsOptions {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        });
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Humantime (`"30s"`, `"1m 30s"`) form for `Duration` fields.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    /// # Errors
    /// Never fails for well-formed serializers.
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*d))
    }

    /// # Errors
    /// Returns a deserialization error when the string is not a humantime duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(raw.trim()).map_err(D::Error::custom)
    }
}
