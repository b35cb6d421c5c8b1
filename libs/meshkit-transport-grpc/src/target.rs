//! `<scheme>:///<service>` dial targets.

use std::fmt;
use std::str::FromStr;

/// Malformed dial target.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("target '{0}' has no scheme, expected <scheme>:///<service>")]
    MissingScheme(String),
    #[error("target '{0}' names no service")]
    MissingService(String),
}

/// Parsed dial target. The authority part is accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub scheme: String,
    pub service: String,
}

impl Target {
    #[must_use]
    pub fn new(scheme: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            service: service.into(),
        }
    }

    /// Parse `scheme:///service` (or `scheme://authority/service`).
    ///
    /// # Errors
    /// [`TargetError`] when the scheme or the service name is missing.
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let (scheme, rest) = raw
            .split_once("://")
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| TargetError::MissingScheme(raw.to_owned()))?;
        let service = rest
            .split_once('/')
            .map_or("", |(_authority, path)| path)
            .trim_matches('/');
        if service.is_empty() {
            return Err(TargetError::MissingService(raw.to_owned()));
        }
        Ok(Self::new(scheme, service))
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:///{}", self.scheme, self.service)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_and_service() {
        let t = Target::parse("memory:///greeter").unwrap();
        assert_eq!(t, Target::new("memory", "greeter"));
        assert_eq!(t.to_string(), "memory:///greeter");
    }

    #[test]
    fn authority_is_ignored() {
        let t: Target = "etcd://cluster-a/orders.v1".parse().unwrap();
        assert_eq!(t.scheme, "etcd");
        assert_eq!(t.service, "orders.v1");
    }

    #[test]
    fn rejects_incomplete_targets() {
        assert!(matches!(
            Target::parse("greeter"),
            Err(TargetError::MissingScheme(_))
        ));
        assert!(matches!(
            Target::parse(":///greeter"),
            Err(TargetError::MissingScheme(_))
        ));
        assert!(matches!(
            Target::parse("memory:///"),
            Err(TargetError::MissingService(_))
        ));
        assert!(matches!(
            Target::parse("memory://host"),
            Err(TargetError::MissingService(_))
        ));
    }
}
