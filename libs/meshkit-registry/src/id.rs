//! Instance and node identifiers.

use uuid::Uuid;

/// Fresh process-local instance identifier.
///
/// Time-ordered (`UUIDv7`) so ids from one host sort by start time; unique at
/// single-process granularity, not meant as a secret.
#[must_use]
pub fn new_instance_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Node id in the `<serviceName>-<instanceId>` format.
#[must_use]
pub fn node_id(service: &str, instance_id: &str) -> String {
    format!("{service}-{instance_id}")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_are_unique_and_compact() {
        let a = new_instance_id();
        let b = new_instance_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn node_id_joins_service_and_instance() {
        assert_eq!(node_id("srv.hello", "42"), "srv.hello-42");
    }
}
