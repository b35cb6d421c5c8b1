//! Errors returned by registry backends.

/// Failure of a registry operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The requested service is unknown to the backend.
    #[error("service not found: {0}")]
    NotFound(String),

    /// The backend could not be reached or refused the request.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// The record handed to the backend is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend does not implement the requested capability.
    #[error("operation not supported by this registry: {0}")]
    Unsupported(&'static str),
}

impl RegistryError {
    /// Whether a caller may reasonably retry the operation later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
