//! Error types shared by the adapter and the store clients

use thiserror::Error;

/// Failures reported by a store client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("service error {code}: {message}")]
    Service { code: i64, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::DocumentNotFound(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

/// Errors surfaced by [`crate::adapter::CouchbaseStore`] operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Rejected by the cacheability policy before the store was touched.
    #[error("\"{0}\" is not a cacheable value")]
    NotCacheable(String),
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
    #[error("cache key must not be empty")]
    EmptyKey,
    /// The ttl, in minutes, ends past the latest expiry the store can hold.
    #[error("ttl of {0} minutes is beyond the maximum expiry")]
    InvalidTtl(u64),
    #[error("failed to serialize value: {0}")]
    Serialization(String),
    /// Cluster, bucket or collection could not be resolved.
    #[error("failed to connect: {0}")]
    Connection(#[source] ClientError),
    /// A read, write, query or flush failed after the connection was established.
    #[error(transparent)]
    Operation(ClientError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_cacheable_message() {
        let err = StoreError::NotCacheable("null".to_string());
        assert_eq!(err.to_string(), "\"null\" is not a cacheable value");
    }

    #[test]
    fn test_operation_error_keeps_store_message() {
        let err = StoreError::Operation(ClientError::Transport("Something went wrong".into()));
        assert_eq!(err.to_string(), "transport error: Something went wrong");
    }

    #[test]
    fn test_invalid_ttl_message() {
        let err = StoreError::InvalidTtl(u64::MAX);
        assert_eq!(
            err.to_string(),
            format!("ttl of {} minutes is beyond the maximum expiry", u64::MAX)
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(ClientError::DocumentNotFound("foo".into()).is_not_found());
        assert!(!ClientError::Decode("bad".into()).is_not_found());
    }
}
