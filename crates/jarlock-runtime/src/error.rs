//! Runtime error types.

use jarlock_core::PolicyError;

/// A validation request that did not produce an answer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("server answered HTTP {0}")]
    Status(u16),

    #[error("unreadable response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

/// Errors from the record operations of the in-memory authority.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    #[error("unknown product {0:?}")]
    UnknownProduct(String),

    #[error("unknown tier {0:?}")]
    UnknownTier(String),

    #[error("tier {tier:?} does not belong to product {product:?}")]
    TierProductMismatch { tier: String, product: String },

    #[error("unknown license {0:?}")]
    UnknownLicense(String),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

/// Failure to build a license client from its configuration.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("license configuration {path:?} not readable: {source}")]
    Resource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("HTTP client setup failed: {0}")]
    Http(String),
}
