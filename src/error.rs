/// Unified error handling for the faro routing core
///
/// Splits failures into two layers: `TransportError` for anything the
/// underlying connection primitive reports, and `Error` for everything the
/// routing layers can surface to a caller. Unsuccessful HTTP responses are
/// NOT errors at the pool or router layer; they become `Error::Http` only
/// when the caller evaluates the response body.
use serde_json::Value;
use std::io;
use thiserror::Error;

/// Errors reported by the connection primitive itself.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure (refused, reset, aborted, timed out).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer answered with something that is not a parseable response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    /// Whether this is a connection reset observed while receiving.
    ///
    /// A reset on a pooled connection is indeterminate: the server may have
    /// torn the connection down before or after reading the request, so the
    /// broadcast pipeline resends instead of surfacing it.
    pub fn is_reset(&self) -> bool {
        matches!(self, TransportError::Io(e) if e.kind() == io::ErrorKind::ConnectionReset)
    }

    /// Whether the host should be considered unreachable.
    ///
    /// Unreachable errors drive failure marks and replica failover; a
    /// malformed response is a server bug, not a routing signal, and must
    /// propagate unchanged.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TransportError::Io(_))
    }
}

/// Main error type for faro routing operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure that no routing layer could recover.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Every candidate host carried a failure mark.
    #[error("no eligible hosts among {candidates} candidates")]
    NoEligibleHosts { candidates: usize },

    /// A key was routed that the shard index does not know.
    #[error("unknown shard key: {key}")]
    UnknownKey { key: String },

    /// The replica set's ordered host list emptied out.
    #[error("replica hosts exhausted")]
    HostsExhausted,

    /// A completed but unsuccessful response, raised by body evaluation.
    #[error("http error: {status} {reason}")]
    Http {
        status: u16,
        reason: String,
        body: Value,
    },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A redirect pointed at a host other than the one contacted.
    #[error("redirect to foreign host: {location}")]
    ForeignRedirect { location: String },

    /// Response body was not valid JSON despite a json content type.
    #[error("body decode error: {0}")]
    BodyDecode(#[from] serde_json::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for faro operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an unknown-key error
    pub fn unknown_key<S: Into<String>>(key: S) -> Self {
        Error::UnknownKey { key: key.into() }
    }

    /// Create a foreign-redirect error
    pub fn foreign_redirect<S: Into<String>>(location: S) -> Self {
        Error::ForeignRedirect {
            location: location.into(),
        }
    }

    /// Check if this error is recoverable by retrying another host
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_unreachable(),
            Error::Http { .. } => true,
            _ => false,
        }
    }
}
