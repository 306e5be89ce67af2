//! Common error types for ShareGraph.

use thiserror::Error;

/// Top-level error type for ShareGraph operations.
///
/// Variants fall in three groups: failures that abort construction of the
/// token lifecycle (`StoreUnreachable`, `AuthorizationFailed`,
/// `TokenAcquisitionFailed`, `InvalidConfig`), stored-token failures that are
/// recovered by re-authorizing (`TokenUnavailable`, `CorruptToken`,
/// `TokenNotFound`), and per-call failures surfaced after a session is ready.
#[derive(Debug, Error)]
pub enum Error {
    /// The token store could not be reached while it was being set up.
    #[error("Token store unreachable: {0}")]
    StoreUnreachable(String),

    /// No usable token could be read from the store.
    #[error("Token unavailable: {0}")]
    TokenUnavailable(String),

    /// The stored token could not be parsed.
    #[error("Corrupt token: {0}")]
    CorruptToken(String),

    /// The key-value slot is absent or does not hold a token.
    #[error("Token not found: {0}")]
    TokenNotFound(String),

    /// The authorization-code exchange was rejected or malformed.
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Bootstrapping a fresh token failed; the process must be restarted.
    #[error("Token could not be obtained: {0}")]
    TokenAcquisitionFailed(String),

    /// Refreshing an expired token, or persisting the refreshed token, failed.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The requested drive name is not part of the resolved site.
    #[error("Drive not found: {0}")]
    DriveNotFound(String),

    /// A navigation call requires a site that has not been resolved yet.
    #[error("No site selected; resolve a site first")]
    NoSiteSelected,

    /// A navigation call requires a drive that has not been selected yet.
    #[error("No drive selected; select a drive first")]
    NoDriveSelected,

    /// The remote API answered with a non-success status.
    #[error("Remote call failed with HTTP {status}: {url}")]
    RemoteCallFailed {
        /// HTTP status code returned by the remote API.
        status: u16,
        /// URL that was requested.
        url: String,
    },

    /// The remote API answered successfully but the body was not understood.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Transport-level failure (connection refused, TLS, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration is missing a key or combines incompatible options.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error means "no usable stored token" and should be
    /// answered by running a fresh authorization instead of aborting.
    pub fn is_recoverable_token_error(&self) -> bool {
        matches!(
            self,
            Error::TokenUnavailable(_) | Error::CorruptToken(_) | Error::TokenNotFound(_)
        )
    }

    /// HTTP status carried by a failed remote call, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RemoteCallFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
