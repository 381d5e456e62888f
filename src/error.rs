//! Error types for sockql operations.

use crate::token::AuthChallenge;
use thiserror::Error;

/// Result type alias using [`SockqlError`].
pub type Result<T> = std::result::Result<T, SockqlError>;

/// Errors that can occur while authenticating, connecting, or querying.
///
/// All errors implement `std::error::Error` and can be chained with `source()`.
/// Nothing inside the crate retries on these; use [`SockqlError::is_retryable`]
/// to decide whether re-running the whole query makes sense.
#[derive(Debug, Error)]
pub enum SockqlError {
    /// The trust chain could not produce a token or temporary credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(#[from] AuthError),

    /// Dial, signing, or handshake failure before a socket was established.
    #[error("connect to {url} failed: {message}")]
    ConnectFailed {
        /// Target URL without the signed query string
        url: String,
        /// Underlying failure
        message: String,
    },

    /// Socket error, or a send on a connection that had gone stale.
    #[error("transport error: {0}")]
    TransportError(String),

    /// A frame could not be decoded as a response message.
    #[error("protocol error: {reason}")]
    ProtocolError {
        /// What was wrong with the frame
        reason: String,
        /// Decoder error, if any
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The connection closed before the terminal message arrived.
    #[error("stream ended after {received} message(s) with {remaining} sub-batch(es) outstanding")]
    IncompleteStream {
        /// Messages decoded before the close
        received: usize,
        /// Countdown value when the close happened
        remaining: i64,
    },

    /// A value in the time column matched none of the accepted formats.
    #[error("value {value} in column {column} cannot be converted to date and time")]
    TimeParseError {
        /// Offending value, rendered as text
        value: String,
        /// Column holding the value
        column: String,
    },

    /// The service answered the query with an error message.
    #[error("query {request_id} rejected by service: {message}")]
    RemoteError {
        /// Correlation id of the failed request
        request_id: String,
        /// Message reported by the service
        message: String,
    },

    /// The caller's cancellation token fired mid-query.
    #[error("query cancelled")]
    Cancelled,

    /// Send attempted while the connection was not open.
    #[error("not connected")]
    NotConnected,

    /// Configuration is incomplete or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller-supplied input was rejected before any I/O.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Request signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures inside the credential chain.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No username/password available, or the provider rejected them.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The identity provider returned an error.
    #[error("{operation}: {message}")]
    Provider {
        /// Provider operation (initiate_auth, refresh, ...)
        operation: String,
        /// Provider message
        message: String,
    },

    /// An MFA or password-change challenge was issued and nobody answered it.
    #[error("challenge {0} requires an interactive responder")]
    ChallengeNotHandled(AuthChallenge),

    /// Provider response was missing a required field.
    #[error("provider response missing {0}")]
    MissingField(&'static str),

    /// Federated identity exchange failed.
    #[error("federated exchange ({step}): {message}")]
    Federation {
        /// `get_id` or `get_credentials`
        step: String,
        /// Provider message
        message: String,
    },
}

impl AuthError {
    /// Creates a provider error with the failing operation attached.
    pub fn provider(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Creates a federated exchange error.
    pub fn federation(step: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Federation {
            step: step.into(),
            message: message.to_string(),
        }
    }
}

/// Flat classification of [`SockqlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthFailed,
    ConnectFailed,
    TransportError,
    ProtocolError,
    IncompleteStream,
    TimeParseError,
    RemoteError,
    Cancelled,
    InvalidInput,
}

impl SockqlError {
    /// Creates a connect error, stripping any query string from the URL so
    /// signatures and session tokens never end up in error messages.
    pub fn connect_failed(url: &str, message: impl std::fmt::Display) -> Self {
        let url = url.split('?').next().unwrap_or(url).to_string();
        Self::ConnectFailed {
            url,
            message: message.to_string(),
        }
    }

    /// Returns the flat kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthFailed(_) => ErrorKind::AuthFailed,
            Self::ConnectFailed { .. } | Self::Signing(_) => ErrorKind::ConnectFailed,
            Self::TransportError(_) | Self::NotConnected => ErrorKind::TransportError,
            Self::ProtocolError { .. } | Self::Json(_) => ErrorKind::ProtocolError,
            Self::IncompleteStream { .. } => ErrorKind::IncompleteStream,
            Self::TimeParseError { .. } => ErrorKind::TimeParseError,
            Self::RemoteError { .. } => ErrorKind::RemoteError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidConfig(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Whether running the same query again could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectFailed | ErrorKind::TransportError | ErrorKind::IncompleteStream
        )
    }
}
