//! Error Handling Module
//!
//! One error type covers the whole library: builder failures, body
//! encoding, transport faults, validation verdicts, and stub engine
//! misses. Transport faults carry a [`TransportErrorKind`] so the
//! validator chain can tell transient network conditions from hard
//! failures. JSON failures convert to [`Error::BodyEncoding`] by
//! default; typed response decoding re-classifies them as
//! [`Error::ObjectDecode`].

use std::path::PathBuf;

/// Classification of low-level transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request did not complete within its timeout.
    TimedOut,
    /// The host could not be resolved.
    CannotFindHost,
    /// The connection could not be established.
    CannotConnect,
    /// The connection dropped mid-exchange.
    ConnectionLost,
    /// DNS resolution failed.
    DnsFailure,
    /// Anything else the engine reported.
    Other,
}

impl TransportErrorKind {
    /// Transient conditions that are worth retrying.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Library error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The composed URL is not absolute or not parseable.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A request parameter cannot be encoded or conflicts with the body.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Body serialization failed.
    #[error("body encoding failed: {0}")]
    BodyEncoding(String),

    /// A multipart part references a file that cannot be read.
    #[error("multipart part file is not readable: {0}")]
    MultipartInvalidFile(PathBuf),

    /// A multipart string part is not representable in the target encoding.
    #[error("multipart string part could not be encoded: {0}")]
    MultipartStringEncoding(String),

    /// The response body was empty and empty bodies are disallowed.
    #[error("response body is empty")]
    EmptyResponse,

    /// The response is structurally unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Typed decoding of the response body failed.
    #[error("failed to decode response object: {0}")]
    ObjectDecode(String),

    /// The retry budget is exhausted.
    #[error("maximum retry attempts reached")]
    MaxRetryAttemptsReached,

    /// The underlying session is unusable.
    #[error("session error: {0}")]
    Session(String),

    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The stub engine runs opt-out and no rule matched.
    #[error("no stub matched request to {0}")]
    StubNotFound(String),

    /// The transport reported a failure.
    #[error("transport error: {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// TLS trust evaluation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The redirect hop limit was exceeded.
    #[error("too many redirects")]
    TooManyRedirects,

    /// Filesystem failure while spooling or streaming a body.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Build a transport error, classifying the engine failure.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Whether this error describes a transient network condition the
    /// default validator treats as retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { kind, .. } if kind.is_transient())
    }

    /// Whether the error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::BodyEncoding(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = classify_reqwest_error(&err);
        Self::Transport {
            kind,
            message: err.to_string(),
        }
    }
}

/// Map a `reqwest` failure onto the transport taxonomy.
///
/// `reqwest` folds DNS and TCP failures into its connect error; the error
/// message is inspected to keep resolution failures distinguishable.
fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::TimedOut;
    }
    let message = err.to_string().to_ascii_lowercase();
    if err.is_connect() {
        if message.contains("dns") {
            return TransportErrorKind::DnsFailure;
        }
        if message.contains("resolve") || message.contains("lookup") {
            return TransportErrorKind::CannotFindHost;
        }
        return TransportErrorKind::CannotConnect;
    }
    if err.is_body() || err.is_request() {
        if message.contains("connection reset")
            || message.contains("broken pipe")
            || message.contains("connection closed")
        {
            return TransportErrorKind::ConnectionLost;
        }
    }
    TransportErrorKind::Other
}
