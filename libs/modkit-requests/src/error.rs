use crate::response::Response;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Classification of URL assembly failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
///
/// # Example
///
/// ```ignore
/// match &err {
///     HttpError::Assembly { kind, .. } => match kind {
///         InvalidUriKind::ParseError => println!("Malformed URL syntax"),
///         InvalidUriKind::MissingAuthority => println!("URL needs a host"),
///         InvalidUriKind::MissingScheme => println!("URL needs http:// or https://"),
///         _ => println!("Other URI error"),
///     },
///     _ => {}
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
    /// URL scheme is neither `http` nor `https`
    UnsupportedScheme,
}

/// Errors produced while assembling, sending or unwrapping a request
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// The request URL (base URL plus path segments and query) is malformed
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    Assembly {
        /// The URL that failed to assemble
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// The configured method is not a valid HTTP token
    #[error("Invalid method: {0}")]
    InvalidMethod(#[from] http::method::InvalidMethod),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request body could not be serialized to JSON
    #[error("Body encoding failed: {0}")]
    Encoding(#[source] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Proxy address uses a scheme other than http, https, socks4 or socks5
    #[error("Unsupported proxy scheme: '{scheme}'")]
    UnsupportedProxyScheme {
        /// The rejected scheme
        scheme: String,
    },

    /// Proxy address is empty
    #[error("Empty proxy address")]
    EmptyProxy,

    /// Proxy address could not be parsed
    #[error("Invalid proxy address '{address}': {reason}")]
    InvalidProxy {
        /// The address that failed to parse
        address: String,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Dial, TLS handshake or round-trip failure
    #[error("Network error: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS configuration error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The caller canceled the call
    #[error("Request canceled")]
    Canceled,

    /// The caller-supplied deadline passed before the call completed
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The per-call timeout elapsed (covers connect, send and body read)
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Reading the response body stream failed
    #[error("Body read failed: {0}")]
    Body(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body could not be decoded into the requested shape
    #[error("JSON decoding failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// Filesystem failure (download or upload)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request buffer is full (fail-fast)
    #[error("Service overloaded: request buffer is full")]
    Overloaded,

    /// Internal service failure (buffer worker died, channel closed)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,
}

impl HttpError {
    /// Whether the call was interrupted by cancellation, a deadline or a timeout
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::DeadlineExceeded(_) | Self::Timeout(_)
        )
    }

    /// Whether the error was raised before any network attempt
    #[must_use]
    pub fn is_assembly(&self) -> bool {
        matches!(
            self,
            Self::Assembly { .. }
                | Self::InvalidMethod(_)
                | Self::RequestBuild(_)
                | Self::InvalidHeaderName(_)
                | Self::InvalidHeaderValue(_)
                | Self::Encoding(_)
                | Self::FormEncode(_)
        )
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Network(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Network(Box::new(err))
    }
}

/// Failure of [`Session::execute`](crate::Session::execute).
///
/// Carries the typed error together with the partially populated
/// [`Response`], so request-side details and elapsed time stay
/// inspectable after a failed call. The wrapper reports the same error
/// through [`Response::error`].
#[derive(Debug)]
pub struct ExecuteError {
    error: Arc<HttpError>,
    response: Box<Response>,
}

impl ExecuteError {
    pub(crate) fn new(error: Arc<HttpError>, response: Response) -> Self {
        Self {
            error,
            response: Box::new(response),
        }
    }

    /// The typed failure
    #[must_use]
    pub fn error(&self) -> &HttpError {
        &self.error
    }

    /// The partially populated response wrapper
    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Consume the error and return the response wrapper
    #[must_use]
    pub fn into_response(self) -> Response {
        *self.response
    }
}

impl std::fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for ExecuteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_network_error_preserves_source() {
        let err = HttpError::Network(Box::new(TestError("connection refused")));

        let source = err.source().expect("network error should have a source");
        let downcast = source.downcast_ref::<TestError>();
        assert_eq!(downcast.map(|e| e.0), Some("connection refused"));
    }

    #[test]
    fn test_error_chain_traversal() {
        let err = HttpError::Network(Box::new(TestError("root cause")));

        let mut count = 0;
        let mut current: Option<&(dyn Error + 'static)> = Some(&err);
        while let Some(e) = current {
            count += 1;
            current = e.source();
        }

        assert_eq!(count, 2, "chain should be HttpError -> TestError");
    }

    #[test]
    fn test_interrupted_classification() {
        assert!(HttpError::Canceled.is_interrupted());
        assert!(HttpError::Timeout(Duration::from_secs(1)).is_interrupted());
        assert!(HttpError::DeadlineExceeded(Duration::from_secs(1)).is_interrupted());
        assert!(!HttpError::EmptyProxy.is_interrupted());
    }

    #[test]
    fn test_assembly_classification() {
        let err = HttpError::Assembly {
            url: "::".to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: "bad".to_owned(),
        };
        assert!(err.is_assembly());
        assert!(!HttpError::Canceled.is_assembly());
        assert!(!HttpError::Network(Box::new(TestError("x"))).is_assembly());
    }

    #[test]
    fn test_unsupported_proxy_scheme_message() {
        let err = HttpError::UnsupportedProxyScheme {
            scheme: "ftp".to_owned(),
        };
        assert_eq!(err.to_string(), "Unsupported proxy scheme: 'ftp'");
    }
}
