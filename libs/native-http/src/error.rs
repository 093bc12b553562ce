use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type used by body streams and the connection stack.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL scheme is neither `http` nor `https`
    UnsupportedScheme,
}

/// Transport error types
///
/// Every failure in the request/response pipeline is reported through this
/// enum. Nothing in this crate retries automatically; callers decide whether
/// a [`HttpError::Connection`] or [`HttpError::Timeout`] is worth another try.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Invalid URL (failed to parse or unusable for HTTP)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// HTTP method outside of GET, HEAD, POST, PUT, PATCH, DELETE
    #[error("Unsupported HTTP method '{0}'")]
    InvalidMethod(String),

    /// Inbound call options did not match the expected shape
    #[error("Invalid options: {0}")]
    InvalidOptions(#[source] serde_json::Error),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// DNS, TCP or TLS handshake failure while opening the connection
    #[error("Connection to '{url}' failed: {source}")]
    Connection {
        /// Target URL of the failed connection
        url: String,
        #[source]
        source: BoxError,
    },

    /// Connect or read timeout elapsed
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error after the connection was established
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// Request payload could not be encoded for the declared content type
    #[error("Body encoding failed: {0}")]
    BodyEncoding(String),

    /// Response body could not be decoded under the requested or declared type
    ///
    /// Status, headers and the raw body are preserved so the caller keeps
    /// whatever the server did return.
    #[error("Malformed response body from '{url}' (HTTP {status})")]
    MalformedResponseBody {
        status: u16,
        headers: BTreeMap<String, String>,
        url: String,
        body: String,
    },

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// HTTP 4xx/5xx where a success body was required (file download)
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
    },

    /// TLS trust configuration could not be applied
    #[error("Trust configuration failed: {0}")]
    TrustConfiguration(String),

    /// Write attempted on a multipart encoder after `finish()`
    #[error("Multipart encoder is already finished")]
    ClosedEncoder,

    /// File access refused by the path resolver
    #[error("Permission denied for '{}'", .0.display())]
    PermissionDenied(PathBuf),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HttpError {
    /// Build an [`HttpError::InvalidUrl`] for `url`.
    pub(crate) fn invalid_url(
        url: impl Into<String>,
        kind: InvalidUriKind,
        reason: impl ToString,
    ) -> Self {
        HttpError::InvalidUrl {
            url: url.into(),
            kind,
            reason: reason.to_string(),
        }
    }

    /// Classify a client error raised for `url`.
    ///
    /// Failures while establishing the connection (DNS, TCP, TLS) become
    /// [`HttpError::Connection`]; everything else is a [`HttpError::Transport`].
    pub(crate) fn from_client(url: &str, err: hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            HttpError::Connection {
                url: url.to_owned(),
                source: Box::new(err),
            }
        } else {
            HttpError::Transport(Box::new(err))
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
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
    fn test_connection_error_preserves_source() {
        let err = HttpError::Connection {
            url: "https://example.com".to_owned(),
            source: Box::new(TestError("connection refused")),
        };

        let source = err.source().unwrap();
        let downcast = source.downcast_ref::<TestError>();
        assert_eq!(downcast.unwrap().0, "connection refused");
        assert!(err.to_string().contains("https://example.com"));
    }

    #[test]
    fn test_transport_error_chain_traversal() {
        let err = HttpError::Transport(Box::new(TestError("root cause")));

        let mut count = 0;
        let mut current: Option<&(dyn Error + 'static)> = Some(&err);
        while let Some(e) = current {
            count += 1;
            current = e.source();
        }

        assert_eq!(
            count, 2,
            "Should have 2 errors in chain: HttpError and TestError"
        );
    }

    #[test]
    fn test_invalid_url_helper() {
        let err = HttpError::invalid_url("nope", InvalidUriKind::ParseError, "relative URL");
        match err {
            HttpError::InvalidUrl { url, kind, reason } => {
                assert_eq!(url, "nope");
                assert_eq!(kind, InvalidUriKind::ParseError);
                assert_eq!(reason, "relative URL");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_body_keeps_status() {
        let err = HttpError::MalformedResponseBody {
            status: 502,
            headers: BTreeMap::new(),
            url: "https://example.com/api".to_owned(),
            body: "<html>".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed response body from 'https://example.com/api' (HTTP 502)"
        );
    }
}
