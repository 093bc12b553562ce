use serde::Deserialize;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("native-http/", env!("CARGO_PKG_VERSION"));

/// Default maximum response body size (100 MB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 100 * 1024 * 1024;

/// Fixed chunk size used when streaming files to and from the wire (8 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Default maximum number of redirects to follow
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// HTTP methods accepted by the transport.
///
/// GET and HEAD never carry a request body; the remaining verbs are
/// "mutating" and may.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parse a method name case-insensitively.
    ///
    /// Returns `None` for verbs outside the supported set.
    #[must_use]
    pub fn parse(method: &str) -> Option<Self> {
        match method.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Whether a request body may be attached for this method.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::Get | Self::Head)
    }

    /// Upper-case method name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl From<HttpMethod> for http::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Head => http::Method::HEAD,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

/// How the caller wants the response body handed back.
///
/// `ArrayBuffer` and `Blob` are both decoded as base64 text. A JSON
/// `Content-Type` on the response overrides whatever is requested here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[serde(alias = "array-buffer")]
    ArrayBuffer,
    Blob,
    Document,
    Json,
    #[default]
    Text,
}

impl ResponseType {
    /// Whether the body should be returned as base64-encoded bytes
    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(self, Self::ArrayBuffer | Self::Blob)
    }
}

/// Transport-wide configuration
///
/// Per-request timeouts supplied by the caller take precedence over the
/// defaults configured here. `None` means no timeout is enforced.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// User-Agent header sent when the caller does not supply one
    pub user_agent: String,

    /// Default connect timeout (default: none)
    pub connect_timeout: Option<Duration>,

    /// Default read timeout, applied to the response head and to every body frame (default: none)
    pub read_timeout: Option<Duration>,

    /// Maximum number of redirects to follow; `0` disables redirect following (default: 10)
    pub max_redirects: usize,

    /// Maximum buffered response body size in bytes (default: 100 MB)
    pub max_body_size: usize,

    /// Chunk size for streaming file uploads (default: 8 KB)
    pub chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout: None,
            read_timeout: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransportConfig {
    /// Minimal configuration: short default timeouts, no redirects
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(10)),
            max_redirects: 0,
            ..Default::default()
        }
    }

    /// Configuration for tests: bounded timeouts and a small body limit
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: Some(Duration::from_secs(5)),
            max_body_size: 1024 * 1024,
            ..Default::default()
        }
    }
}
