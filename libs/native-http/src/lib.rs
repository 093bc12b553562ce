#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport core for native app bridges
//!
//! This crate turns loosely-typed request options into HTTP/1.1 exchanges:
//! - Query parameter merging with optional percent-encoding
//! - Request bodies encoded by `Content-Type` (JSON, form, streamed multipart)
//! - Response decoding into a JSON-friendly envelope (text, JSON or base64)
//! - Process-wide cookie jar consulted and updated on every redirect hop
//! - Switchable TLS trust policy (`default`, `legacy`, `nocheck`, `pinned`)
//! - File download and multipart upload with bounded memory
//! - **Transparent response decompression** (gzip, brotli, deflate)
//!
//! # Error Delivery
//!
//! 4xx/5xx responses with a body are not errors: they come back as a
//! [`ResponseEnvelope`] with `error = true`. Only invalid options, transport
//! failures, timeouts and decoding failures return [`HttpError`].
//!
//! # Example
//!
//! ```ignore
//! use native_http::{HttpOptions, HttpTransport, TrustMode};
//!
//! let transport = HttpTransport::new()?;
//! transport.trust().apply(TrustMode::Legacy, None)?;
//!
//! let options = HttpOptions::from_value(serde_json::json!({
//!     "url": "https://example.com/api/users",
//!     "method": "POST",
//!     "headers": {"Content-Type": "application/json"},
//!     "data": {"name": "Alice"},
//!     "responseType": "json"
//! }))?;
//!
//! let response = transport.request(&options).await?;
//! if response.error {
//!     // server answered 4xx/5xx; `response.data` holds its body
//! }
//! ```

mod body;
mod builder;
mod config;
mod cookies;
mod error;
mod files;
mod layers;
mod multipart;
mod options;
mod query;
mod request;
mod response;
mod tls;
mod transport;
mod trust;

pub use body::{BodyCodec, EncodedBody};
pub use builder::HttpTransportBuilder;
pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT,
    HttpMethod, ResponseType, TransportConfig,
};
pub use cookies::{CookieEntry, CookieExpiry, CookieJar, CookieStore, MemoryCookieStore};
pub use error::{BoxError, HttpError, InvalidUriKind};
pub use files::{Directory, PathResolver, PlatformPathResolver};
pub use layers::{
    CookieLayer, CookieService, RedirectPolicy, UserAgentLayer, UserAgentService,
};
pub use multipart::{BodySink, ChannelSink, MultipartEncoder};
pub use options::{
    CookieOptions, DownloadOptions, DownloadResult, HttpOptions, ParamValue, UploadOptions,
};
pub use query::QueryEncoder;
pub use request::{
    PreparedRequest, RequestBody, RequestBuilder, RequestDescriptor, empty_body, full_body,
};
pub use response::{
    ERROR_BODY_PREVIEW_LIMIT, ResponseBody, ResponseData, ResponseDecoder, ResponseEnvelope,
    flatten_headers, normalize_line_endings, parse_json,
};
pub use transport::HttpTransport;
pub use trust::{CertificateBundle, TlsSetup, TrustConfiguration, TrustMode, TrustPolicy};
