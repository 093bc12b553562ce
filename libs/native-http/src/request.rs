use crate::body::{BodyCodec, EncodedBody};
use crate::config::{HttpMethod, ResponseType, TransportConfig};
use crate::error::{BoxError, HttpError, InvalidUriKind};
use crate::options::{HttpOptions, ParamValue};
use crate::query::QueryEncoder;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http_body_util::{BodyExt, Empty, Full};
use indexmap::IndexMap;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Type-erased request body accepted by the connection stack.
pub type RequestBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Empty request body
#[must_use]
pub fn empty_body() -> RequestBody {
    Empty::<Bytes>::new().map_err(Into::into).boxed()
}

/// Request body holding `bytes`
#[must_use]
pub fn full_body(bytes: Bytes) -> RequestBody {
    Full::new(bytes).map_err(Into::into).boxed()
}

/// Immutable description of one request.
///
/// Built once per call, usually from [`HttpOptions`]. Headers use
/// case-insensitive names and the last write for a name wins.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: HttpMethod,
    url: Url,
    headers: HeaderMap,
    params: IndexMap<String, ParamValue>,
    body: Option<Value>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    response_type: ResponseType,
    encode_params: bool,
}

impl RequestDescriptor {
    /// Validate call options into a descriptor.
    ///
    /// A missing method means GET.
    ///
    /// # Errors
    /// - `HttpError::InvalidUrl` if the URL does not parse
    /// - `HttpError::InvalidMethod` for verbs outside GET/HEAD/POST/PUT/PATCH/DELETE
    /// - `HttpError::InvalidHeaderName` / `InvalidHeaderValue` for unusable headers
    pub fn from_options(options: &HttpOptions) -> Result<Self, HttpError> {
        let method = match options.method.as_deref() {
            None => HttpMethod::Get,
            Some(m) => HttpMethod::parse(m).ok_or_else(|| HttpError::InvalidMethod(m.to_owned()))?,
        };
        Self::with_method(method, options)
    }

    /// Like [`from_options`](Self::from_options) with the method forced to `method`.
    ///
    /// # Errors
    /// Same as [`from_options`](Self::from_options), minus method validation.
    pub fn with_method(method: HttpMethod, options: &HttpOptions) -> Result<Self, HttpError> {
        let url = Url::parse(&options.url)
            .map_err(|e| HttpError::invalid_url(&options.url, InvalidUriKind::ParseError, e))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::try_from(name.as_str())?;
            let value = HeaderValue::try_from(value.as_str())?;
            headers.insert(name, value);
        }

        Ok(Self {
            method,
            url,
            headers,
            params: options.params.clone(),
            body: options.data.clone(),
            connect_timeout: options.connect_timeout.map(Duration::from_millis),
            read_timeout: options.read_timeout.map(Duration::from_millis),
            response_type: options.response_type,
            encode_params: options.should_encode_url_params.unwrap_or(true),
        })
    }

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn params(&self) -> &IndexMap<String, ParamValue> {
        &self.params
    }

    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    #[must_use]
    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }
}

/// A request ready to be handed to the connection layer.
#[derive(Debug)]
pub struct PreparedRequest {
    pub(crate) method: HttpMethod,
    pub(crate) url: Url,
    pub(crate) uri: http::Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: EncodedBody,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) response_type: ResponseType,
}

impl PreparedRequest {
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Target URL after query merging
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &EncodedBody {
        &self.body
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    #[must_use]
    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// Replace the `Content-Type` header (multipart bodies announce their boundary here).
    pub(crate) fn set_content_type(&mut self, content_type: &str) -> Result<(), HttpError> {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::try_from(content_type)?);
        Ok(())
    }

    /// Assemble the wire request around `body`.
    pub(crate) fn to_http(&self, body: RequestBody) -> Result<http::Request<RequestBody>, HttpError> {
        let mut request = http::Request::builder()
            .method(http::Method::from(self.method))
            .uri(self.uri.clone())
            .body(body)?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

/// Turns a [`RequestDescriptor`] into a [`PreparedRequest`].
///
/// Steps, in order: merge query parameters, validate the target, pick the
/// method, resolve timeouts, apply headers, and encode the body for
/// mutating methods. Body encoding failures abort before anything is sent.
pub struct RequestBuilder<'a> {
    config: &'a TransportConfig,
}

impl<'a> RequestBuilder<'a> {
    #[must_use]
    pub fn new(config: &'a TransportConfig) -> Self {
        Self { config }
    }

    /// Prepare `descriptor` for sending.
    ///
    /// # Errors
    /// - `HttpError::InvalidUrl` if the target is not an absolute http(s) URL
    /// - `HttpError::BodyEncoding` if the payload does not fit the declared content type
    pub fn build(&self, descriptor: &RequestDescriptor) -> Result<PreparedRequest, HttpError> {
        let url = QueryEncoder::new(descriptor.encode_params)
            .append(descriptor.url(), descriptor.params());
        let uri = validate_url(&url)?;

        let connect_timeout = descriptor
            .connect_timeout()
            .or(self.config.connect_timeout);
        let read_timeout = descriptor.read_timeout().or(self.config.read_timeout);

        let headers = descriptor.headers().clone();

        let body = match descriptor.body() {
            Some(payload) if descriptor.method().is_mutating() => {
                let content_type = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok());
                BodyCodec::encode(content_type, payload)?
            }
            Some(_) => {
                tracing::debug!(
                    method = descriptor.method().as_str(),
                    url = %url,
                    "ignoring request body for non-mutating method"
                );
                EncodedBody::Empty
            }
            None => EncodedBody::Empty,
        };

        Ok(PreparedRequest {
            method: descriptor.method(),
            url,
            uri,
            headers,
            body,
            connect_timeout,
            read_timeout,
            response_type: descriptor.response_type(),
        })
    }
}

/// Validate the URL as an `http::Uri` usable by the connector.
fn validate_url(url: &Url) -> Result<http::Uri, HttpError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(HttpError::invalid_url(
                url.as_str(),
                InvalidUriKind::UnsupportedScheme,
                format!("scheme '{scheme}' is not http or https"),
            ));
        }
    }

    let uri: http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: http::uri::InvalidUri| {
            HttpError::invalid_url(url.as_str(), InvalidUriKind::ParseError, e)
        })?;

    if uri.authority().is_none() {
        return Err(HttpError::invalid_url(
            url.as_str(),
            InvalidUriKind::MissingAuthority,
            "missing host/authority",
        ));
    }

    Ok(uri)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> HttpOptions {
        HttpOptions::from_value(value).unwrap()
    }

    fn build(value: Value) -> Result<PreparedRequest, HttpError> {
        let config = TransportConfig::default();
        let descriptor = RequestDescriptor::from_options(&options(value))?;
        RequestBuilder::new(&config).build(&descriptor)
    }

    #[test]
    fn test_descriptor_defaults_to_get() {
        let descriptor =
            RequestDescriptor::from_options(&options(json!({"url": "https://example.com"})))
                .unwrap();
        assert_eq!(descriptor.method(), HttpMethod::Get);
        assert_eq!(descriptor.response_type(), ResponseType::Text);
        assert!(descriptor.body().is_none());
    }

    #[test]
    fn test_descriptor_rejects_unknown_method() {
        let err = RequestDescriptor::from_options(&options(json!({
            "url": "https://example.com",
            "method": "TRACE"
        })))
        .unwrap_err();
        assert!(matches!(err, HttpError::InvalidMethod(m) if m == "TRACE"));
    }

    #[test]
    fn test_descriptor_rejects_malformed_url() {
        let err = RequestDescriptor::from_options(&options(json!({"url": "not a url"})))
            .unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUrl {
                kind: InvalidUriKind::ParseError,
                ..
            }
        ));
    }

    #[test]
    fn test_headers_case_insensitive_last_wins() {
        let descriptor = RequestDescriptor::from_options(&options(json!({
            "url": "https://example.com",
            "headers": {"X-Token": "first", "x-token": "second"}
        })))
        .unwrap();
        assert_eq!(descriptor.headers().len(), 1);
        assert_eq!(descriptor.headers()["x-token"], "second");
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let err = RequestDescriptor::from_options(&options(json!({
            "url": "https://example.com",
            "headers": {"x-bad": "line\nbreak"}
        })))
        .unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeaderValue(_)));
    }

    #[test]
    fn test_build_merges_params() {
        let prepared = build(json!({
            "url": "https://example.com/items?sort=asc",
            "params": {"id": ["1", "2"]}
        }))
        .unwrap();
        assert_eq!(
            prepared.url().as_str(),
            "https://example.com/items?sort=asc&id=1&id=2"
        );
    }

    #[test]
    fn test_params_keep_caller_order() {
        let prepared = build(json!({
            "url": "https://example.com/items",
            "params": {"zone": "eu", "after": "10", "limit": "5"}
        }))
        .unwrap();
        assert_eq!(prepared.url().query(), Some("zone=eu&after=10&limit=5"));
    }

    #[test]
    fn test_build_rejects_non_http_scheme() {
        let err = build(json!({"url": "ftp://example.com/file"})).unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUrl {
                kind: InvalidUriKind::UnsupportedScheme,
                ..
            }
        ));
    }

    #[test]
    fn test_get_never_carries_body() {
        let prepared = build(json!({
            "url": "https://example.com",
            "method": "GET",
            "headers": {"Content-Type": "application/json"},
            "data": {"a": 1}
        }))
        .unwrap();
        assert_eq!(prepared.body(), &EncodedBody::Empty);

        let prepared = build(json!({
            "url": "https://example.com",
            "method": "HEAD",
            "headers": {"Content-Type": "application/json"},
            "data": {"a": 1}
        }))
        .unwrap();
        assert_eq!(prepared.body(), &EncodedBody::Empty);
    }

    #[test]
    fn test_post_json_body() {
        let prepared = build(json!({
            "url": "https://example.com",
            "method": "POST",
            "headers": {"content-type": "application/json"},
            "data": {"a": 1}
        }))
        .unwrap();
        assert_eq!(
            prepared.body(),
            &EncodedBody::Bytes(Bytes::from_static(b"{\"a\":1}"))
        );
    }

    #[test]
    fn test_body_encoding_error_aborts_build() {
        let err = build(json!({
            "url": "https://example.com",
            "method": "PUT",
            "headers": {"Content-Type": "application/x-www-form-urlencoded"},
            "data": "not an object"
        }))
        .unwrap_err();
        assert!(matches!(err, HttpError::BodyEncoding(_)));
    }

    #[test]
    fn test_timeouts_resolved() {
        let config = TransportConfig {
            connect_timeout: Some(Duration::from_secs(30)),
            read_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let descriptor = RequestDescriptor::from_options(&options(json!({
            "url": "https://example.com",
            "readTimeout": 250
        })))
        .unwrap();
        let prepared = RequestBuilder::new(&config).build(&descriptor).unwrap();
        assert_eq!(prepared.connect_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(prepared.read_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_to_http_request() {
        let mut prepared = build(json!({
            "url": "http://localhost:8080/upload",
            "method": "patch",
            "headers": {"X-Id": "7"}
        }))
        .unwrap();
        prepared
            .set_content_type("multipart/form-data; boundary=abc")
            .unwrap();

        let request = prepared.to_http(empty_body()).unwrap();
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(request.uri(), "http://localhost:8080/upload");
        assert_eq!(request.headers()["x-id"], "7");
        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "multipart/form-data; boundary=abc"
        );
    }
}
