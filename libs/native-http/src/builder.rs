use crate::config::TransportConfig;
use crate::cookies::CookieJar;
use crate::error::HttpError;
use crate::files::{PathResolver, PlatformPathResolver};
use crate::layers::UserAgentLayer;
use crate::response::ResponseBody;
use crate::tls;
use crate::transport::HttpTransport;
use crate::trust::{TlsSetup, TrustConfiguration, TrustPolicy};
use bytes::Bytes;
use http::Response;
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing an [`HttpTransport`].
///
/// Without explicit collaborators the transport uses the process-wide
/// [`TrustPolicy::shared`] and [`CookieJar::shared`], and resolves file
/// locations with [`PlatformPathResolver`].
pub struct HttpTransportBuilder {
    config: TransportConfig,
    trust: Option<Arc<TrustPolicy>>,
    cookies: Option<Arc<CookieJar>>,
    paths: Option<Arc<dyn PathResolver>>,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransportBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            config,
            trust: None,
            cookies: None,
            paths: None,
        }
    }

    /// Set the user agent sent when a request carries none
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the default connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the default read timeout
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of redirects followed; `0` disables following
    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    /// Set the maximum response body size
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn trust_policy(mut self, trust: Arc<TrustPolicy>) -> Self {
        self.trust = Some(trust);
        self
    }

    #[must_use]
    pub fn cookie_jar(mut self, cookies: Arc<CookieJar>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    /// Use a custom resolver for download and upload paths
    #[must_use]
    pub fn path_resolver(mut self, paths: Arc<dyn PathResolver>) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Build the transport
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the user agent is not a valid header value
    pub fn build(self) -> Result<HttpTransport, HttpError> {
        let user_agent = UserAgentLayer::try_new(&self.config.user_agent)?;

        Ok(HttpTransport {
            config: self.config,
            user_agent,
            trust: self.trust.unwrap_or_else(TrustPolicy::shared),
            cookies: self.cookies.unwrap_or_else(CookieJar::shared),
            paths: self
                .paths
                .unwrap_or_else(|| Arc::new(PlatformPathResolver::new())),
        })
    }
}

/// Build the HTTP/1.1 connector for one trust snapshot.
///
/// Plain `http://` stays allowed; every trust mode only governs TLS.
///
/// # Errors
///
/// Returns `HttpError::TrustConfiguration` if the built-in roots cannot be
/// combined with the crypto provider.
pub(crate) fn build_https_connector(
    trust: &TrustConfiguration,
    connect_timeout: Option<Duration>,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(connect_timeout);

    let builder = match &trust.tls {
        TlsSetup::BuiltIn => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::get_crypto_provider())
            .map_err(|e| HttpError::TrustConfiguration(e.to_string()))?,
        TlsSetup::Custom(config) => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config((**config).clone())
        }
    };

    Ok(builder.https_or_http().enable_http1().wrap_connector(http))
}

/// Map the decompression response to our boxed response body type.
pub(crate) fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT};
    use crate::trust::TrustMode;
    use http_body_util::Full;

    #[test]
    fn test_builder_default() {
        let builder = HttpTransportBuilder::new();
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(builder.config.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert!(builder.config.read_timeout.is_none());
        assert!(builder.trust.is_none());
    }

    #[test]
    fn test_builder_with_config() {
        let builder = HttpTransportBuilder::with_config(TransportConfig::minimal());
        assert_eq!(builder.config.read_timeout, Some(Duration::from_secs(10)));
        assert_eq!(builder.config.max_redirects, 0);
    }

    #[test]
    fn test_builder_setters() {
        let builder = HttpTransportBuilder::new()
            .user_agent("custom/1.0")
            .connect_timeout(Duration::from_secs(3))
            .read_timeout(Duration::from_secs(7))
            .max_redirects(2)
            .max_body_size(1024);
        assert_eq!(builder.config.user_agent, "custom/1.0");
        assert_eq!(builder.config.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(builder.config.read_timeout, Some(Duration::from_secs(7)));
        assert_eq!(builder.config.max_redirects, 2);
        assert_eq!(builder.config.max_body_size, 1024);
    }

    #[test]
    fn test_builder_build_invalid_user_agent() {
        let transport = HttpTransportBuilder::new()
            .user_agent("invalid\x00agent")
            .build();
        assert!(matches!(transport, Err(HttpError::InvalidHeaderValue(_))));
    }

    #[test]
    fn test_builder_uses_shared_defaults() {
        let transport = HttpTransportBuilder::new().build().unwrap();
        assert!(Arc::ptr_eq(transport.cookies(), &CookieJar::shared()));
        assert!(Arc::ptr_eq(transport.trust(), &TrustPolicy::shared()));
    }

    #[test]
    fn test_builder_injected_collaborators() {
        let jar = Arc::new(CookieJar::default());
        let trust = Arc::new(TrustPolicy::new());
        let transport = HttpTransportBuilder::new()
            .cookie_jar(Arc::clone(&jar))
            .trust_policy(Arc::clone(&trust))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(transport.cookies(), &jar));
        assert!(Arc::ptr_eq(transport.trust(), &trust));
    }

    #[tokio::test]
    async fn test_connector_for_every_mode() {
        let trust = TrustPolicy::new();
        trust.apply(TrustMode::Legacy, None).unwrap();
        assert!(build_https_connector(&trust.current(), None).is_ok());

        trust.apply(TrustMode::NoCheck, None).unwrap();
        assert!(build_https_connector(&trust.current(), Some(Duration::from_secs(1))).is_ok());
    }

    #[test]
    fn test_map_decompression_response_keeps_parts() {
        let response = Response::builder()
            .status(201)
            .header("x-test", "1")
            .body(Full::new(Bytes::from_static(b"hi")))
            .unwrap();
        let mapped = map_decompression_response(response);
        assert_eq!(mapped.status(), 201);
        assert_eq!(mapped.headers()["x-test"], "1");
    }
}
