use crate::body::{BodyCodec, EncodedBody};
use crate::builder::{HttpTransportBuilder, build_https_connector, map_decompression_response};
use crate::config::{HttpMethod, TransportConfig};
use crate::cookies::CookieJar;
use crate::error::HttpError;
use crate::files::PathResolver;
use crate::layers::{CookieLayer, RedirectPolicy, UserAgentLayer};
use crate::multipart::{BodySink, ChannelSink, MultipartEncoder};
use crate::options::{DownloadOptions, DownloadResult, HttpOptions, UploadOptions};
use crate::request::{PreparedRequest, RequestBody, RequestBuilder, RequestDescriptor, empty_body, full_body};
use crate::response::{ResponseBody, ResponseDecoder, ResponseEnvelope, error_preview, next_frame};
use crate::trust::TrustPolicy;
use http::Response;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tower::util::BoxService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use tower_http::follow_redirect::FollowRedirectLayer;

/// Chunks buffered between the multipart writer and the connection
const MULTIPART_CHANNEL_DEPTH: usize = 4;

/// Type-erased connection stack built for one request.
type ConnectionService = BoxService<http::Request<RequestBody>, Response<ResponseBody>, HttpError>;

/// HTTP transport executing requests against the shared trust policy and cookie jar
///
/// Every request opens its own un-pooled HTTP/1.1 connection stack using the
/// trust snapshot current at that moment, so a [`TrustPolicy::apply`] takes
/// effect on the next request. Redirects are followed, compressed responses
/// are decoded, and cookies are read from and written to the jar on every hop.
///
/// # Example
///
/// ```ignore
/// use native_http::{HttpOptions, HttpTransport};
///
/// let transport = HttpTransport::builder()
///     .read_timeout(Duration::from_secs(30))
///     .build()?;
///
/// let options = HttpOptions::from_value(serde_json::json!({
///     "url": "https://api.example.com/items",
///     "params": {"page": "2"},
///     "responseType": "json"
/// }))?;
/// let response = transport.request(&options).await?;
/// ```
pub struct HttpTransport {
    pub(crate) config: TransportConfig,
    pub(crate) user_agent: UserAgentLayer,
    pub(crate) trust: Arc<TrustPolicy>,
    pub(crate) cookies: Arc<CookieJar>,
    pub(crate) paths: Arc<dyn PathResolver>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("trust", &self.trust)
            .finish_non_exhaustive()
    }
}

/// Multipart payload written while the request is in flight.
enum MultipartContent {
    Fields(Vec<(String, String)>),
    File {
        name: String,
        path: PathBuf,
        extras: Map<String, Value>,
    },
}

impl MultipartContent {
    async fn write<S: BodySink>(self, encoder: &mut MultipartEncoder<S>) -> Result<(), HttpError> {
        match self {
            Self::Fields(fields) => BodyCodec::write_multipart(encoder, &fields).await,
            Self::File { name, path, extras } => {
                encoder.add_file_part(&name, &path, &extras).await?;
                encoder.finish().await
            }
        }
    }
}

impl HttpTransport {
    /// Create a transport with default configuration and the shared jar/policy
    ///
    /// # Errors
    /// Returns an error if the configured user agent is not a valid header value
    pub fn new() -> Result<Self, HttpError> {
        HttpTransportBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Cookie jar read and written by this transport
    #[must_use]
    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.cookies
    }

    /// Trust policy consulted when opening connections
    #[must_use]
    pub fn trust(&self) -> &Arc<TrustPolicy> {
        &self.trust
    }

    /// Validate `options`, send the request and decode the response.
    ///
    /// 4xx/5xx responses with a body come back as `Ok` with `error = true`.
    ///
    /// # Errors
    /// Any [`HttpError`] from validation, encoding, the connection or decoding.
    pub async fn request(&self, options: &HttpOptions) -> Result<ResponseEnvelope, HttpError> {
        let descriptor = RequestDescriptor::from_options(options)?;
        self.execute(&descriptor).await
    }

    /// Send a prepared descriptor and decode the response.
    ///
    /// # Errors
    /// Any [`HttpError`] from encoding, the connection or decoding.
    pub async fn execute(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<ResponseEnvelope, HttpError> {
        let mut prepared = RequestBuilder::new(&self.config).build(descriptor)?;
        let response = self.dispatch(&mut prepared).await?;
        self.decode(response, &prepared).await
    }

    /// Download the response body of a request into a file.
    ///
    /// The body is streamed to disk as it arrives. On any failure the
    /// partially written file is removed.
    ///
    /// # Errors
    /// - `HttpError::PermissionDenied` if the path resolver refuses the target
    /// - `HttpError::HttpStatus` for 4xx/5xx responses
    /// - `HttpError::Io` if the file cannot be written
    pub async fn download_file(
        &self,
        options: &DownloadOptions,
    ) -> Result<DownloadResult, HttpError> {
        let path = self
            .paths
            .resolve(&options.file_path, options.file_directory)?;
        let descriptor = RequestDescriptor::from_options(&options.request)?;
        let mut prepared = RequestBuilder::new(&self.config).build(&descriptor)?;

        let response = self.dispatch(&mut prepared).await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body_preview = error_preview(response.into_body(), prepared.read_timeout).await?;
            return Err(HttpError::HttpStatus {
                status,
                body_preview,
            });
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        match write_body_to_file(response.into_body(), &path, prepared.read_timeout).await {
            Ok(written) => {
                tracing::debug!(path = %path.display(), bytes = written, "download complete");
                Ok(DownloadResult {
                    path: path.to_string_lossy().into_owned(),
                })
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    tracing::debug!(path = %path.display(), error = %rm, "failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    /// Upload a file as a `multipart/form-data` request.
    ///
    /// The method defaults to POST. The file part is named by
    /// [`UploadOptions::field_name`]; entries of `data` follow as text parts.
    ///
    /// # Errors
    /// - `HttpError::InvalidMethod` for GET or HEAD
    /// - `HttpError::PermissionDenied` if the path resolver refuses the source
    /// - `HttpError::Io` if the file cannot be read
    /// - `HttpError::BodyEncoding` if `data` is not an object
    pub async fn upload_file(&self, options: &UploadOptions) -> Result<ResponseEnvelope, HttpError> {
        let method = match options.request.method.as_deref() {
            None => HttpMethod::Post,
            Some(m) => HttpMethod::parse(m)
                .filter(|method| method.is_mutating())
                .ok_or_else(|| HttpError::InvalidMethod(m.to_owned()))?,
        };

        let path = self
            .paths
            .resolve(&options.file_path, options.file_directory)?;
        tokio::fs::metadata(&path).await?;

        let extras = match &options.request.data {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(HttpError::BodyEncoding(
                    "upload data must be an object".to_owned(),
                ));
            }
        };

        let mut without_body = options.request.clone();
        without_body.data = None;
        let descriptor = RequestDescriptor::with_method(method, &without_body)?;
        let mut prepared = RequestBuilder::new(&self.config).build(&descriptor)?;

        let content = MultipartContent::File {
            name: options.field_name().to_owned(),
            path,
            extras,
        };
        let response = self.send_multipart(&mut prepared, content).await?;
        self.decode(response, &prepared).await
    }

    async fn decode(
        &self,
        response: Response<ResponseBody>,
        prepared: &PreparedRequest,
    ) -> Result<ResponseEnvelope, HttpError> {
        ResponseDecoder::new(self.config.max_body_size)
            .decode(
                response,
                prepared.url.as_str(),
                prepared.response_type,
                prepared.read_timeout,
            )
            .await
    }

    /// Send `prepared` with whichever body it was encoded to.
    async fn dispatch(
        &self,
        prepared: &mut PreparedRequest,
    ) -> Result<Response<ResponseBody>, HttpError> {
        match std::mem::replace(&mut prepared.body, EncodedBody::Empty) {
            EncodedBody::Empty => self.send(prepared, empty_body()).await,
            EncodedBody::Bytes(bytes) => self.send(prepared, full_body(bytes)).await,
            EncodedBody::Multipart(fields) => {
                self.send_multipart(prepared, MultipartContent::Fields(fields))
                    .await
            }
        }
    }

    /// Send a fully buffered request, bounding the wait for the response head.
    async fn send(
        &self,
        prepared: &PreparedRequest,
        body: RequestBody,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let request = prepared.to_http(body)?;
        let service = self.connection(prepared.url.as_str(), prepared.connect_timeout)?;

        tracing::debug!(
            method = prepared.method.as_str(),
            url = %prepared.url,
            "sending request"
        );

        match head_timeout(prepared.connect_timeout, prepared.read_timeout) {
            Some(limit) => tokio::time::timeout(limit, service.oneshot(request))
                .await
                .map_err(|_| HttpError::Timeout(limit))?,
            None => service.oneshot(request).await,
        }
    }

    /// Send a multipart request while its body is written concurrently.
    async fn send_multipart(
        &self,
        prepared: &mut PreparedRequest,
        content: MultipartContent,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let (sink, body) = ChannelSink::channel(MULTIPART_CHANNEL_DEPTH);
        let mut abort = sink.clone();
        let mut encoder = MultipartEncoder::new(sink).with_chunk_size(self.config.chunk_size);

        prepared.set_content_type(&encoder.content_type())?;
        let request = prepared.to_http(body)?;
        let service = self.connection(prepared.url.as_str(), prepared.connect_timeout)?;

        tracing::debug!(
            method = prepared.method.as_str(),
            url = %prepared.url,
            boundary = encoder.boundary(),
            "sending multipart request"
        );

        // Both sink handles drop when this future completes, ending the body.
        let write = async move {
            let result = content.write(&mut encoder).await;
            if let Err(e) = &result {
                abort.abort(e.to_string()).await;
            }
            result
        };

        let (sent, written) = tokio::join!(service.oneshot(request), write);
        match written {
            Err(e) if sent.is_err() && is_closed_body(&e) => sent,
            Err(e) => Err(e),
            Ok(()) => sent,
        }
    }

    /// Build the connection stack from the current trust snapshot.
    ///
    /// Layers, outer to inner:
    /// `UserAgent → Decompression → FollowRedirect → Cookies → hyper client`.
    fn connection(
        &self,
        url: &str,
        connect_timeout: Option<Duration>,
    ) -> Result<ConnectionService, HttpError> {
        let trust = self.trust.current();
        let https = build_https_connector(&trust, connect_timeout)?;
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build::<_, RequestBody>(https);

        let url = url.to_owned();
        let service = ServiceBuilder::new()
            .layer(self.user_agent.clone())
            .layer(DecompressionLayer::new())
            .layer(FollowRedirectLayer::with_policy(RedirectPolicy::new(
                self.config.max_redirects,
            )))
            .layer(CookieLayer::new(Arc::clone(&self.cookies)))
            .service(client)
            .map_response(map_decompression_response)
            .map_err(move |e| HttpError::from_client(&url, e));

        Ok(service.boxed())
    }
}

/// Response head deadline: connect plus read timeout, if a read timeout is set.
fn head_timeout(connect: Option<Duration>, read: Option<Duration>) -> Option<Duration> {
    read.map(|read| read + connect.unwrap_or_default())
}

fn is_closed_body(err: &HttpError) -> bool {
    matches!(err, HttpError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
}

/// Stream `body` into a new file at `path`, returning the number of bytes written.
async fn write_body_to_file(
    body: ResponseBody,
    path: &Path,
    read_timeout: Option<Duration>,
) -> Result<usize, HttpError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = std::pin::pin!(body);
    let mut written = 0;

    while let Some(frame) = next_frame(body.as_mut(), read_timeout).await? {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            file.write_all(chunk).await?;
            written += chunk.len();
        }
    }

    file.flush().await?;
    Ok(written)
}
