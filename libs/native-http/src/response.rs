use crate::config::ResponseType;
use crate::error::{BoxError, HttpError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tower_http::follow_redirect::RequestUri;

/// Maximum body preview size for error messages (8KB).
///
/// Download failures carry a preview of the error body; this limits how much
/// of it is read.
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Type alias for the boxed response body that supports decompression.
///
/// This type can hold either a raw body or a decompressed body (gzip/br/deflate).
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

const JSON: &str = "application/json";
const JSON_API: &str = "application/vnd.api+json";

/// Decoded response body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    /// Normalized text (`\n` line endings, no trailing terminator)
    Text(String),
    /// Parsed JSON value
    Json(Value),
    /// Base64-encoded raw bytes
    Binary(String),
}

/// Response handed back to the caller.
///
/// `error` is set when the server answered 4xx/5xx with a non-empty body;
/// such responses are not Rust errors, the body is delivered as data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Final URL after redirects
    pub url: String,
    pub data: ResponseData,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

/// Converts wire responses into [`ResponseEnvelope`]s.
#[derive(Debug, Clone, Copy)]
pub struct ResponseDecoder {
    max_body_size: usize,
}

impl ResponseDecoder {
    #[must_use]
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    /// Read and decode `response`.
    ///
    /// `request_url` is reported when the response carries no record of the
    /// final (post-redirect) URL.
    ///
    /// # Errors
    /// - `HttpError::Timeout` if a body frame does not arrive within `read_timeout`
    /// - `HttpError::BodyTooLarge` if the body exceeds `max_body_size`
    /// - `HttpError::MalformedResponseBody` if a JSON body does not parse
    /// - `HttpError::Transport` if the body stream fails
    pub async fn decode<B>(
        &self,
        response: Response<B>,
        request_url: &str,
        response_type: ResponseType,
        read_timeout: Option<Duration>,
    ) -> Result<ResponseEnvelope, HttpError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let url = final_url(&response).unwrap_or_else(|| request_url.to_owned());
        let (parts, body) = response.into_parts();
        let bytes = read_body_limited(body, self.max_body_size, read_timeout).await?;

        tracing::debug!(
            status = parts.status.as_u16(),
            url = %url,
            bytes = bytes.len(),
            "response body received"
        );

        Self::envelope(parts.status, &parts.headers, url, response_type, &bytes)
    }

    /// Build the envelope from an already-read body.
    ///
    /// # Errors
    /// Returns `HttpError::MalformedResponseBody` if a JSON body does not parse.
    pub fn envelope(
        status: StatusCode,
        headers: &HeaderMap,
        url: String,
        response_type: ResponseType,
        body: &[u8],
    ) -> Result<ResponseEnvelope, HttpError> {
        let flat_headers = flatten_headers(headers);
        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let error = is_error_status(status) && !body.is_empty();
        let text = || normalize_line_endings(&String::from_utf8_lossy(body));
        let json = |text: String| {
            parse_json(&text)
                .map(ResponseData::Json)
                .map_err(|raw| malformed(status, &flat_headers, &url, raw))
        };

        let data = if error {
            if content_type.contains(JSON) || content_type.contains(JSON_API) {
                json(text())?
            } else {
                ResponseData::Text(text())
            }
        } else if content_type.contains(JSON) || content_type.contains(JSON_API) {
            json(text())?
        } else {
            match response_type {
                ResponseType::ArrayBuffer | ResponseType::Blob => {
                    ResponseData::Binary(STANDARD.encode(body))
                }
                ResponseType::Json => json(text())?,
                ResponseType::Text | ResponseType::Document => ResponseData::Text(text()),
            }
        };

        Ok(ResponseEnvelope {
            status: status.as_u16(),
            headers: flat_headers,
            url,
            data,
            error,
        })
    }
}

fn is_error_status(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

fn malformed(
    status: StatusCode,
    headers: &BTreeMap<String, String>,
    url: &str,
    body: String,
) -> HttpError {
    HttpError::MalformedResponseBody {
        status: status.as_u16(),
        headers: headers.clone(),
        url: url.to_owned(),
        body,
    }
}

/// Final request URI recorded by the follow-redirect layer.
fn final_url<B>(response: &Response<B>) -> Option<String> {
    response
        .extensions()
        .get::<RequestUri>()
        .map(|uri| uri.0.to_string())
}

/// Aggregate header values per name, in arrival order, joined by `", "`.
#[must_use]
pub fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let joined = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            (name.as_str().to_owned(), joined)
        })
        .collect()
}

/// Normalize line endings to `\n` and drop the trailing terminator.
#[must_use]
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a response body as JSON.
///
/// `null` maps to `Value::Null` and bare `true`/`false` are wrapped as
/// `{"flag": "true"|"false"}`. Anything else, an empty body included, must
/// be an object or an array.
///
/// # Errors
/// Returns the input text back when it is not acceptable JSON.
pub fn parse_json(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    match trimmed {
        "null" => return Ok(Value::Null),
        "true" | "false" => {
            let mut flag = serde_json::Map::new();
            flag.insert("flag".to_owned(), Value::String(trimmed.to_owned()));
            return Ok(Value::Object(flag));
        }
        _ => {}
    }

    if let Ok(object) = serde_json::from_str::<serde_json::Map<String, Value>>(trimmed) {
        return Ok(Value::Object(object));
    }
    if let Ok(array) = serde_json::from_str::<Vec<Value>>(trimmed) {
        return Ok(Value::Array(array));
    }
    Err(text.to_owned())
}

/// Read a body frame by frame, enforcing `limit` and a per-frame timeout.
///
/// The limit applies to decompressed bytes.
pub(crate) async fn read_body_limited<B>(
    body: B,
    limit: usize,
    read_timeout: Option<Duration>,
) -> Result<Bytes, HttpError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = next_frame(body.as_mut(), read_timeout).await? {
        let frame = frame.map_err(|e| HttpError::Transport(e.into()))?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

/// Await the next frame, bounded by `read_timeout` when set.
pub(crate) async fn next_frame<B>(
    mut body: std::pin::Pin<&mut B>,
    read_timeout: Option<Duration>,
) -> Result<Option<Result<http_body::Frame<Bytes>, B::Error>>, HttpError>
where
    B: Body<Data = Bytes>,
{
    match read_timeout {
        Some(limit) => tokio::time::timeout(limit, body.frame())
            .await
            .map_err(|_| HttpError::Timeout(limit)),
        None => Ok(body.frame().await),
    }
}

/// Read at most [`ERROR_BODY_PREVIEW_LIMIT`] bytes of an error body as text.
pub(crate) async fn error_preview<B>(
    body: B,
    read_timeout: Option<Duration>,
) -> Result<String, HttpError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match read_body_limited(body, ERROR_BODY_PREVIEW_LIMIT, read_timeout).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(HttpError::BodyTooLarge { .. }) => Ok("<body too large for preview>".to_owned()),
        Err(e) => Err(e),
    }
}
