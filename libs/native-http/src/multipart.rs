//! Streaming `multipart/form-data` encoder (RFC 7578).
//!
//! Parts are written to a [`BodySink`] as soon as they are produced, so a
//! file upload only ever holds one chunk in memory.

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{BoxError, HttpError};
use crate::request::RequestBody;
use async_trait::async_trait;
use bytes::Bytes;
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use rand::distr::{Alphanumeric, SampleString};
use serde_json::{Map, Value};
use std::io;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const BOUNDARY_LEN: usize = 32;

/// Destination for encoded body bytes.
#[async_trait]
pub trait BodySink: Send {
    /// Write one chunk.
    async fn write(&mut self, bytes: Bytes) -> io::Result<()>;

    /// Signal that no more bytes follow.
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
impl BodySink for Vec<u8> {
    async fn write(&mut self, bytes: Bytes) -> io::Result<()> {
        self.extend_from_slice(&bytes);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type FrameSender = mpsc::Sender<Result<Frame<Bytes>, BoxError>>;

/// Sink that feeds a request body through a bounded channel.
///
/// The body ends once every clone of the sink is closed or dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Option<FrameSender>,
}

impl ChannelSink {
    /// Create a sink and the request body it feeds; at most `depth` chunks are buffered.
    #[must_use]
    pub fn channel(depth: usize) -> (Self, RequestBody) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let body = StreamBody::new(ReceiverStream::new(rx)).boxed();
        (Self { tx: Some(tx) }, body)
    }

    /// Fail the request body so a partially written payload is never sent as complete.
    pub async fn abort(&mut self, reason: impl Into<BoxError>) {
        if let Some(tx) = self.tx.take()
            && tx.send(Err(reason.into())).await.is_err()
        {
            tracing::debug!("request body already dropped; abort not delivered");
        }
    }
}

#[async_trait]
impl BodySink for ChannelSink {
    async fn write(&mut self, bytes: Bytes) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "body sink closed"))?;
        tx.send(Ok(Frame::data(bytes)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "request body dropped"))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Incremental `multipart/form-data` writer.
///
/// # Example
///
/// ```ignore
/// let mut encoder = MultipartEncoder::new(Vec::new());
/// encoder.add_form_field("name", "foo").await?;
/// encoder.add_file_part("file", Path::new("photo.png"), &Map::new()).await?;
/// encoder.finish().await?;
/// let body = encoder.into_sink();
/// ```
pub struct MultipartEncoder<S> {
    sink: S,
    boundary: String,
    chunk_size: usize,
    closed: bool,
}

impl<S: BodySink> MultipartEncoder<S> {
    /// Create an encoder with a random boundary.
    pub fn new(sink: S) -> Self {
        Self::with_boundary(sink, generate_boundary())
    }

    /// Create an encoder with an explicit boundary.
    pub fn with_boundary(sink: S, boundary: impl Into<String>) -> Self {
        Self {
            sink,
            boundary: boundary.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            closed: false,
        }
    }

    /// Set the read size used when streaming files.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` header value announcing this encoder's boundary
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn is_finished(&self) -> bool {
        self.closed
    }

    /// Write a text part.
    ///
    /// # Errors
    /// Returns `HttpError::ClosedEncoder` after `finish()`, or `HttpError::Io` if the sink fails.
    pub async fn add_form_field(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        self.ensure_open()?;
        let part = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{value}\r\n",
            self.boundary,
            escape_quoted(name)
        );
        self.sink.write(Bytes::from(part)).await?;
        Ok(())
    }

    /// Stream a file part, then write each non-null entry of `extra_fields` as a text part.
    ///
    /// The part's `Content-Type` is inferred from the file extension.
    ///
    /// # Errors
    /// Returns `HttpError::ClosedEncoder` after `finish()`, or `HttpError::Io` if the
    /// file cannot be read or the sink fails.
    pub async fn add_file_part(
        &mut self,
        name: &str,
        path: &Path,
        extra_fields: &Map<String, Value>,
    ) -> Result<(), HttpError> {
        self.ensure_open()?;
        let mut file = tokio::fs::File::open(path).await?;

        let filename = path
            .file_name()
            .map_or_else(|| "file".into(), |f| f.to_string_lossy());
        let header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary,
            escape_quoted(name),
            escape_quoted(&filename),
            mime_from_path(path)
        );
        self.sink.write(Bytes::from(header)).await?;

        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            self.sink.write(Bytes::copy_from_slice(&buf[..read])).await?;
        }
        self.sink.write(Bytes::from_static(b"\r\n")).await?;

        for (key, value) in extra_fields {
            if let Some(text) = field_text(value) {
                self.add_form_field(key, &text).await?;
            }
        }
        Ok(())
    }

    /// Write the closing boundary and close the sink. The encoder is terminal afterwards.
    ///
    /// # Errors
    /// Returns `HttpError::ClosedEncoder` if already finished, or `HttpError::Io` if the sink fails.
    pub async fn finish(&mut self) -> Result<(), HttpError> {
        self.ensure_open()?;
        self.closed = true;
        let closing = format!("--{}--\r\n", self.boundary);
        self.sink.write(Bytes::from(closing)).await?;
        self.sink.close().await?;
        Ok(())
    }

    /// Give back the sink (e.g. to inspect an in-memory body).
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn ensure_open(&self) -> Result<(), HttpError> {
        if self.closed {
            Err(HttpError::ClosedEncoder)
        } else {
            Ok(())
        }
    }
}

/// Text form of a field value; `None` for null.
pub(crate) fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn generate_boundary() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), BOUNDARY_LEN)
}

/// Percent-escape characters that would terminate a quoted header parameter.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn mime_from_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
