//! Request body encoding selected by the declared `Content-Type`.

use crate::error::HttpError;
use crate::multipart::{BodySink, MultipartEncoder, field_text};
use bytes::Bytes;
use serde_json::Value;

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

/// Outcome of body encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedBody {
    /// No body is written
    Empty,
    /// Fully encoded bytes (JSON or form-urlencoded)
    Bytes(Bytes),
    /// Text fields streamed through a [`MultipartEncoder`] at send time
    Multipart(Vec<(String, String)>),
}

/// Content-type driven payload encoder.
pub struct BodyCodec;

impl BodyCodec {
    /// Encode `payload` for the declared content type.
    ///
    /// | content type contains | result |
    /// |---|---|
    /// | `application/json` | JSON bytes |
    /// | `application/x-www-form-urlencoded` | `key=value&...`, null values skipped |
    /// | `multipart/form-data` | one text field per key |
    /// | anything else | no body |
    ///
    /// # Errors
    /// Returns `HttpError::BodyEncoding` if the payload cannot be represented
    /// in the declared encoding (e.g. a form body that is not an object).
    pub fn encode(content_type: Option<&str>, payload: &Value) -> Result<EncodedBody, HttpError> {
        let Some(content_type) = content_type.map(str::to_ascii_lowercase) else {
            return Ok(EncodedBody::Empty);
        };

        if content_type.contains(JSON) {
            let bytes = serde_json::to_vec(payload)
                .map_err(|e| HttpError::BodyEncoding(e.to_string()))?;
            Ok(EncodedBody::Bytes(Bytes::from(bytes)))
        } else if content_type.contains(FORM) {
            let fields = text_fields(payload, FORM)?;
            let encoded = serde_urlencoded::to_string(&fields)
                .map_err(|e| HttpError::BodyEncoding(e.to_string()))?;
            Ok(EncodedBody::Bytes(Bytes::from(encoded)))
        } else if content_type.contains(MULTIPART) {
            Ok(EncodedBody::Multipart(text_fields(payload, MULTIPART)?))
        } else {
            Ok(EncodedBody::Empty)
        }
    }

    /// Write `fields` as text parts and finish the encoder.
    ///
    /// # Errors
    /// Returns `HttpError::ClosedEncoder` or `HttpError::Io` from the encoder.
    pub async fn write_multipart<S: BodySink>(
        encoder: &mut MultipartEncoder<S>,
        fields: &[(String, String)],
    ) -> Result<(), HttpError> {
        for (name, value) in fields {
            encoder.add_form_field(name, value).await?;
        }
        encoder.finish().await
    }
}

/// Flatten an object payload into `(key, text)` pairs, in map order, skipping nulls.
fn text_fields(payload: &Value, encoding: &str) -> Result<Vec<(String, String)>, HttpError> {
    match payload {
        Value::Object(map) => Ok(map
            .iter()
            .filter_map(|(key, value)| field_text(value).map(|text| (key.clone(), text)))
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(HttpError::BodyEncoding(format!(
            "{encoding} payload must be an object, got {}",
            value_kind(other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip() {
        let payload = json!({
            "name": "test",
            "nested": {"items": [1, 2.5, "three", null, false]},
            "unicode": "caf\u{e9}"
        });
        let EncodedBody::Bytes(bytes) =
            BodyCodec::encode(Some("application/json; charset=utf-8"), &payload).unwrap()
        else {
            panic!("expected bytes");
        };
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_json_array_and_scalar_payloads() {
        let encoded = BodyCodec::encode(Some("application/json"), &json!([1, 2])).unwrap();
        assert_eq!(encoded, EncodedBody::Bytes(Bytes::from_static(b"[1,2]")));

        let encoded = BodyCodec::encode(Some("Application/JSON"), &json!("text")).unwrap();
        assert_eq!(encoded, EncodedBody::Bytes(Bytes::from_static(b"\"text\"")));
    }

    #[test]
    fn test_form_encoding() {
        let payload = json!({
            "b": "hello world",
            "a": "x&y=z",
            "n": 42,
            "skip": null
        });
        let encoded =
            BodyCodec::encode(Some("application/x-www-form-urlencoded"), &payload).unwrap();
        assert_eq!(
            encoded,
            EncodedBody::Bytes(Bytes::from_static(b"b=hello+world&a=x%26y%3Dz&n=42"))
        );
    }

    #[test]
    fn test_form_requires_object() {
        let err = BodyCodec::encode(Some("application/x-www-form-urlencoded"), &json!([1]))
            .unwrap_err();
        match err {
            HttpError::BodyEncoding(msg) => assert!(msg.contains("array")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_multipart_fields() {
        let payload = json!({"name": "foo", "count": 2, "none": null});
        let encoded = BodyCodec::encode(Some("multipart/form-data"), &payload).unwrap();
        assert_eq!(
            encoded,
            EncodedBody::Multipart(vec![
                ("name".to_owned(), "foo".to_owned()),
                ("count".to_owned(), "2".to_owned()),
            ])
        );
    }

    #[test]
    fn test_unknown_or_missing_content_type() {
        let payload = json!({"a": 1});
        assert_eq!(
            BodyCodec::encode(Some("text/plain"), &payload).unwrap(),
            EncodedBody::Empty
        );
        assert_eq!(BodyCodec::encode(None, &payload).unwrap(), EncodedBody::Empty);
    }

    #[tokio::test]
    async fn test_write_multipart_finishes() {
        let mut encoder = MultipartEncoder::with_boundary(Vec::new(), "B");
        let fields = vec![("name".to_owned(), "foo".to_owned())];
        BodyCodec::write_multipart(&mut encoder, &fields).await.unwrap();
        assert!(encoder.is_finished());

        let body = String::from_utf8(encoder.into_sink()).unwrap();
        assert_eq!(
            body,
            "--B\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nfoo\r\n--B--\r\n"
        );
    }
}
