//! Inbound call options.
//!
//! Callers (typically a bridge that receives loosely-typed JSON) hand these
//! structs to [`HttpTransport`](crate::HttpTransport). Each struct is
//! validated once, at deserialization: a value of the wrong type is rejected
//! with [`HttpError::InvalidOptions`] instead of being coerced. Unknown keys
//! are ignored.

use crate::config::ResponseType;
use crate::error::HttpError;
use crate::files::Directory;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query parameter value: a single string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    One(String),
    Many(Vec<String>),
}

impl ParamValue {
    /// Values in emission order
    #[must_use]
    pub fn values(&self) -> &[String] {
        match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::One(value.to_owned())
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Many(values.into_iter().map(str::to_owned).collect())
    }
}

/// Options for a plain request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpOptions {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub params: IndexMap<String, ParamValue>,
    #[serde(default)]
    pub data: Option<Value>,
    /// Connect timeout in milliseconds
    #[serde(default)]
    pub connect_timeout: Option<u64>,
    /// Read timeout in milliseconds
    #[serde(default)]
    pub read_timeout: Option<u64>,
    #[serde(default)]
    pub response_type: ResponseType,
    /// Percent-encode the merged query string (default: true)
    #[serde(default)]
    pub should_encode_url_params: Option<bool>,
}

/// Options for a file download.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOptions {
    #[serde(flatten)]
    pub request: HttpOptions,
    pub file_path: String,
    #[serde(default)]
    pub file_directory: Option<Directory>,
}

/// Options for a multipart file upload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    #[serde(flatten)]
    pub request: HttpOptions,
    pub file_path: String,
    #[serde(default)]
    pub file_directory: Option<Directory>,
    /// Multipart field name of the file part (default: `"file"`)
    #[serde(default)]
    pub name: Option<String>,
}

impl UploadOptions {
    /// Field name of the file part
    #[must_use]
    pub fn field_name(&self) -> &str {
        self.name.as_deref().unwrap_or("file")
    }
}

/// Options for cookie operations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieOptions {
    pub url: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub age_days: Option<i64>,
}

/// Result of a completed file download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    /// Absolute path of the written file
    pub path: String,
}

macro_rules! impl_from_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $ty {
                /// Validate loosely-typed call parameters.
                ///
                /// # Errors
                /// Returns `HttpError::InvalidOptions` if a field is missing or has the wrong type.
                pub fn from_value(value: Value) -> Result<Self, HttpError> {
                    from_value(value)
                }
            }
        )+
    };
}

impl_from_value!(HttpOptions, DownloadOptions, UploadOptions, CookieOptions);

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, HttpError> {
    serde_json::from_value(value).map_err(HttpError::InvalidOptions)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_options_full() {
        let options = HttpOptions::from_value(json!({
            "url": "https://example.com/api",
            "method": "post",
            "headers": {"Content-Type": "application/json"},
            "params": {"single": "1", "multi": ["a", "b"]},
            "data": {"name": "test"},
            "connectTimeout": 1500,
            "readTimeout": 3000,
            "responseType": "json",
            "shouldEncodeUrlParams": false,
            "webFetchExtra": {"credentials": "include"}
        }))
        .unwrap();

        assert_eq!(options.url, "https://example.com/api");
        assert_eq!(options.method.as_deref(), Some("post"));
        assert_eq!(options.headers["Content-Type"], "application/json");
        assert_eq!(options.params["single"], ParamValue::One("1".to_owned()));
        assert_eq!(options.params["multi"].values(), ["a", "b"]);
        assert_eq!(options.data, Some(json!({"name": "test"})));
        assert_eq!(options.connect_timeout, Some(1500));
        assert_eq!(options.read_timeout, Some(3000));
        assert_eq!(options.response_type, ResponseType::Json);
        assert_eq!(options.should_encode_url_params, Some(false));
    }

    #[test]
    fn test_http_options_minimal_defaults() {
        let options = HttpOptions::from_value(json!({"url": "https://example.com"})).unwrap();
        assert!(options.method.is_none());
        assert!(options.headers.is_empty());
        assert!(options.params.is_empty());
        assert_eq!(options.response_type, ResponseType::Text);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let err = HttpOptions::from_value(json!({
            "url": "https://example.com",
            "connectTimeout": "soon"
        }))
        .unwrap_err();
        assert!(matches!(err, HttpError::InvalidOptions(_)));

        let err = HttpOptions::from_value(json!({
            "url": "https://example.com",
            "params": {"page": 1}
        }))
        .unwrap_err();
        assert!(matches!(err, HttpError::InvalidOptions(_)));

        let err = HttpOptions::from_value(json!({"method": "GET"})).unwrap_err();
        assert!(matches!(err, HttpError::InvalidOptions(_)));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let err = HttpOptions::from_value(json!({
            "url": "https://example.com",
            "readTimeout": -1
        }))
        .unwrap_err();
        assert!(matches!(err, HttpError::InvalidOptions(_)));
    }

    #[test]
    fn test_upload_options_flatten() {
        let options = UploadOptions::from_value(json!({
            "url": "https://example.com/upload",
            "method": "PUT",
            "filePath": "report.pdf",
            "fileDirectory": "DOCUMENTS",
            "data": {"title": "Q3"}
        }))
        .unwrap();

        assert_eq!(options.request.url, "https://example.com/upload");
        assert_eq!(options.request.method.as_deref(), Some("PUT"));
        assert_eq!(options.file_path, "report.pdf");
        assert_eq!(options.file_directory, Some(Directory::Documents));
        assert_eq!(options.field_name(), "file");
    }

    #[test]
    fn test_download_options() {
        let options = DownloadOptions::from_value(json!({
            "url": "https://example.com/file.zip",
            "filePath": "/tmp/file.zip"
        }))
        .unwrap();
        assert_eq!(options.file_path, "/tmp/file.zip");
        assert!(options.file_directory.is_none());
    }

    #[test]
    fn test_cookie_options() {
        let options = CookieOptions::from_value(json!({
            "url": "https://example.com",
            "key": "session",
            "value": "abc",
            "ageDays": 7
        }))
        .unwrap();
        assert_eq!(options.key.as_deref(), Some("session"));
        assert_eq!(options.age_days, Some(7));
        assert!(options.expires.is_none());
    }
}
