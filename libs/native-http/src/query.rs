//! Query-string merging.

use crate::options::ParamValue;
use indexmap::IndexMap;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use url::{Position, Url};

/// Characters escaped in an assembled query: controls, space and the bytes
/// that may not appear raw in a query component. `&`, `=` and `%` are kept
/// so pair structure and existing escapes survive.
const QUERY: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'`');

/// Merges parameter maps into a URL's existing query string.
///
/// Pairs are appended after the original query, separated by `&`; array
/// values expand to one `key=value` pair per element, in order.
#[derive(Debug, Clone, Copy)]
pub struct QueryEncoder {
    encode: bool,
}

impl Default for QueryEncoder {
    fn default() -> Self {
        Self { encode: true }
    }
}

impl QueryEncoder {
    /// Create an encoder; `encode` controls percent-encoding of the merged query.
    #[must_use]
    pub fn new(encode: bool) -> Self {
        Self { encode }
    }

    /// Append `params` to the query of `base`.
    ///
    /// Never fails: if the rebuilt URL does not parse, `base` is returned
    /// unchanged and a warning is logged.
    #[must_use]
    pub fn append(&self, base: &Url, params: &IndexMap<String, ParamValue>) -> Url {
        if params.is_empty() {
            return base.clone();
        }

        let mut query = base.query().unwrap_or_default().to_owned();
        for (key, value) in params {
            let pairs = value
                .values()
                .iter()
                .map(|v| format!("{key}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            if pairs.is_empty() {
                continue;
            }
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&pairs);
        }

        let query = if self.encode {
            utf8_percent_encode(&query, QUERY).to_string()
        } else {
            query
        };

        let fragment = base
            .fragment()
            .map(|f| format!("#{f}"))
            .unwrap_or_default();
        let rebuilt = format!("{}?{query}{fragment}", &base[..Position::AfterPath]);

        match Url::parse(&rebuilt) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(
                    url = %base,
                    error = %e,
                    "failed to merge query parameters; using original URL"
                );
                base.clone()
            }
        }
    }
}
