//! Process-scoped cookie jar shared by every request.
//!
//! The jar is a thin CRUD surface over a [`CookieStore`]. The store decides
//! domain/path matching and expiry; the default [`MemoryCookieStore`] delegates
//! those rules to the `cookie_store` crate (RFC 6265).

use crate::error::{HttpError, InvalidUriKind};
use crate::options::CookieOptions;
use http::header::{HeaderMap, HeaderValue, SET_COOKIE};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;
use url::Url;

/// Expiry used when deleting a cookie (any past date works)
const EXPIRED: &str = "Wed, 31 Dec 2000 23:59:59 GMT";

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// One cookie visible for a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CookieEntry {
    pub key: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// HTTP-date, absent for session cookies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

/// Expiry attached when setting a cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieExpiry {
    /// HTTP-date; a leading `expires=` is tolerated
    Expires(String),
    /// Lifetime in days, sent as `Max-Age`
    AgeDays(i64),
}

/// Storage behind a [`CookieJar`].
///
/// Implementations must be internally synchronized; the jar calls them from
/// any task without extra locking.
pub trait CookieStore: Send + Sync {
    /// Store a `Set-Cookie` value received from (or attributed to) `url`.
    ///
    /// # Errors
    /// Implementations may reject cookies they cannot represent.
    fn set_cookie(&self, url: &Url, set_cookie: &str) -> Result<(), HttpError>;

    /// Cookies that would be sent with a request to `url`.
    fn cookies(&self, url: &Url) -> Vec<CookieEntry>;

    /// Drop every stored cookie.
    fn clear(&self);

    /// `Cookie` request header for `url`, if any cookie matches.
    fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        let header = self
            .cookies(url)
            .iter()
            .map(|c| format!("{}={}", c.key, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            return None;
        }
        HeaderValue::try_from(header).ok()
    }
}

/// In-memory [`CookieStore`] following RFC 6265 matching rules.
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    inner: Mutex<cookie_store::CookieStore>,
}

impl MemoryCookieStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieStore for MemoryCookieStore {
    fn set_cookie(&self, url: &Url, set_cookie: &str) -> Result<(), HttpError> {
        if let Err(e) = self.inner.lock().parse(set_cookie, url) {
            // Unacceptable cookies are dropped, never surfaced.
            tracing::debug!(url = %url, error = %e, "cookie rejected");
        }
        Ok(())
    }

    fn cookies(&self, url: &Url) -> Vec<CookieEntry> {
        let store = self.inner.lock();
        store
            .matches(url)
            .into_iter()
            .map(|cookie| CookieEntry {
                key: cookie.name().to_owned(),
                value: cookie.value().to_owned(),
                domain: cookie
                    .domain()
                    .or_else(|| url.host_str())
                    .unwrap_or_default()
                    .to_owned(),
                path: cookie.path().unwrap_or("/").to_owned(),
                expires: match &cookie.expires {
                    cookie_store::CookieExpiration::AtUtc(at) => {
                        Some(httpdate::fmt_http_date(SystemTime::from(*at)))
                    }
                    cookie_store::CookieExpiration::SessionEnd => None,
                },
            })
            .collect()
    }

    fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Cookie CRUD keyed by URL.
pub struct CookieJar {
    store: Arc<dyn CookieStore>,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new(Arc::new(MemoryCookieStore::new()))
    }
}

impl std::fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieJar").finish_non_exhaustive()
    }
}

impl CookieJar {
    #[must_use]
    pub fn new(store: Arc<dyn CookieStore>) -> Self {
        Self { store }
    }

    /// Jar shared by every transport in the process.
    #[must_use]
    pub fn shared() -> Arc<CookieJar> {
        static SHARED: OnceLock<Arc<CookieJar>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(CookieJar::default())))
    }

    /// Set `key=value` for `url`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUrl` if `url` does not parse.
    pub fn set_cookie(
        &self,
        url: &str,
        key: &str,
        value: &str,
        expiry: Option<CookieExpiry>,
    ) -> Result<(), HttpError> {
        let url = parse_url(url)?;
        let attributes = match expiry {
            Some(CookieExpiry::Expires(expires)) => {
                format!("; Expires={}", strip_expires_prefix(&expires))
            }
            Some(CookieExpiry::AgeDays(days)) => {
                format!("; Max-Age={}", days.saturating_mul(SECONDS_PER_DAY))
            }
            None => String::new(),
        };
        self.store
            .set_cookie(&url, &format!("{key}={value}{attributes}"))
    }

    /// Cookie named `key` visible for `url`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUrl` if `url` does not parse.
    pub fn get_cookie(&self, url: &str, key: &str) -> Result<Option<CookieEntry>, HttpError> {
        let url = parse_url(url)?;
        Ok(self.store.cookies(&url).into_iter().find(|c| c.key == key))
    }

    /// Every cookie visible for `url`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUrl` if `url` does not parse.
    pub fn get_cookies(&self, url: &str) -> Result<Vec<CookieEntry>, HttpError> {
        let url = parse_url(url)?;
        Ok(self.store.cookies(&url))
    }

    /// Expire cookie `key` for `url`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUrl` if `url` does not parse.
    pub fn delete_cookie(&self, url: &str, key: &str) -> Result<(), HttpError> {
        let url = parse_url(url)?;
        self.store
            .set_cookie(&url, &format!("{key}=; Expires={EXPIRED}"))
    }

    /// Drop every cookie for every URL.
    pub fn clear_cookies(&self) {
        self.store.clear();
    }

    /// Set a cookie from inbound call options.
    ///
    /// `expires` wins over `age_days` when both are present.
    ///
    /// # Errors
    /// - `HttpError::InvalidOptions` if no key is given
    /// - `HttpError::InvalidUrl` if the URL does not parse
    pub fn set_from_options(&self, options: &CookieOptions) -> Result<(), HttpError> {
        let key = options.key.as_deref().ok_or_else(|| {
            HttpError::InvalidOptions(<serde_json::Error as serde::de::Error>::missing_field(
                "key",
            ))
        })?;
        let expiry = match (&options.expires, options.age_days) {
            (Some(expires), _) => Some(CookieExpiry::Expires(expires.clone())),
            (None, Some(days)) => Some(CookieExpiry::AgeDays(days)),
            (None, None) => None,
        };
        self.set_cookie(
            &options.url,
            key,
            options.value.as_deref().unwrap_or_default(),
            expiry,
        )
    }

    /// `Cookie` header to attach to a request for `url`.
    #[must_use]
    pub fn request_header(&self, url: &Url) -> Option<HeaderValue> {
        self.store.cookie_header(url)
    }

    /// Store every `Set-Cookie` header of a response from `url`.
    pub fn store_response_cookies(&self, url: &Url, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else {
                tracing::debug!(url = %url, "skipping non-UTF-8 Set-Cookie header");
                continue;
            };
            if let Err(e) = self.store.set_cookie(url, value) {
                tracing::debug!(url = %url, error = %e, "failed to store response cookie");
            }
        }
    }
}

fn parse_url(url: &str) -> Result<Url, HttpError> {
    Url::parse(url).map_err(|e| HttpError::invalid_url(url, InvalidUriKind::ParseError, e))
}

fn strip_expires_prefix(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.get(..8) {
        Some(prefix) if prefix.eq_ignore_ascii_case("expires=") => &trimmed[8..],
        _ => trimmed,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/";

    #[test]
    fn test_set_and_get_cookie() {
        let jar = CookieJar::default();
        jar.set_cookie(URL, "session", "abc", None).unwrap();

        let cookie = jar.get_cookie(URL, "session").unwrap().unwrap();
        assert_eq!(cookie.key, "session");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.expires, None);

        assert!(jar.get_cookie(URL, "missing").unwrap().is_none());
    }

    #[test]
    fn test_get_cookies_lists_all() {
        let jar = CookieJar::default();
        jar.set_cookie(URL, "a", "1", None).unwrap();
        jar.set_cookie(URL, "b", "2", None).unwrap();

        let mut keys: Vec<String> = jar
            .get_cookies(URL)
            .unwrap()
            .into_iter()
            .map(|c| c.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_delete_cookie() {
        let jar = CookieJar::default();
        jar.set_cookie(URL, "session", "abc", None).unwrap();
        jar.set_cookie(URL, "keep", "1", None).unwrap();
        jar.delete_cookie(URL, "session").unwrap();

        assert!(jar.get_cookie(URL, "session").unwrap().is_none());
        assert!(jar.get_cookie(URL, "keep").unwrap().is_some());
    }

    #[test]
    fn test_clear_cookies() {
        let jar = CookieJar::default();
        jar.set_cookie(URL, "a", "1", None).unwrap();
        jar.set_cookie("https://other.example.org/", "b", "2", None)
            .unwrap();
        jar.clear_cookies();

        assert!(jar.get_cookies(URL).unwrap().is_empty());
        assert!(
            jar.get_cookies("https://other.example.org/")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_max_age_from_days() {
        let jar = CookieJar::default();
        jar.set_cookie(URL, "remember", "yes", Some(CookieExpiry::AgeDays(7)))
            .unwrap();

        let cookie = jar.get_cookie(URL, "remember").unwrap().unwrap();
        let expires = httpdate::parse_http_date(cookie.expires.as_deref().unwrap()).unwrap();
        let remaining = expires
            .duration_since(SystemTime::now())
            .unwrap()
            .as_secs();
        let week = 7 * 24 * 60 * 60;
        assert!(remaining > week - 60 && remaining <= week);
    }

    #[test]
    fn test_expires_prefix_stripped() {
        let jar = CookieJar::default();
        jar.set_cookie(
            URL,
            "token",
            "t",
            Some(CookieExpiry::Expires(
                "EXPIRES=Fri, 01 Jan 2100 00:00:00 GMT".to_owned(),
            )),
        )
        .unwrap();

        let cookie = jar.get_cookie(URL, "token").unwrap().unwrap();
        assert_eq!(
            cookie.expires.as_deref(),
            Some("Fri, 01 Jan 2100 00:00:00 GMT")
        );
    }

    #[test]
    fn test_past_expiry_not_visible() {
        let jar = CookieJar::default();
        jar.set_cookie(
            URL,
            "old",
            "x",
            Some(CookieExpiry::Expires(EXPIRED.to_owned())),
        )
        .unwrap();
        assert!(jar.get_cookie(URL, "old").unwrap().is_none());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let jar = CookieJar::default();
        let err = jar.set_cookie("not a url", "a", "1", None).unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl { .. }));
        assert!(jar.get_cookies("::").is_err());
    }

    #[test]
    fn test_cookies_scoped_by_host() {
        let jar = CookieJar::default();
        jar.set_cookie(URL, "a", "1", None).unwrap();
        assert!(
            jar.get_cookies("https://unrelated.test/")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_response_cookies_roundtrip() {
        let jar = CookieJar::default();
        let url = Url::parse("https://example.com/login").unwrap();

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("sid=42; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("theme=dark; Path=/"));
        jar.store_response_cookies(&url, &headers);

        let header = jar
            .request_header(&Url::parse("https://example.com/home").unwrap())
            .unwrap();
        let header = header.to_str().unwrap();
        assert!(header.contains("sid=42"));
        assert!(header.contains("theme=dark"));
        assert!(header.contains("; "));
    }

    #[test]
    fn test_no_header_without_cookies() {
        let jar = CookieJar::default();
        assert!(jar.request_header(&Url::parse(URL).unwrap()).is_none());
    }

    #[test]
    fn test_set_from_options() {
        let jar = CookieJar::default();
        let options = CookieOptions::from_value(serde_json::json!({
            "url": URL,
            "key": "lang",
            "value": "en",
            "ageDays": 1
        }))
        .unwrap();
        jar.set_from_options(&options).unwrap();

        let cookie = jar.get_cookie(URL, "lang").unwrap().unwrap();
        assert_eq!(cookie.value, "en");
        assert!(cookie.expires.is_some());
    }

    #[test]
    fn test_options_without_key_rejected() {
        let jar = CookieJar::default();
        let options = CookieOptions::from_value(serde_json::json!({"url": URL})).unwrap();
        let err = jar.set_from_options(&options).unwrap_err();
        assert!(matches!(err, HttpError::InvalidOptions(_)));
    }

    #[test]
    fn test_shared_jar_is_singleton() {
        assert!(Arc::ptr_eq(&CookieJar::shared(), &CookieJar::shared()));
    }

    #[test]
    fn test_entry_serialization() {
        let entry = CookieEntry {
            key: "k".to_owned(),
            value: "v".to_owned(),
            domain: "example.com".to_owned(),
            path: "/".to_owned(),
            expires: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["key"], "k");
        assert_eq!(value["value"], "v");
        assert!(value.get("expires").is_none());
    }
}
