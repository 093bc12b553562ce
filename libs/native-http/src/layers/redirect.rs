//! Redirect policy for the connection stack
//!
//! Redirects are followed transparently up to a fixed limit:
//! - a hop that changes scheme (HTTP ↔ HTTPS) is not followed; the redirect
//!   response is handed back as-is
//! - `Authorization`, `Cookie` and `Proxy-Authorization` headers are dropped once
//!   the chain leaves the original origin (the cookie layer re-attaches jar
//!   cookies that match the new host)
//! - 307/308 hops are only followed when the request had no body, since
//!   streamed bodies cannot be replayed

use http::{Request, Uri, header};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Headers that are stripped on cross-origin redirects to prevent credential leakage
const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// Implements [`tower_http::follow_redirect::policy::Policy`].
///
/// `FollowRedirect` clones the policy for each request, so the counters
/// start fresh per call.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    max_redirects: usize,
    /// Number of redirects followed so far
    redirect_count: usize,
    /// Set once any hop left the original origin
    cross_origin_detected: bool,
}

impl RedirectPolicy {
    /// Follow at most `max_redirects` hops; `0` disables following.
    #[must_use]
    pub fn new(max_redirects: usize) -> Self {
        Self {
            max_redirects,
            redirect_count: 0,
            cross_origin_detected: false,
        }
    }

    /// Check if the redirect is to the same origin (scheme, host, port)
    fn is_same_origin(original: &Uri, target: &Uri) -> bool {
        let orig_scheme = original.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        let orig_port = original
            .port_u16()
            .unwrap_or_else(|| default_port(orig_scheme));
        let target_port = target
            .port_u16()
            .unwrap_or_else(|| default_port(target_scheme));

        orig_scheme == target_scheme
            && original.host().unwrap_or("") == target.host().unwrap_or("")
            && orig_port == target_port
    }

    fn is_scheme_change(original: &Uri, target: &Uri) -> bool {
        original.scheme_str() != target.scheme_str()
    }
}

/// Get the default port for a scheme
fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

impl<B, E> Policy<B, E> for RedirectPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        self.redirect_count += 1;
        if self.redirect_count > self.max_redirects {
            tracing::debug!(
                count = self.redirect_count,
                max = self.max_redirects,
                "Redirect limit reached"
            );
            return Ok(Action::Stop);
        }

        let original = attempt.previous();
        let target = attempt.location();

        if Self::is_scheme_change(original, target) {
            tracing::debug!(
                original = %original,
                target = %target,
                "Not following redirect across schemes"
            );
            return Ok(Action::Stop);
        }

        if !Self::is_same_origin(original, target) {
            self.cross_origin_detected = true;
            tracing::debug!(
                original = %original,
                target = %target,
                "Cross-origin redirect detected"
            );
        }

        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        if self.cross_origin_detected {
            let headers = request.headers_mut();
            for header_name in SENSITIVE_HEADERS {
                if headers.remove(header_name).is_some() {
                    tracing::debug!(header = %header_name, "Stripped sensitive header on cross-origin redirect");
                }
            }
        }
    }
}
