//! Tower layers composing the connection stack
//!
//! ## Available Layers
//!
//! - [`UserAgentLayer`] - Adds a default User-Agent header to requests
//! - [`CookieLayer`] - Attaches jar cookies and stores `Set-Cookie` responses on every hop
//! - [`RedirectPolicy`] - Redirect policy for `tower_http::follow_redirect`

mod cookies;
mod redirect;
mod user_agent;

pub use cookies::{CookieLayer, CookieService};
pub use redirect::RedirectPolicy;
pub use user_agent::{UserAgentLayer, UserAgentService};
