//! Tower layers for the pooled session path
//!
//! ## Available Layers
//!
//! - [`SessionHeadersLayer`] - Adds `User-Agent` (and `Connection: close` without keep-alive)
//! - [`SecureRedirectPolicy`] - Redirect policy for `tower_http::follow_redirect`
//! - [`CookieJarLayer`] - Per-session cookie jar

mod cookie_jar;
mod redirect;
mod session_headers;

pub use cookie_jar::{CookieJar, CookieJarLayer, CookieJarService};
pub use redirect::SecureRedirectPolicy;
pub use session_headers::{SessionHeadersLayer, SessionHeadersService};
