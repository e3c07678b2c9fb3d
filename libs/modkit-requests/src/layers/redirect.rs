//! Redirect policy for the pooled session path.
//!
//! Follows up to `max_redirects` hops (10 by default). Cross-origin hops are
//! allowed unless `same_origin_only` is set, but they drop `Authorization`,
//! `Cookie` and `Proxy-Authorization`. HTTPS → HTTP hops are refused unless
//! `allow_https_downgrade` is set. When a hop is refused the 3xx response is
//! returned to the caller as-is.

use crate::config::RedirectConfig;
use http::{Request, Uri, header};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

#[derive(Debug, Clone)]
pub struct SecureRedirectPolicy {
    config: RedirectConfig,
    /// Hops followed so far; each call starts from a fresh clone
    hops: usize,
    /// Set once any hop of the chain left the original origin
    crossed_origin: bool,
}

impl SecureRedirectPolicy {
    #[must_use]
    pub fn new(config: RedirectConfig) -> Self {
        Self {
            config,
            hops: 0,
            crossed_origin: false,
        }
    }

    /// Same scheme, host and port. A missing scheme counts as `https`.
    fn is_same_origin(original: &Uri, target: &Uri) -> bool {
        let origin = |uri: &Uri| {
            let scheme = uri.scheme_str().unwrap_or("https").to_owned();
            let port = uri.port_u16().unwrap_or_else(|| default_port(&scheme));
            (scheme, uri.host().unwrap_or_default().to_ascii_lowercase(), port)
        };
        origin(original) == origin(target)
    }

    fn is_https_downgrade(original: &Uri, target: &Uri) -> bool {
        original.scheme_str().unwrap_or("https") == "https"
            && target.scheme_str().unwrap_or("https") == "http"
    }

    fn is_allowed_host(&self, target: &Uri) -> bool {
        target
            .host()
            .is_some_and(|host| self.config.allowed_redirect_hosts.contains(host))
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

impl<B: Clone, E> Policy<B, E> for SecureRedirectPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        self.hops += 1;
        if self.hops > self.config.max_redirects {
            tracing::debug!(
                hops = self.hops,
                max = self.config.max_redirects,
                "redirect limit reached"
            );
            return Ok(Action::Stop);
        }

        let original = attempt.previous();
        let target = attempt.location();

        if !self.config.allow_https_downgrade && Self::is_https_downgrade(original, target) {
            tracing::warn!(%original, %target, "refusing HTTPS to HTTP redirect");
            return Ok(Action::Stop);
        }

        let same_origin = Self::is_same_origin(original, target);
        if self.config.same_origin_only && !same_origin && !self.is_allowed_host(target) {
            tracing::warn!(%original, %target, "refusing cross-origin redirect");
            return Ok(Action::Stop);
        }

        if !same_origin {
            self.crossed_origin = true;
        }
        tracing::debug!(status = %attempt.status(), %target, "following redirect");
        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        if self.crossed_origin && self.config.strip_sensitive_headers {
            let headers = request.headers_mut();
            for name in SENSITIVE_HEADERS {
                if headers.remove(name).is_some() {
                    tracing::debug!(header = %name, "dropped header on cross-origin redirect");
                }
            }
        }
    }

    fn clone_body(&self, body: &B) -> Option<B> {
        Some(body.clone())
    }
}
