//! Per-session cookie jar.
//!
//! Cookies from `Set-Cookie` response headers are stored and sent back on
//! later requests to matching URLs. The layer sits inside redirect
//! following, so every hop of a redirect chain reads and updates the jar.

use cookie_store::CookieStore;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderValue, Request, Response};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Shared cookie storage, one per session
#[derive(Clone, Default)]
pub struct CookieJar {
    store: Arc<Mutex<CookieStore>>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `Cookie` header value for `url`, if any stored cookie matches
    fn header_for(&self, url: &url::Url) -> Option<HeaderValue> {
        let store = self.store.lock();
        let pairs: Vec<String> = store
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }

    fn store_from<'a>(&self, url: &url::Url, set_cookies: impl Iterator<Item = &'a HeaderValue>) {
        let cookies = set_cookies
            .filter_map(|value| value.to_str().ok())
            .filter_map(|raw| match cookie::Cookie::parse(raw) {
                Ok(c) => Some(c.into_owned()),
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring malformed Set-Cookie header");
                    None
                }
            });
        self.store.lock().store_response_cookies(cookies, url);
    }

    /// Number of unexpired cookies held
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().iter_unexpired().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.store.lock().clear();
    }
}

impl std::fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieJar").field("len", &self.len()).finish()
    }
}

#[derive(Clone)]
pub struct CookieJarLayer {
    jar: CookieJar,
}

impl CookieJarLayer {
    #[must_use]
    pub fn new(jar: CookieJar) -> Self {
        Self { jar }
    }
}

impl<S> Layer<S> for CookieJarLayer {
    type Service = CookieJarService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieJarService {
            inner,
            jar: self.jar.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CookieJarService<S> {
    inner: S,
    jar: CookieJar,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CookieJarService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let url = url::Url::parse(&req.uri().to_string()).ok();

        if let Some(url) = &url
            && let Some(stored) = self.jar.header_for(url)
        {
            let merged = match req.headers().get(COOKIE).and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.is_empty() => {
                    HeaderValue::from_str(&format!("{existing}; {}", stored.to_str().unwrap_or_default()))
                        .unwrap_or(stored)
                }
                _ => stored,
            };
            req.headers_mut().insert(COOKIE, merged);
        }

        let jar = self.jar.clone();
        let fut = self.inner.call(req);
        Box::pin(async move {
            let response = fut.await?;
            if let Some(url) = url {
                jar.store_from(&url, response.headers().get_all(SET_COOKIE).iter());
            }
            Ok(response)
        })
    }
}
