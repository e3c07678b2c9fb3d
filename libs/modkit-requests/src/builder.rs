use crate::config::{RedirectConfig, SessionConfig, TlsRootConfig};
use crate::error::HttpError;
use crate::layers::{CookieJar, CookieJarLayer, SecureRedirectPolicy, SessionHeadersLayer};
use crate::options::{RequestConfig, RequestOption};
use crate::proxy::{DirectDialer, Dialer, EnvProxy, ProxyRoute, ProxyRule};
use crate::response::ResponseBody;
use crate::session::Session;
use crate::tls;
use crate::trace::{LogSink, Tracer, default_log_sink};
use crate::transport::{BufferedService, Transport};
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::follow_redirect::FollowRedirectLayer;

/// Builder for a [`Session`].
///
/// Request options given here form the session baseline that every call
/// starts from; the remaining setters configure the transport.
#[must_use]
pub struct SessionBuilder {
    config: SessionConfig,
    baseline: RequestConfig,
    log_sink: Option<LogSink>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            baseline: RequestConfig::default(),
            log_sink: None,
        }
    }

    /// Replace the whole transport configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Add one option to the baseline
    pub fn option(mut self, option: RequestOption) -> Self {
        self.baseline.apply(option);
        self
    }

    /// Add options to the baseline, in order
    pub fn options(mut self, options: impl IntoIterator<Item = RequestOption>) -> Self {
        self.baseline = self.baseline.with(options);
        self
    }

    /// Connection establishment timeout, DNS included
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    /// Baseline whole-call timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.baseline.timeout = timeout;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Route every call through `address` (`http`, `https`, `socks4` or `socks5`)
    pub fn proxy(mut self, address: impl Into<String>) -> Self {
        self.config.proxy = Some(address.into());
        self
    }

    /// Pick up proxies from `HTTP_PROXY`/`HTTPS_PROXY`/`ALL_PROXY` and `NO_PROXY`
    pub fn proxy_from_env(mut self, enabled: bool) -> Self {
        self.config.proxy_from_env = enabled;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn redirect(mut self, redirect: RedirectConfig) -> Self {
        self.config.redirect = redirect;
        self
    }

    /// Return 3xx responses to the caller instead of following them
    pub fn no_redirects(mut self) -> Self {
        self.config.redirect = RedirectConfig::disabled();
        self
    }

    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Queue depth of the request buffer; zero is clamped to one
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// Where traced calls write their diagnostic lines
    pub fn log_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log_sink = Some(Arc::new(sink));
        self
    }

    /// Build the session.
    ///
    /// Must be called inside a Tokio runtime: the request buffer spawns its
    /// worker task here.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy address is invalid, the User-Agent is
    /// not a valid header value, or TLS roots cannot be loaded.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn build(self) -> Result<Session, HttpError> {
        let sink = self.log_sink.unwrap_or_else(default_log_sink);
        Session::from_parts(self.config, self.baseline, sink)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve how the transport reaches destinations
pub(crate) fn proxy_route(config: &SessionConfig) -> Result<ProxyRoute, HttpError> {
    match &config.proxy {
        Some(address) => Ok(ProxyRoute::Fixed(ProxyRule::parse(address)?)),
        None if config.proxy_from_env => {
            Ok(EnvProxy::from_env()?.map_or(ProxyRoute::Direct, ProxyRoute::Env))
        }
        None => Ok(ProxyRoute::Direct),
    }
}

/// Wire a transport for `config` with the given TLS verification and bind
/// address.
///
/// Request flow (outer → inner):
///   Buffer → SessionHeaders → FollowRedirect → CookieJar → hyper client → Dialer
///
/// The cookie jar sits inside redirect following so cookies set by an
/// intermediate hop are sent on the next one.
pub(crate) fn build_transport(
    config: &SessionConfig,
    verify: bool,
    local_address: Option<IpAddr>,
    jar: &CookieJar,
    sink: &LogSink,
) -> Result<Transport, HttpError> {
    let route = proxy_route(config)?;
    let direct = DirectDialer::new(config.dial_timeout, local_address, config.tcp_keepalive);
    let dialer = Dialer::new(route, direct);
    let tls_config = Arc::new(tls::client_config(config.tls_roots, verify)?);

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config.as_ref().clone())
        .https_or_http()
        .enable_all_versions()
        .wrap_connector(dialer.clone());

    // pool_timer is required for pool_idle_timeout to take effect
    let mut client_builder = Client::builder(TokioExecutor::new());
    client_builder.pool_timer(TokioTimer::new()).http2_only(false);
    if config.keep_alive {
        client_builder.pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(idle_timeout) = config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }
    } else {
        client_builder.pool_max_idle_per_host(0);
    }
    let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

    let headers_layer = SessionHeadersLayer::try_new(&config.user_agent, config.keep_alive)?;
    let redirect_policy = SecureRedirectPolicy::new(config.redirect.clone());

    let service = ServiceBuilder::new()
        .layer(headers_layer)
        .layer(FollowRedirectLayer::with_policy(redirect_policy))
        .layer(CookieJarLayer::new(jar.clone()))
        .service(hyper_client)
        .map_response(box_response_body)
        .map_err(HttpError::from)
        .boxed_clone();

    let service: BufferedService = Buffer::new(service, config.buffer_capacity.max(1));

    tracing::debug!(
        keep_alive = config.keep_alive,
        verify,
        proxy = config.proxy.as_deref().unwrap_or("none"),
        "session transport built"
    );

    Ok(Transport {
        service,
        tracer: Tracer::new(Arc::clone(sink), dialer, tls_config),
        verify,
        local_address,
    })
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;

    fn sink() -> LogSink {
        Arc::new(|_: &str| {})
    }

    #[test]
    #[should_panic]
    fn test_build_outside_runtime_panics() {
        let _ = SessionBuilder::new()
            .config(SessionConfig::for_testing())
            .build();
    }

    #[test]
    fn test_builder_defaults() {
        let builder = SessionBuilder::new();
        assert_eq!(builder.config.dial_timeout, Duration::from_secs(30));
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(builder.baseline.timeout, Duration::from_secs(30));
        assert!(builder.log_sink.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let builder = SessionBuilder::new()
            .dial_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(7))
            .keep_alive(false)
            .proxy("socks5://127.0.0.1:1080")
            .no_redirects()
            .buffer_capacity(0)
            .option(RequestOption::header("x-team", "core"))
            .options([RequestOption::param("v", 2), RequestOption::trace(true)]);

        assert_eq!(builder.config.dial_timeout, Duration::from_secs(3));
        assert_eq!(builder.baseline.timeout, Duration::from_secs(7));
        assert!(!builder.config.keep_alive);
        assert_eq!(builder.config.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert_eq!(builder.config.redirect.max_redirects, 0);
        assert_eq!(builder.config.buffer_capacity, 1);
        assert_eq!(builder.baseline.header("x-team"), Some("core"));
        assert_eq!(builder.baseline.params["v"], "2");
        assert!(builder.baseline.trace);
    }

    #[test]
    fn test_proxy_route_rejects_unsupported_scheme() {
        let config = SessionConfig {
            proxy: Some("ftp://proxy.local:21".to_owned()),
            ..Default::default()
        };
        assert!(matches!(
            proxy_route(&config),
            Err(HttpError::UnsupportedProxyScheme { .. })
        ));
    }

    #[test]
    fn test_proxy_route_direct_by_default() {
        assert!(matches!(
            proxy_route(&SessionConfig::default()),
            Ok(ProxyRoute::Direct)
        ));
    }

    #[tokio::test]
    async fn test_build_transport() {
        let transport = build_transport(
            &SessionConfig::for_testing(),
            true,
            None,
            &CookieJar::new(),
            &sink(),
        )
        .unwrap();
        assert!(transport.matches(true, None));
        assert!(!transport.matches(false, None));
    }

    #[tokio::test]
    async fn test_build_transport_without_keep_alive_or_verification() {
        let config = SessionConfig {
            keep_alive: false,
            ..SessionConfig::for_testing()
        };
        let local: IpAddr = "127.0.0.1".parse().unwrap();
        let transport =
            build_transport(&config, false, Some(local), &CookieJar::new(), &sink()).unwrap();
        assert!(transport.matches(false, Some(local)));
    }

    #[tokio::test]
    async fn test_build_transport_invalid_user_agent() {
        let config = SessionConfig {
            user_agent: "invalid\x00agent".to_owned(),
            ..Default::default()
        };
        assert!(build_transport(&config, true, None, &CookieJar::new(), &sink()).is_err());
    }

    #[tokio::test]
    async fn test_build_native_roots() {
        let config = SessionConfig {
            tls_roots: TlsRootConfig::Native,
            ..Default::default()
        };
        // Minimal containers may have no OS certificates
        match build_transport(&config, true, None, &CookieJar::new(), &sink()) {
            Ok(_) | Err(HttpError::Tls(_)) => {}
            Err(other) => panic!("Unexpected error type: {other:?}"),
        }
    }
}
