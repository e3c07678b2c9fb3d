use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent string for outgoing requests
pub const DEFAULT_USER_AGENT: &str = concat!("modkit-requests/", env!("CARGO_PKG_VERSION"));

/// How the pooled path treats 3xx responses.
///
/// Traced calls never follow redirects.
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Hop limit per call; `0` hands every 3xx back to the caller (default: 10)
    pub max_redirects: usize,

    /// Refuse hops that leave the scheme, host and port of the previous URL,
    /// except towards `allowed_redirect_hosts` (default: false)
    pub same_origin_only: bool,

    /// Bare host names exempt from `same_origin_only`
    pub allowed_redirect_hosts: HashSet<String>,

    /// Drop credentials and cookies once a chain crosses origin (default: true)
    pub strip_sensitive_headers: bool,

    /// Follow `https` to `http` hops (default: false)
    pub allow_https_downgrade: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            same_origin_only: false,
            allowed_redirect_hosts: HashSet::new(),
            strip_sensitive_headers: true,
            allow_https_downgrade: false,
        }
    }
}

impl RedirectConfig {
    #[must_use]
    pub fn same_origin() -> Self {
        Self {
            same_origin_only: true,
            ..Self::default()
        }
    }

    /// Never follow; the caller sees the 3xx response
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_redirects: 0,
            ..Self::default()
        }
    }

    /// Follows downgrades too, for plain-HTTP mock servers behind HTTPS URLs
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            allow_https_downgrade: true,
            ..Self::default()
        }
    }
}

/// Where trusted root certificates come from when TLS verification is on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Bundled Mozilla roots from `webpki-roots`
    #[default]
    WebPki,
    /// The operating system's certificate store
    Native,
}

/// Transport-level settings owned by a [`Session`](crate::Session).
///
/// Changing any of these after construction rebuilds the transport; calls
/// already in flight finish on the transport they started with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connection establishment timeout, DNS included (default: 30 seconds)
    pub dial_timeout: Duration,

    /// Enable TCP keepalive probes on dialed sockets (default: true)
    pub tcp_keepalive: bool,

    /// Reuse connections across calls (default: true)
    ///
    /// When `false`, idle pooling is disabled and every request carries
    /// `Connection: close`.
    pub keep_alive: bool,

    /// Timeout for idle pooled connections (default: 90 seconds)
    ///
    /// Set to `None` to use hyper-util's default idle timeout.
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,

    /// User-Agent header value, added when the request has none
    pub user_agent: String,

    /// Redirect policy for the pooled path
    pub redirect: RedirectConfig,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Buffer capacity for concurrent request handling (default: 1024)
    ///
    /// Requests beyond this many queued calls fail fast with
    /// `HttpError::Overloaded`.
    pub buffer_capacity: usize,

    /// Proxy address (`http`, `https`, `socks4` or `socks5` scheme)
    pub proxy: Option<String>,

    /// Read the proxy from `HTTPS_PROXY`/`HTTP_PROXY`/`ALL_PROXY` when
    /// `proxy` is unset, honoring `NO_PROXY` (default: false)
    pub proxy_from_env: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(30),
            tcp_keepalive: true,
            keep_alive: true,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            redirect: RedirectConfig::default(),
            tls_roots: TlsRootConfig::default(),
            buffer_capacity: 1024,
            proxy: None,
            proxy_from_env: false,
        }
    }
}

impl SessionConfig {
    /// Small pool, short dial timeout, no redirects
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 4,
            redirect: RedirectConfig::disabled(),
            buffer_capacity: 64,
            ..Default::default()
        }
    }

    /// Configuration for local mock servers
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            redirect: RedirectConfig::for_testing(),
            buffer_capacity: 256,
            ..Default::default()
        }
    }
}
