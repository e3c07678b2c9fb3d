//! Request configuration and the options that mutate it.
//!
//! A [`RequestConfig`] is a plain value: cloning it reallocates every map and
//! sequence so one holder's later mutation never shows up in another holder's
//! copy. [`RequestOption`]s are tagged mutation records folded over a config
//! by [`apply_options`]. Setters are last-write-wins, adders accumulate.

use crate::stat::ExecutionStat;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Default request method
pub const DEFAULT_METHOD: &str = "GET";

/// Default per-call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Post-execution callback invoked with the statistics of every call
pub type Observer = Arc<dyn Fn(&ExecutionStat) + Send + Sync>;

type JsonEncoder = Arc<dyn Fn() -> serde_json::Result<Vec<u8>> + Send + Sync>;

/// A single request cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Request body value.
///
/// Encoding is deferred to request assembly, see [`encode_body`](crate::encode_body).
#[derive(Clone)]
#[non_exhaustive]
pub enum Body {
    /// Raw bytes, sent unchanged
    Bytes(Bytes),
    /// UTF-8 text, sent unchanged
    Text(String),
    /// URL-encoded form fields
    Form(Vec<(String, String)>),
    /// Any serializable value, encoded as JSON
    Json(JsonBody),
}

/// Deferred JSON serialization of a caller value
#[derive(Clone)]
pub struct JsonBody(JsonEncoder);

impl JsonBody {
    pub(crate) fn encode(&self) -> serde_json::Result<Vec<u8>> {
        (self.0)()
    }
}

impl Body {
    /// Wrap a serializable value; serialization happens when the request is assembled
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Body::Json(JsonBody(Arc::new(move || serde_json::to_vec(&value))))
    }

    /// Build a form body from key/value pairs
    pub fn form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Body::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Body::Form(fields) => f.debug_tuple("Form").field(fields).finish(),
            Body::Json(_) => f.write_str("Json(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(value))
    }
}

impl From<&'static [u8]> for Body {
    fn from(value: &'static [u8]) -> Self {
        Body::Bytes(Bytes::from_static(value))
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_owned())
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::json(value)
    }
}

/// The full set of request-shaping settings for one (potential) call
#[derive(Clone)]
pub struct RequestConfig {
    /// HTTP method (default: `GET`)
    pub method: String,
    /// Base URL
    pub url: String,
    /// Raw path segments concatenated onto the URL path, no normalization
    pub path: Vec<String>,
    /// Query parameters, values already rendered to strings
    pub params: BTreeMap<String, String>,
    /// Headers keyed by lowercase name, multi-valued
    pub headers: BTreeMap<String, Vec<String>>,
    /// Cookies attached to the `Cookie` header in order
    pub cookies: Vec<Cookie>,
    pub body: Option<Body>,
    /// Whole-call timeout including body read (default: 30s, zero disables)
    pub timeout: Duration,
    /// Run the call through the tracer
    pub trace: bool,
    /// Verify TLS certificates (default: true)
    pub verify: bool,
    /// Local address to bind outgoing connections to
    pub local_address: Option<IpAddr>,
    pub observer: Option<Observer>,
    /// Informational retry count, reported in [`ExecutionStat`]
    pub retry: u32,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            method: DEFAULT_METHOD.to_owned(),
            url: String::new(),
            path: Vec::new(),
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            cookies: Vec::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
            trace: false,
            verify: true,
            local_address: None,
            observer: None,
            retry: 0,
        }
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("body", &self.body)
            .field("timeout", &self.timeout)
            .field("trace", &self.trace)
            .field("verify", &self.verify)
            .field("local_address", &self.local_address)
            .field("observer", &self.observer.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

impl RequestConfig {
    /// Apply a single option in place
    pub fn apply(&mut self, option: RequestOption) {
        match option {
            RequestOption::Method(method) => self.method = method,
            RequestOption::Url(url) => self.url = url,
            RequestOption::Path(segment) => self.path.push(segment),
            RequestOption::Param(key, value) => {
                self.params.insert(key, value);
            }
            RequestOption::Params(pairs) => self.params.extend(pairs),
            RequestOption::Header(name, value) => {
                self.headers.insert(name.to_ascii_lowercase(), vec![value]);
            }
            RequestOption::AddHeader(name, value) => self.add_header(&name, value),
            RequestOption::Headers(pairs) => {
                for (name, value) in pairs {
                    self.add_header(&name, value);
                }
            }
            RequestOption::Cookie(cookie) => self.cookies.push(cookie),
            RequestOption::Cookies(cookies) => self.cookies.extend(cookies),
            RequestOption::Body(body) => self.body = Some(body),
            RequestOption::BasicAuth { user, password } => {
                let token = STANDARD.encode(format!("{user}:{password}"));
                self.headers
                    .insert("authorization".to_owned(), vec![format!("Basic {token}")]);
            }
            RequestOption::Timeout(timeout) => self.timeout = timeout,
            RequestOption::Trace(trace) => self.trace = trace,
            RequestOption::Verify(verify) => self.verify = verify,
            RequestOption::LocalAddress(addr) => self.local_address = addr,
            RequestOption::Observer(observer) => self.observer = observer,
            RequestOption::Retry(retry) => self.retry = retry,
        }
    }

    /// Apply options in order and return the mutated config
    #[must_use]
    pub fn with(mut self, options: impl IntoIterator<Item = RequestOption>) -> Self {
        for option in options {
            self.apply(option);
        }
        self
    }

    /// First value of a header, by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    fn add_header(&mut self, name: &str, value: String) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value);
    }
}

/// Return a copy of `base` with every option applied in sequence order.
///
/// `base` is never touched; the observer callback is shared with the copy,
/// everything else is reallocated.
#[must_use]
pub fn apply_options(
    base: &RequestConfig,
    options: impl IntoIterator<Item = RequestOption>,
) -> RequestConfig {
    base.clone().with(options)
}

/// A deferred mutation of a [`RequestConfig`]
#[derive(Clone)]
#[non_exhaustive]
pub enum RequestOption {
    Method(String),
    Url(String),
    /// Append a raw path segment
    Path(String),
    /// Set one query parameter
    Param(String, String),
    /// Set several query parameters
    Params(Vec<(String, String)>),
    /// Replace all values of a header
    Header(String, String),
    /// Append a header value
    AddHeader(String, String),
    /// Append several header values
    Headers(Vec<(String, String)>),
    Cookie(Cookie),
    Cookies(Vec<Cookie>),
    Body(Body),
    BasicAuth {
        user: String,
        password: String,
    },
    Timeout(Duration),
    Trace(bool),
    Verify(bool),
    LocalAddress(Option<IpAddr>),
    Observer(Option<Observer>),
    Retry(u32),
}

impl RequestOption {
    pub fn method(method: impl Into<String>) -> Self {
        Self::Method(method.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn path(segment: impl Into<String>) -> Self {
        Self::Path(segment.into())
    }

    /// Set a query parameter; the value is rendered with its `Display` form
    pub fn param(key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::Param(key.into(), value.to_string())
    }

    pub fn params<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: fmt::Display,
    {
        Self::Params(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        )
    }

    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Header(name.into(), value.into())
    }

    pub fn add_header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::AddHeader(name.into(), value.into())
    }

    pub fn headers<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Headers(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn cookie(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Cookie(Cookie::new(name, value))
    }

    pub fn cookies(cookies: impl IntoIterator<Item = Cookie>) -> Self {
        Self::Cookies(cookies.into_iter().collect())
    }

    pub fn body(body: impl Into<Body>) -> Self {
        Self::Body(body.into())
    }

    /// JSON body from any serializable value
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self::Body(Body::json(value))
    }

    /// URL-encoded form body
    pub fn form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Body(Body::form(fields))
    }

    pub fn basic_auth(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::BasicAuth {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout(timeout)
    }

    pub fn trace(trace: bool) -> Self {
        Self::Trace(trace)
    }

    /// Toggle TLS certificate verification
    pub fn verify(verify: bool) -> Self {
        Self::Verify(verify)
    }

    pub fn local_address(addr: IpAddr) -> Self {
        Self::LocalAddress(Some(addr))
    }

    pub fn observer(observer: impl Fn(&ExecutionStat) + Send + Sync + 'static) -> Self {
        Self::Observer(Some(Arc::new(observer)))
    }

    pub fn retry(retry: u32) -> Self {
        Self::Retry(retry)
    }
}

impl fmt::Debug for RequestOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(m) => f.debug_tuple("Method").field(m).finish(),
            Self::Url(u) => f.debug_tuple("Url").field(u).finish(),
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Param(k, v) => f.debug_tuple("Param").field(k).field(v).finish(),
            Self::Params(p) => f.debug_tuple("Params").field(p).finish(),
            Self::Header(k, v) => f.debug_tuple("Header").field(k).field(v).finish(),
            Self::AddHeader(k, v) => f.debug_tuple("AddHeader").field(k).field(v).finish(),
            Self::Headers(h) => f.debug_tuple("Headers").field(h).finish(),
            Self::Cookie(c) => f.debug_tuple("Cookie").field(c).finish(),
            Self::Cookies(c) => f.debug_tuple("Cookies").field(c).finish(),
            Self::Body(b) => f.debug_tuple("Body").field(b).finish(),
            Self::BasicAuth { user, .. } => f
                .debug_struct("BasicAuth")
                .field("user", user)
                .finish_non_exhaustive(),
            Self::Timeout(t) => f.debug_tuple("Timeout").field(t).finish(),
            Self::Trace(t) => f.debug_tuple("Trace").field(t).finish(),
            Self::Verify(v) => f.debug_tuple("Verify").field(v).finish(),
            Self::LocalAddress(a) => f.debug_tuple("LocalAddress").field(a).finish(),
            Self::Observer(o) => f.debug_tuple("Observer").field(&o.is_some()).finish(),
            Self::Retry(r) => f.debug_tuple("Retry").field(r).finish(),
        }
    }
}
