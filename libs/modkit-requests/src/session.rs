//! The session: a baseline request configuration plus a shared transport.
//!
//! Every call starts from a private copy of the baseline, so concurrent
//! calls never observe each other's options. The baseline lock is held only
//! for the copy.

use crate::builder::{SessionBuilder, build_transport};
use crate::config::SessionConfig;
use crate::context::CallContext;
use crate::error::{ExecuteError, HttpError};
use crate::layers::CookieJar;
use crate::multipart::MultipartForm;
use crate::options::{Body, RequestConfig, RequestOption};
use crate::proxy::ProxyRule;
use crate::request::{FORM_CONTENT_TYPE, build_request};
use crate::response::{RequestSnapshot, Response};
use crate::trace::LogSink;
use crate::transport::Transport;
use arc_swap::ArcSwap;
use chrono::Local;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Content type used by [`Session::upload`]
pub const UPLOAD_CONTENT_TYPE: &str = "binary/octet-stream";

/// HTTP session with a baseline configuration, a cookie jar and a pooled
/// transport.
///
/// `Session` is `Clone + Send + Sync`; clones share baseline, jar and
/// transport. Construct with [`Session::builder`] inside a Tokio runtime.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    baseline: Mutex<RequestConfig>,
    settings: Mutex<SessionConfig>,
    transport: ArcSwap<Transport>,
    /// Last one-off transport built for a call whose TLS verification or
    /// bind address differs from the shared one
    dedicated: Mutex<Option<Arc<Transport>>>,
    jar: CookieJar,
    log_sink: LogSink,
}

impl Session {
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Session with default settings.
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn new() -> Result<Self, HttpError> {
        SessionBuilder::new().build()
    }

    pub(crate) fn from_parts(
        settings: SessionConfig,
        baseline: RequestConfig,
        log_sink: LogSink,
    ) -> Result<Self, HttpError> {
        let jar = CookieJar::new();
        let transport = build_transport(
            &settings,
            baseline.verify,
            baseline.local_address,
            &jar,
            &log_sink,
        )?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                baseline: Mutex::new(baseline),
                settings: Mutex::new(settings),
                transport: ArcSwap::from_pointee(transport),
                dedicated: Mutex::new(None),
                jar,
                log_sink,
            }),
        })
    }

    /// Execute one call: baseline copy, `options` applied in order, request
    /// assembled and sent, body read.
    ///
    /// The observer configured for the call (if any) is invoked exactly once,
    /// on success and on failure alike.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] carrying the failure and the partially
    /// populated response when assembly, the network, the body read, `ctx`
    /// cancellation, its deadline or the call timeout fails the call. HTTP
    /// error statuses are not failures.
    pub async fn execute(
        &self,
        ctx: &CallContext,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, ExecuteError> {
        let snapshot = self.inner.baseline.lock().clone();
        let config = snapshot.with(options);

        let span = tracing::info_span!(
            "outgoing_request",
            http.method = %config.method,
            http.url = %strip_query(&config.url),
            http.status_code = tracing::field::Empty,
        );
        self.run(ctx, config).instrument(span).await
    }

    async fn run(&self, ctx: &CallContext, config: RequestConfig) -> Result<Response, ExecuteError> {
        let start_at = Local::now();
        let started = Instant::now();

        let request = match build_request(&config) {
            Ok(request) => request,
            Err(e) => {
                let response =
                    Response::new(start_at, started, None, config.retry).failed(Arc::new(e));
                return finish(&config, response);
            }
        };

        let response = Response::new(
            start_at,
            started,
            Some(RequestSnapshot::of(&request)),
            config.retry,
        );
        let transport = match self.transport_for(&config) {
            Ok(transport) => transport,
            Err(e) => return finish(&config, response.failed(Arc::new(e))),
        };

        let guard_started = tokio::time::Instant::now();
        let timeout = (!config.timeout.is_zero())
            .then(|| (guard_started + config.timeout, config.timeout));

        let sent = ctx
            .guard(guard_started, timeout, async {
                if config.trace {
                    transport.send_traced(request).await
                } else {
                    transport.send(request).await
                }
            })
            .await
            .and_then(std::convert::identity);

        let response = match sent {
            Ok(received) => {
                let response = response.received(received);
                if let Err(e) = ctx
                    .guard(guard_started, timeout, response.unpack_body())
                    .await
                {
                    response.interrupt_body(Arc::new(e));
                }
                response
            }
            Err(e) => response.failed(Arc::new(e)),
        };

        finish(&config, response)
    }

    /// The shared transport, or a one-off transport when the call asks for
    /// TLS verification or a bind address the shared one was not built with.
    ///
    /// The last one-off transport is kept and reused by later calls with the
    /// same verification and bind address until the settings change.
    fn transport_for(&self, config: &RequestConfig) -> Result<Arc<Transport>, HttpError> {
        let current = self.inner.transport.load_full();
        if current.matches(config.verify, config.local_address) {
            return Ok(current);
        }

        let mut dedicated = self.inner.dedicated.lock();
        if let Some(transport) = dedicated
            .as_ref()
            .filter(|t| t.matches(config.verify, config.local_address))
        {
            return Ok(Arc::clone(transport));
        }

        tracing::debug!(
            verify = config.verify,
            local_address = ?config.local_address,
            "building dedicated transport for call"
        );
        let settings = self.inner.settings.lock().clone();
        let transport = Arc::new(build_transport(
            &settings,
            config.verify,
            config.local_address,
            &self.inner.jar,
            &self.inner.log_sink,
        )?);
        *dedicated = Some(Arc::clone(&transport));
        Ok(transport)
    }

    /// Build a new transport from the current settings with `update` applied,
    /// then swap it in. Calls already in flight keep the old one.
    fn rebuild(&self, update: impl FnOnce(&mut SessionConfig)) -> Result<(), HttpError> {
        let (verify, local_address) = {
            let baseline = self.inner.baseline.lock();
            (baseline.verify, baseline.local_address)
        };

        let mut dedicated = self.inner.dedicated.lock();
        let mut settings = self.inner.settings.lock();
        let mut next = settings.clone();
        update(&mut next);
        let transport = build_transport(
            &next,
            verify,
            local_address,
            &self.inner.jar,
            &self.inner.log_sink,
        )?;
        *settings = next;
        self.inner.transport.store(Arc::new(transport));
        *dedicated = None;
        Ok(())
    }

    /// Route all later calls through the proxy at `address`.
    ///
    /// Supported schemes are `http`, `https`, `socks4` and `socks5`. The
    /// address is validated before anything changes; on error the session
    /// keeps its current route. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// `HttpError::EmptyProxy`, `HttpError::UnsupportedProxyScheme` or
    /// `HttpError::InvalidProxy` for a bad address.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn set_proxy(&self, address: &str) -> Result<(), HttpError> {
        let rule = ProxyRule::parse(address)?;
        tracing::debug!(proxy = %rule.uri(), "session proxy updated");
        let address = address.trim().to_owned();
        self.rebuild(|settings| settings.proxy = Some(address))
    }

    /// Go back to direct connections
    ///
    /// # Errors
    /// Returns an error if the transport cannot be rebuilt
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn clear_proxy(&self) -> Result<(), HttpError> {
        self.rebuild(|settings| settings.proxy = None)
    }

    /// Enable or disable connection reuse for later calls.
    ///
    /// # Errors
    /// Returns an error if the transport cannot be rebuilt
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn set_keep_alive(&self, keep_alive: bool) -> Result<(), HttpError> {
        self.rebuild(|settings| settings.keep_alive = keep_alive)
    }

    /// Set the baseline whole-call timeout; zero disables it
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.baseline.lock().timeout = timeout;
    }

    /// Set the connection establishment timeout for later calls.
    ///
    /// # Errors
    /// Returns an error if the transport cannot be rebuilt
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn set_dial_timeout(&self, timeout: Duration) -> Result<(), HttpError> {
        self.rebuild(|settings| settings.dial_timeout = timeout)
    }

    /// Apply `options` to the baseline; later calls start from the result.
    ///
    /// Changing TLS verification or the bind address rebuilds the transport.
    ///
    /// # Errors
    /// Returns an error if the transport cannot be rebuilt
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime when TLS verification or the
    /// bind address changes.
    pub fn update_baseline(
        &self,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<(), HttpError> {
        let options: Vec<RequestOption> = options.into_iter().collect();
        let transport_changed = {
            let mut baseline = self.inner.baseline.lock();
            let before = (baseline.verify, baseline.local_address);
            for option in options {
                baseline.apply(option);
            }
            before != (baseline.verify, baseline.local_address)
        };

        if transport_changed {
            self.rebuild(|_| {})?;
        }
        Ok(())
    }

    /// Copy of the current baseline
    #[must_use]
    pub fn baseline(&self) -> RequestConfig {
        self.inner.baseline.lock().clone()
    }

    /// Copy of the current transport settings
    #[must_use]
    pub fn settings(&self) -> SessionConfig {
        self.inner.settings.lock().clone()
    }

    /// Cookies collected from responses on the pooled path
    #[must_use]
    pub fn cookie_jar(&self) -> &CookieJar {
        &self.inner.jar
    }

    /// Send `body` with an explicit method and `Content-Type`.
    ///
    /// # Errors
    /// See [`Session::execute`]
    pub async fn do_request(
        &self,
        method: &str,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response, ExecuteError> {
        self.do_request_with_context(&CallContext::background(), method, url, content_type, body)
            .await
    }

    /// [`Session::do_request`] bound to `ctx`
    ///
    /// # Errors
    /// See [`Session::execute`]
    pub async fn do_request_with_context(
        &self,
        ctx: &CallContext,
        method: &str,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response, ExecuteError> {
        self.execute(
            ctx,
            [
                RequestOption::method(method),
                RequestOption::url(url),
                RequestOption::header("content-type", content_type),
                RequestOption::body(body),
            ],
        )
        .await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn get(&self, url: &str) -> Result<Response, ExecuteError> {
        self.get_with_context(&CallContext::background(), url).await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn get_with_context(
        &self,
        ctx: &CallContext,
        url: &str,
    ) -> Result<Response, ExecuteError> {
        self.execute(ctx, [RequestOption::method("GET"), RequestOption::url(url)])
            .await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn head(&self, url: &str) -> Result<Response, ExecuteError> {
        self.head_with_context(&CallContext::background(), url).await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn head_with_context(
        &self,
        ctx: &CallContext,
        url: &str,
    ) -> Result<Response, ExecuteError> {
        self.execute(ctx, [RequestOption::method("HEAD"), RequestOption::url(url)])
            .await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response, ExecuteError> {
        self.do_request("POST", url, content_type, body).await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn post_with_context(
        &self,
        ctx: &CallContext,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response, ExecuteError> {
        self.do_request_with_context(ctx, "POST", url, content_type, body)
            .await
    }

    /// POST `fields` URL-encoded
    ///
    /// # Errors
    /// See [`Session::execute`]
    pub async fn post_form<K, V>(
        &self,
        url: &str,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Response, ExecuteError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.post_form_with_context(&CallContext::background(), url, fields)
            .await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn post_form_with_context<K, V>(
        &self,
        ctx: &CallContext,
        url: &str,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Response, ExecuteError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.post_with_context(ctx, url, FORM_CONTENT_TYPE, Body::form(fields))
            .await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn put(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response, ExecuteError> {
        self.do_request("PUT", url, content_type, body).await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn put_with_context(
        &self,
        ctx: &CallContext,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response, ExecuteError> {
        self.do_request_with_context(ctx, "PUT", url, content_type, body)
            .await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn delete(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response, ExecuteError> {
        self.do_request("DELETE", url, content_type, body).await
    }

    /// # Errors
    /// See [`Session::execute`]
    pub async fn delete_with_context(
        &self,
        ctx: &CallContext,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response, ExecuteError> {
        self.do_request_with_context(ctx, "DELETE", url, content_type, body)
            .await
    }

    /// POST the contents of `file` as `binary/octet-stream`.
    ///
    /// # Errors
    /// `HttpError::Io` (inside [`ExecuteError`]) if the file cannot be read,
    /// otherwise see [`Session::execute`]
    pub async fn upload(&self, url: &str, file: impl AsRef<Path>) -> Result<Response, ExecuteError> {
        let content = tokio::fs::read(file).await.map_err(local_failure)?;
        self.post(url, UPLOAD_CONTENT_TYPE, content).await
    }

    /// POST `file` as a `multipart/form-data` form.
    ///
    /// The file goes in a part named `file` whose file name is
    /// `fields["filename"]` (empty when absent); every entry of `fields` is
    /// also sent as a plain form field.
    ///
    /// # Errors
    /// `HttpError::Io` (inside [`ExecuteError`]) if the file cannot be read,
    /// otherwise see [`Session::execute`]
    pub async fn upload_multipart<K, V>(
        &self,
        url: &str,
        file: impl AsRef<Path>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Response, ExecuteError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let content = tokio::fs::read(file).await.map_err(local_failure)?;
        let fields: Vec<(K, V)> = fields.into_iter().collect();
        let file_name = fields
            .iter()
            .find(|(k, _)| k.as_ref() == "filename")
            .map_or("", |(_, v)| v.as_ref());

        let mut form = MultipartForm::new();
        form.file("file", file_name, &content);
        for (name, value) in &fields {
            form.field(name.as_ref(), value.as_ref());
        }
        let content_type = form.content_type();
        self.post(url, &content_type, form.finish()).await
    }
}

/// Hand the finished call to its observer and split success from failure
fn finish(config: &RequestConfig, response: Response) -> Result<Response, ExecuteError> {
    if let Some(observer) = &config.observer {
        observer(&response.stat());
    }

    if let Some(status) = response.status() {
        tracing::Span::current().record("http.status_code", status.as_u16());
    }

    match response.shared_error() {
        Some(error) => {
            tracing::warn!(
                error = %error,
                elapsed_ms = response.elapsed().as_millis(),
                "request failed"
            );
            Err(ExecuteError::new(error, response))
        }
        None => {
            tracing::debug!(
                status = response.status().map(|s| s.as_u16()),
                elapsed_ms = response.elapsed().as_millis(),
                "request completed"
            );
            Ok(response)
        }
    }
}

/// Failure before any request exists (reading an upload file)
fn local_failure(err: std::io::Error) -> ExecuteError {
    let error = Arc::new(HttpError::Io(err));
    let response = Response::new(Local::now(), Instant::now(), None, 0).failed(Arc::clone(&error));
    ExecuteError::new(error, response)
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("baseline", &*self.inner.baseline.lock())
            .field("settings", &*self.inner.settings.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::stat::ExecutionStat;
    use httpmock::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session() -> Session {
        Session::builder()
            .config(SessionConfig::for_testing())
            .build()
            .unwrap()
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query("http://h/p?x=1#f"), "http://h/p");
        assert_eq!(strip_query("http://h/p"), "http://h/p");
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/hello");
            then.status(200).body("world");
        });

        let response = session().get(&server.url("/hello")).await.unwrap();
        mock.assert_async().await;
        assert_eq!(response.status().map(|s| s.as_u16()), Some(200));
        assert_eq!(response.text(), "world");
        assert_eq!(response.content_length(), Some(5));
    }

    #[tokio::test]
    async fn test_error_status_is_not_a_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/missing");
            then.status(404).body("nope");
        });

        let response = session().get(&server.url("/missing")).await.unwrap();
        assert_eq!(response.status().map(|s| s.as_u16()), Some(404));
        assert!(response.error().is_none());
    }

    #[tokio::test]
    async fn test_baseline_and_call_options_merge() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/items")
                .query_param("page", "2")
                .header("x-team", "core")
                .header("x-call", "yes");
            then.status(200);
        });

        let session = Session::builder()
            .config(SessionConfig::for_testing())
            .options([
                RequestOption::url(server.base_url()),
                RequestOption::header("x-team", "core"),
            ])
            .build()
            .unwrap();

        session
            .execute(
                &CallContext::background(),
                [
                    RequestOption::path("/v1"),
                    RequestOption::path("/items"),
                    RequestOption::param("page", 2),
                    RequestOption::header("x-call", "yes"),
                ],
            )
            .await
            .unwrap();
        mock.assert_async().await;

        let baseline = session.baseline();
        assert!(baseline.path.is_empty());
        assert!(baseline.header("x-call").is_none());
    }

    #[tokio::test]
    async fn test_assembly_failure_calls_observer_without_network() {
        let seen = Arc::new(Mutex::new(Vec::<ExecutionStat>::new()));
        let captured = Arc::clone(&seen);

        let err = session()
            .execute(
                &CallContext::background(),
                [
                    RequestOption::url("not a url"),
                    RequestOption::observer(move |stat| captured.lock().push(stat.clone())),
                ],
            )
            .await
            .unwrap_err();

        assert!(err.error().is_assembly());
        assert!(err.response().request().is_none());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].error.is_empty());
    }

    #[tokio::test]
    async fn test_observer_fires_once_on_success() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/stat");
            then.status(201).json_body(serde_json::json!({"id": 7}));
        });

        let calls = Arc::new(AtomicUsize::new(0));
        let status = Arc::new(AtomicUsize::new(0));
        let (c, s) = (Arc::clone(&calls), Arc::clone(&status));

        session()
            .execute(
                &CallContext::background(),
                [
                    RequestOption::url(server.url("/stat")),
                    RequestOption::retry(3),
                    RequestOption::observer(move |stat| {
                        c.fetch_add(1, Ordering::SeqCst);
                        s.store(usize::from(stat.response.status_code), Ordering::SeqCst);
                        assert_eq!(stat.retry, 3);
                        assert_eq!(stat.response.body["id"], 7);
                    }),
                ],
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(status.load(Ordering::SeqCst), 201);
    }

    #[tokio::test]
    async fn test_set_proxy_rejects_unsupported_scheme() {
        let session = session();
        let err = session.set_proxy("ftp://proxy.local:21").unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedProxyScheme { .. }));
        assert!(session.settings().proxy.is_none());

        assert!(matches!(session.set_proxy(""), Err(HttpError::EmptyProxy)));
    }

    #[tokio::test]
    async fn test_set_proxy_and_clear() {
        let session = session();
        session.set_proxy("socks5://127.0.0.1:1080").unwrap();
        assert_eq!(
            session.settings().proxy.as_deref(),
            Some("socks5://127.0.0.1:1080")
        );
        session.clear_proxy().unwrap();
        assert!(session.settings().proxy.is_none());
    }

    #[tokio::test]
    async fn test_settings_updates() {
        let session = session();
        session.set_keep_alive(false).unwrap();
        session.set_dial_timeout(Duration::from_secs(2)).unwrap();
        session.set_timeout(Duration::from_secs(9));

        assert!(!session.settings().keep_alive);
        assert_eq!(session.settings().dial_timeout, Duration::from_secs(2));
        assert_eq!(session.baseline().timeout, Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_update_baseline() {
        let session = session();
        session
            .update_baseline([RequestOption::header("x-a", "1"), RequestOption::verify(false)])
            .unwrap();

        let baseline = session.baseline();
        assert_eq!(baseline.header("x-a"), Some("1"));
        assert!(!baseline.verify);
        assert!(session.inner.transport.load().matches(false, None));
    }

    #[tokio::test]
    async fn test_post_form() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/form")
                .header("content-type", FORM_CONTENT_TYPE)
                .body("a=1&b=two+words");
            then.status(200);
        });

        session()
            .post_form(&server.url("/form"), [("a", "1"), ("b", "two words")])
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = session()
            .upload("http://127.0.0.1:1/", dir.path().join("absent.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err.error(), HttpError::Io(_)));
    }

    #[tokio::test]
    async fn test_upload_multipart() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/upload")
                .header_exists("content-type")
                .body_includes("filename=\"data.txt\"")
                .body_includes("file contents")
                .body_includes("name=\"owner\"");
            then.status(200);
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "file contents").unwrap();

        session()
            .upload_multipart(
                &server.url("/upload"),
                &path,
                [("filename", "data.txt"), ("owner", "ops")],
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_dedicated_transport_is_reused_until_settings_change() {
        let session = session();
        let insecure = {
            let mut config = session.baseline();
            config.apply(RequestOption::verify(false));
            config
        };

        let shared = session.inner.transport.load_full();
        let first = session.transport_for(&insecure).unwrap();
        let second = session.transport_for(&insecure).unwrap();
        assert!(!Arc::ptr_eq(&shared, &first));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(
            &shared,
            &session.transport_for(&session.baseline()).unwrap()
        ));

        session.set_keep_alive(false).unwrap();
        let rebuilt = session.transport_for(&insecure).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert!(Arc::ptr_eq(
            &rebuilt,
            &session.transport_for(&insecure).unwrap()
        ));
    }

    #[tokio::test]
    async fn test_repeated_unverified_calls_share_transport() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/insecure");
            then.status(200).body("ok");
        });

        let session = session();
        for _ in 0..3 {
            let response = session
                .execute(
                    &CallContext::background(),
                    [
                        RequestOption::url(server.url("/insecure")),
                        RequestOption::verify(false),
                    ],
                )
                .await
                .unwrap();
            assert_eq!(response.text(), "ok");
        }
        mock.assert_calls(3);
        assert!(session.inner.dedicated.lock().is_some());
    }
}
