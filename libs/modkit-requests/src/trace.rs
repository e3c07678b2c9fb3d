//! Traced execution: one dedicated connection per call with every lifecycle
//! step written to a [`LogSink`].
//!
//! Traced calls skip the pooled stack (redirects, cookie jar, User-Agent):
//! the request is sent exactly as assembled and the wire dumps show what
//! actually went out and came back.

use crate::dump::{dump_request, dump_response};
use crate::error::HttpError;
use crate::proxy::Dialer;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::header::HOST;
use http::{HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::MaybeHttpsStream;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

/// Byte budget for a single dump line block before it is truncated
pub const DUMP_BUDGET: usize = 9999;

/// Destination for trace lines
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Sink that forwards every trace line to `tracing` at INFO level
#[must_use]
pub fn default_log_sink() -> LogSink {
    Arc::new(|line: &str| {
        tracing::info!(target: "modkit_requests::trace", "{line}");
    })
}

/// Prefix every line of `content` with `prompt`, escaping `%` as `%%`.
///
/// Output longer than [`DUMP_BUDGET`] bytes is cut at the budget and
/// suffixed with `...[Len=N, Truncated]`, where `N` is the full length.
#[must_use]
pub fn show(content: &[u8], prompt: &str) -> String {
    let text = String::from_utf8_lossy(content);
    let mut out = String::with_capacity(text.len() + prompt.len());
    for line in text.split('\n') {
        out.push_str(prompt);
        out.push_str(&line.replace('%', "%%"));
        out.push('\n');
    }

    if out.len() > DUMP_BUDGET {
        let full_len = out.len();
        let mut cut = DUMP_BUDGET;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        let _ = write!(out, "...[Len={full_len}, Truncated]");
    }
    out
}

fn describe_err(err: Option<&io::Error>) -> String {
    err.map_or_else(|| "none".to_owned(), ToString::to_string)
}

/// Connection lifecycle callbacks used by the dialer during a traced call
pub(crate) struct TraceHooks {
    sink: LogSink,
    endpoints: Mutex<Option<(SocketAddr, SocketAddr)>>,
}

impl TraceHooks {
    pub(crate) fn new(sink: LogSink) -> Self {
        Self {
            sink,
            endpoints: Mutex::new(None),
        }
    }

    fn emit(&self, line: &str) {
        (self.sink)(line);
    }

    pub(crate) fn get_conn(&self, host_port: &str) {
        self.emit(&format!("* Connect: {host_port}"));
    }

    pub(crate) fn dns_start(&self, host: &str) {
        self.emit(&format!("* Resolved Host: {host}"));
    }

    pub(crate) fn dns_done(&self, addrs: &[SocketAddr], err: Option<&io::Error>) {
        let ips: Vec<String> = addrs.iter().map(|a| a.ip().to_string()).collect();
        self.emit(&format!(
            "* Resolved DNS: [{}], Coalesced: false, err={}",
            ips.join(" "),
            describe_err(err)
        ));
    }

    pub(crate) fn connect_start(&self, addr: SocketAddr) {
        self.emit(&format!("* Trying tcp {addr}..."));
    }

    pub(crate) fn connect_done(&self, addr: SocketAddr, err: Option<&io::Error>) {
        self.emit(&format!(
            "* Completed connection: tcp {addr}, err={}",
            describe_err(err)
        ));
    }

    pub(crate) fn record_endpoints(&self, local: SocketAddr, remote: SocketAddr) {
        *self.endpoints.lock() = Some((local, remote));
    }

    fn got_conn(&self) {
        if let Some((local, remote)) = *self.endpoints.lock() {
            self.emit(&format!("* Got Conn: {local} -> {remote}"));
        }
    }

    fn tls_done(&self, complete: bool) {
        self.emit(&format!("* SSL HandshakeComplete: {complete}"));
    }

    fn dialed(&self) -> bool {
        self.endpoints.lock().is_some()
    }
}

/// Sends a request over a fresh HTTP/1.1 connection, logging each step.
#[derive(Clone)]
pub(crate) struct Tracer {
    sink: LogSink,
    dialer: Dialer,
    tls: Arc<rustls::ClientConfig>,
}

impl Tracer {
    pub(crate) fn new(sink: LogSink, dialer: Dialer, tls: Arc<rustls::ClientConfig>) -> Self {
        Self { sink, dialer, tls }
    }

    fn emit(&self, line: &str) {
        (self.sink)(line);
    }

    /// Execute `request` and return the response with its body fully read.
    pub(crate) async fn execute(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let uri = request.uri().clone();
        let https = uri.scheme_str() == Some("https");
        let host = uri.host().unwrap_or_default();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        let hooks = Arc::new(TraceHooks::new(Arc::clone(&self.sink)));
        hooks.get_conn(&format!("{host}:{port}"));

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(self.tls.as_ref().clone())
            .https_or_http()
            .enable_http1()
            .wrap_connector(self.dialer.with_hooks(Arc::clone(&hooks)));

        let stream = match connector.oneshot(uri).await {
            Ok(stream) => stream,
            Err(e) => {
                if https && hooks.dialed() {
                    hooks.tls_done(false);
                }
                self.emit(&format!("* Connect failed: {e}"));
                return Err(HttpError::Network(e));
            }
        };
        if https {
            hooks.tls_done(true);
        }
        hooks.got_conn();

        let absolute_form = match &stream {
            MaybeHttpsStream::Http(io) => io.is_proxied(),
            MaybeHttpsStream::Https(_) => false,
        };
        let request = prepare(request, absolute_form)?;
        self.emit(&show(&dump_request(&request, absolute_form), "> "));

        let (mut sender, conn) = hyper::client::conn::http1::handshake(stream).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "traced connection closed with error");
            }
        });

        let (parts, body) = request.into_parts();
        let response = sender
            .send_request(Request::from_parts(parts, Full::new(body)))
            .await
            .inspect_err(|e| self.emit(&format!("* Request failed: {e}")))?;

        let (parts, incoming) = response.into_parts();
        let body = incoming
            .collect()
            .await
            .map_err(|e| HttpError::Body(Box::new(e)))?
            .to_bytes();
        self.emit(&show(&dump_response(&parts, &body), "< "));

        let body: ResponseBody = Full::new(body)
            .map_err(|never| match never {})
            .boxed();
        Ok(Response::from_parts(parts, body))
    }
}

/// Switch the request target to origin-form (unless going to a forward
/// proxy) and make sure a `Host` header is present.
fn prepare(request: Request<Bytes>, absolute_form: bool) -> Result<Request<Bytes>, HttpError> {
    let (mut parts, body) = request.into_parts();

    if !parts.headers.contains_key(HOST)
        && let Some(authority) = parts.uri.authority()
    {
        let host = HeaderValue::from_str(authority.as_str())?;
        parts.headers.insert(HOST, host);
    }

    if !absolute_form {
        let origin = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .parse::<http::Uri>()
            .map_err(http::Error::from)?;
        parts.uri = origin;
    }

    Ok(Request::from_parts(parts, body))
}
