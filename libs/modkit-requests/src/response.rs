use crate::dump::dump_response;
use crate::error::HttpError;
use crate::stat::{ExecutionStat, RequestStat, ResponseStat, body_value, first_values, millis};
use bytes::Bytes;
use chrono::{DateTime, Local};
use http::{HeaderMap, Method, StatusCode, response};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Type alias for the boxed response body produced by every transport path.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// The request side of a call, as it was handed to the transport
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestSnapshot {
    pub(crate) fn of(request: &http::Request<Bytes>) -> Self {
        Self {
            method: request.method().clone(),
            url: request.uri().to_string(),
            headers: request.headers().clone(),
            body: request.body().clone(),
        }
    }
}

#[derive(Debug)]
struct Materialized {
    bytes: Bytes,
    elapsed: Duration,
    error: Option<Arc<HttpError>>,
}

/// Outcome of one call: the request that was sent, the response head and
/// the body, read into memory exactly once.
///
/// Returned by [`Session::execute`](crate::Session::execute) with the body
/// already read, so every accessor is synchronous and may be called any
/// number of times in any order.
pub struct Response {
    start_at: DateTime<Local>,
    started: Instant,
    request: Option<RequestSnapshot>,
    head: Option<response::Parts>,
    stream: Mutex<Option<ResponseBody>>,
    body: OnceCell<Materialized>,
    error: Option<Arc<HttpError>>,
    retry: u32,
}

impl Response {
    pub(crate) fn new(
        start_at: DateTime<Local>,
        started: Instant,
        request: Option<RequestSnapshot>,
        retry: u32,
    ) -> Self {
        Self {
            start_at,
            started,
            request,
            head: None,
            stream: Mutex::new(None),
            body: OnceCell::new(),
            error: None,
            retry,
        }
    }

    /// Attach the transport response; its body is read by [`Self::unpack_body`]
    pub(crate) fn received(mut self, response: http::Response<ResponseBody>) -> Self {
        let (parts, body) = response.into_parts();
        self.head = Some(parts);
        *self.stream.get_mut() = Some(body);
        self
    }

    /// Record a failure that happened before any response arrived
    pub(crate) fn failed(mut self, error: Arc<HttpError>) -> Self {
        self.error = Some(error);
        self
    }

    /// Read the whole body into memory.
    ///
    /// Only the first call reads; later calls return immediately. A body
    /// read failure is kept and reported through [`Self::error`].
    pub(crate) async fn unpack_body(&self) {
        self.body
            .get_or_init(|| async {
                let stream = self.stream.lock().take();
                let result = match stream {
                    Some(body) => body
                        .collect()
                        .await
                        .map(http_body_util::Collected::to_bytes)
                        .map_err(|e| Arc::new(HttpError::Body(e))),
                    None => Ok(Bytes::new()),
                };
                let (bytes, error) = match result {
                    Ok(bytes) => (bytes, None),
                    Err(e) => (Bytes::new(), Some(e)),
                };
                Materialized {
                    bytes,
                    elapsed: self.started.elapsed(),
                    error,
                }
            })
            .await;
    }

    /// Finish materialization with an interruption if reading did not complete
    pub(crate) fn interrupt_body(&self, error: Arc<HttpError>) {
        self.stream.lock().take();
        let _ = self.body.set(Materialized {
            bytes: Bytes::new(),
            elapsed: self.started.elapsed(),
            error: Some(error),
        });
    }

    /// Body as text; invalid UTF-8 is replaced with U+FFFD
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Raw body bytes (empty when no body was read)
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.body
            .get()
            .map_or_else(Bytes::new, |m| m.bytes.clone())
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Decode` when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.bytes()).map_err(HttpError::Decode)
    }

    /// Write the body to `path`, creating or truncating the file.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Io` on any filesystem failure.
    pub async fn download_to(&self, path: impl AsRef<Path>) -> Result<usize, HttpError> {
        let bytes = self.bytes();
        tokio::fs::write(path, &bytes).await?;
        Ok(bytes.len())
    }

    /// Summary of the call for logging and observers
    #[must_use]
    pub fn stat(&self) -> ExecutionStat {
        let request = self
            .request
            .as_ref()
            .map(|req| RequestStat {
                method: req.method.to_string(),
                header: first_values(&req.headers),
                url: req.url.clone(),
                body: body_value(&req.body),
            })
            .unwrap_or_default();

        let response = self
            .head
            .as_ref()
            .map(|head| ResponseStat {
                header: first_values(&head.headers),
                body: body_value(&self.bytes()),
                status_code: head.status.as_u16(),
                content_length: self
                    .content_length()
                    .and_then(|n| i64::try_from(n).ok())
                    .unwrap_or(-1),
            })
            .unwrap_or_default();

        ExecutionStat {
            start_at: self.start_at,
            cost: millis(self.elapsed()),
            request,
            response,
            error: self.error().map(ToString::to_string).unwrap_or_default(),
            retry: self.retry,
        }
    }

    /// HTTP/1.x wire representation of the response, body included.
    ///
    /// Empty when no response was received.
    #[must_use]
    pub fn dump(&self) -> Vec<u8> {
        self.head
            .as_ref()
            .map(|head| dump_response(head, &self.bytes()))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.head.as_ref().map(|h| h.status)
    }

    #[must_use]
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.head.as_ref().map(|h| &h.headers)
    }

    /// The request that was sent, absent when assembly failed
    #[must_use]
    pub fn request(&self) -> Option<&RequestSnapshot> {
        self.request.as_ref()
    }

    #[must_use]
    pub fn start_at(&self) -> DateTime<Local> {
        self.start_at
    }

    /// Time from the start of the call until the body was read
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.body
            .get()
            .map_or_else(|| self.started.elapsed(), |m| m.elapsed)
    }

    /// Length announced by a positive `Content-Length` header, otherwise the
    /// number of body bytes read once the body is read
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        let head = self.head.as_ref()?;
        let announced = head
            .headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|n| *n > 0);
        announced.or_else(|| self.body.get().map(|m| m.bytes.len() as u64))
    }

    /// The failure of this call, if any: transport, interruption or body read
    #[must_use]
    pub fn error(&self) -> Option<&HttpError> {
        self.error
            .as_deref()
            .or_else(|| self.body.get().and_then(|m| m.error.as_deref()))
    }

    pub(crate) fn shared_error(&self) -> Option<Arc<HttpError>> {
        self.error
            .clone()
            .or_else(|| self.body.get().and_then(|m| m.error.clone()))
    }

    #[must_use]
    pub fn retry(&self) -> u32 {
        self.retry
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("start_at", &self.start_at)
            .field("request", &self.request)
            .field("status", &self.status())
            .field("content_length", &self.content_length())
            .field("error", &self.error())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
