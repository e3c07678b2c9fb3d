use crate::error::HttpError;
use crate::response::ResponseBody;
use crate::trace::Tracer;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use tower::Service;
use tower::buffer::Buffer;

/// Type alias for the future type of the boxed pooled service
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Type alias for the buffered pooled service
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// An immutable, fully wired transport.
///
/// Sessions swap in a new one whenever proxy, keep-alive, dial timeout,
/// TLS verification or local address change.
pub(crate) struct Transport {
    pub(crate) service: BufferedService,
    pub(crate) tracer: Tracer,
    pub(crate) verify: bool,
    pub(crate) local_address: Option<IpAddr>,
}

impl Transport {
    /// Whether this transport was built for the given per-call socket settings
    pub(crate) fn matches(&self, verify: bool, local_address: Option<IpAddr>) -> bool {
        self.verify == verify && self.local_address == local_address
    }

    /// Send through the pooled stack (cookie jar, redirects, session headers)
    pub(crate) async fn send(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let mut service = self.service.clone();
        try_acquire_buffer_slot(&mut service).await?;
        let (parts, body) = request.into_parts();
        service
            .call(Request::from_parts(parts, Full::new(body)))
            .await
            .map_err(map_buffer_error)
    }

    /// Send over a dedicated connection, logging each step
    pub(crate) async fn send_traced(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        self.tracer.execute(request).await
    }
}

/// Map buffer errors to `HttpError`.
///
/// Errors from the inner service come back boxed; anything else means the
/// buffer worker is gone.
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

/// Try to acquire a buffer slot with fail-fast semantics.
///
/// If the buffer is full, returns `HttpError::Overloaded` immediately instead
/// of blocking.
pub async fn try_acquire_buffer_slot(service: &mut BufferedService) -> Result<(), HttpError> {
    use std::task::Poll;

    let poll_result = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match poll_result {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_map_buffer_error_unwraps_inner() {
        let err: tower::BoxError = Box::new(HttpError::Canceled);
        assert!(matches!(map_buffer_error(err), HttpError::Canceled));
    }

    #[test]
    fn test_map_buffer_error_other_is_closed() {
        let err: tower::BoxError = "worker gone".into();
        assert!(matches!(map_buffer_error(err), HttpError::ServiceClosed));
    }
}
