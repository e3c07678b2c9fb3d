use crate::error::HttpError;
use http::header::{CONNECTION, USER_AGENT};
use http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that fills in session-wide headers the request does not set:
/// `User-Agent`, and `Connection: close` when keep-alive is off.
#[derive(Clone)]
pub struct SessionHeadersLayer {
    user_agent: HeaderValue,
    close: bool,
}

impl SessionHeadersLayer {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the user agent string is not valid
    pub fn try_new(user_agent: impl AsRef<str>, keep_alive: bool) -> Result<Self, HttpError> {
        let user_agent = HeaderValue::from_str(user_agent.as_ref())?;
        Ok(Self {
            user_agent,
            close: !keep_alive,
        })
    }
}

impl<S> Layer<S> for SessionHeadersLayer {
    type Service = SessionHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionHeadersService {
            inner,
            user_agent: self.user_agent.clone(),
            close: self.close,
        }
    }
}

#[derive(Clone)]
pub struct SessionHeadersService<S> {
    inner: S,
    user_agent: HeaderValue,
    close: bool,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SessionHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let headers = req.headers_mut();
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.user_agent.clone());
        }
        if self.close && !headers.contains_key(CONNECTION) {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        self.inner.call(req)
    }
}
