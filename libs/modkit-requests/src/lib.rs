#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Session-based HTTP requests for `ModKit`
//!
//! A [`Session`] holds a baseline [`RequestConfig`] and a pooled transport.
//! Each call copies the baseline, applies call-time [`RequestOption`]s to the
//! copy, assembles the request and returns a [`Response`] whose body has
//! already been read:
//! - Deterministic URL assembly from base URL, raw path segments and query params
//! - Per-call cancellation, deadline and whole-call timeout via [`CallContext`]
//! - Proxies: HTTP, HTTPS, SOCKS4 and SOCKS5, swappable at runtime
//! - Cookie jar, secure redirect following and User-Agent on the pooled path
//! - Traced calls that log connection lifecycle and wire dumps to a [`LogSink`]
//! - [`ExecutionStat`] summaries delivered to an optional observer
//!
//! # Example
//!
//! ```ignore
//! use modkit_requests::{CallContext, RequestOption, Session};
//! use std::time::Duration;
//!
//! let session = Session::builder()
//!     .option(RequestOption::url("https://api.example.com"))
//!     .option(RequestOption::header("accept", "application/json"))
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let response = session
//!     .execute(
//!         &CallContext::background(),
//!         [RequestOption::path("/v1/items"), RequestOption::param("page", 2)],
//!     )
//!     .await?;
//! let items: Vec<Item> = response.json()?;
//! ```

mod builder;
mod config;
mod context;
pub mod dump;
mod error;
mod layers;
mod multipart;
mod options;
mod proxy;
mod request;
mod response;
mod session;
mod stat;
mod tls;
mod trace;
mod transport;

pub use builder::SessionBuilder;
pub use config::{DEFAULT_USER_AGENT, RedirectConfig, SessionConfig, TlsRootConfig};
pub use context::CallContext;
pub use error::{ExecuteError, HttpError, InvalidUriKind};
pub use layers::{
    CookieJar, CookieJarLayer, CookieJarService, SecureRedirectPolicy, SessionHeadersLayer,
    SessionHeadersService,
};
pub use multipart::MultipartForm;
pub use options::{
    Body, Cookie, DEFAULT_METHOD, DEFAULT_TIMEOUT, JsonBody, Observer, RequestConfig,
    RequestOption, apply_options,
};
pub use proxy::{ProxyRule, ProxyScheme};
pub use request::{EncodedBody, FORM_CONTENT_TYPE, build_request, encode_body};
pub use response::{RequestSnapshot, Response, ResponseBody};
pub use session::{Session, UPLOAD_CONTENT_TYPE};
pub use stat::{ExecutionStat, RequestStat, ResponseStat};
pub use trace::{DUMP_BUDGET, LogSink, default_log_sink, show};
