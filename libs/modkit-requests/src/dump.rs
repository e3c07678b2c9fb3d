//! HTTP/1.x wire representation of requests and responses, for diagnostics.

use http::header::HOST;
use http::{HeaderMap, Request, Version, response};

/// Render a request as it would appear on an HTTP/1.x connection.
///
/// The request target is origin-form unless `absolute_form` is set (forward
/// proxies). A `Host` header is synthesized from the URI when absent.
#[must_use]
pub fn dump_request<B: AsRef<[u8]>>(request: &Request<B>, absolute_form: bool) -> Vec<u8> {
    let uri = request.uri();
    let target = if absolute_form {
        uri.to_string()
    } else {
        uri.path_and_query()
            .map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned())
    };

    let mut out = format!(
        "{} {} {}\r\n",
        request.method(),
        target,
        version_str(request.version())
    )
    .into_bytes();

    if !request.headers().contains_key(HOST)
        && let Some(authority) = uri.authority()
    {
        out.extend_from_slice(format!("host: {authority}\r\n").as_bytes());
    }
    write_headers(&mut out, request.headers());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(request.body().as_ref());
    out
}

/// Render a response head plus its buffered body.
#[must_use]
pub fn dump_response(parts: &response::Parts, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "{} {} {}\r\n",
        version_str(parts.version),
        parts.status.as_u16(),
        parts.status.canonical_reason().unwrap_or_default()
    )
    .into_bytes();
    write_headers(&mut out, &parts.headers);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

fn write_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}
