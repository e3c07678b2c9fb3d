use crate::error::{HttpError, InvalidUriKind};
use crate::options::{Body, RequestConfig};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE, HeaderName, HeaderValue};
use http::{Method, Request, Uri};

/// Content type implied by a form body
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Wire bytes of a request body
#[derive(Debug, Clone, Default)]
pub struct EncodedBody {
    pub bytes: Bytes,
    /// Content type the body implies, applied only when the caller set none
    pub implied_content_type: Option<&'static str>,
}

/// Turn a body value into wire bytes.
///
/// Bytes and text pass through unchanged, form fields are URL-encoded,
/// everything else is serialized as JSON. An absent body yields an empty
/// payload.
///
/// # Errors
///
/// Returns `HttpError::Encoding` if JSON serialization fails and
/// `HttpError::FormEncode` if the form fields cannot be encoded.
pub fn encode_body(body: Option<&Body>) -> Result<EncodedBody, HttpError> {
    let Some(body) = body else {
        return Ok(EncodedBody::default());
    };

    let encoded = match body {
        Body::Bytes(bytes) => EncodedBody {
            bytes: bytes.clone(),
            implied_content_type: None,
        },
        Body::Text(text) => EncodedBody {
            bytes: Bytes::from(text.clone()),
            implied_content_type: None,
        },
        Body::Form(fields) => EncodedBody {
            bytes: Bytes::from(serde_urlencoded::to_string(fields)?),
            implied_content_type: Some(FORM_CONTENT_TYPE),
        },
        Body::Json(value) => EncodedBody {
            bytes: Bytes::from(value.encode().map_err(HttpError::Encoding)?),
            implied_content_type: None,
        },
    };
    Ok(encoded)
}

/// Assemble a transport request from a finalized config.
///
/// Steps run in a fixed order: encode the body, parse the base URL,
/// concatenate the raw path segments onto its path, append the query
/// parameters, attach headers, then join cookies into a `Cookie` header.
///
/// # Errors
///
/// - `HttpError::Encoding`/`FormEncode` when the body cannot be encoded
/// - `HttpError::Assembly` when the base URL or the assembled URL is malformed
/// - `HttpError::InvalidMethod`, `InvalidHeaderName`, `InvalidHeaderValue`
pub fn build_request(config: &RequestConfig) -> Result<Request<Bytes>, HttpError> {
    let body = encode_body(config.body.as_ref())?;
    let uri = assemble_uri(config)?;
    let method = Method::from_bytes(config.method.as_bytes())?;

    let mut request = Request::builder().method(method).uri(uri).body(body.bytes)?;
    let headers = request.headers_mut();

    for (name, values) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        for value in values {
            headers.append(name.clone(), HeaderValue::from_str(value)?);
        }
    }

    if let Some(content_type) = body.implied_content_type
        && !headers.contains_key(CONTENT_TYPE)
    {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    if !config.cookies.is_empty() {
        let mut pairs: Vec<String> = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect();
        pairs.extend(
            config
                .cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value)),
        );
        headers.insert(COOKIE, HeaderValue::from_str(&pairs.join("; "))?);
    }

    Ok(request)
}

/// Parse the base URL, then append path segments and query parameters.
fn assemble_uri(config: &RequestConfig) -> Result<Uri, HttpError> {
    let base = validate_base_url(&config.url)?;

    let mut path = if has_explicit_path(&config.url) {
        base.path().to_owned()
    } else {
        String::new()
    };
    for segment in &config.path {
        path.push_str(segment);
    }
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    let mut query = base.query().unwrap_or_default().to_owned();
    if !config.params.is_empty() {
        let encoded = serde_urlencoded::to_string(&config.params)?;
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&encoded);
    }

    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base.authority().map_or("", |a| a.as_str());
    let mut full = format!("{scheme}://{authority}{path}");
    if !query.is_empty() {
        full.push('?');
        full.push_str(&query);
    }

    full.parse::<Uri>()
        .map_err(|e: http::uri::InvalidUri| HttpError::Assembly {
            url: full.clone(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })
}

/// Validate the base URL.
///
/// Uses `http::Uri` parsing; requires a scheme of `http` or `https` and
/// a host.
fn validate_base_url(url: &str) -> Result<Uri, HttpError> {
    let uri: Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::Assembly {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    match uri.scheme_str() {
        Some("http" | "https") => {}
        Some(scheme) => {
            return Err(HttpError::Assembly {
                url: url.to_owned(),
                kind: InvalidUriKind::UnsupportedScheme,
                reason: format!("unsupported scheme '{scheme}'"),
            });
        }
        None => {
            return Err(HttpError::Assembly {
                url: url.to_owned(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            });
        }
    }

    if uri.authority().is_none() {
        return Err(HttpError::Assembly {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    Ok(uri)
}

/// Whether the raw URL spells out a path after its authority.
///
/// `http::Uri` reports `/` for both `http://host` and `http://host/`; path
/// segments must land after the former verbatim.
fn has_explicit_path(url: &str) -> bool {
    let Some((_, rest)) = url.split_once("://") else {
        return false;
    };
    rest.find(['/', '?', '#'])
        .is_some_and(|idx| rest[idx..].starts_with('/'))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::options::{RequestOption, apply_options};
    use serde_json::json;

    fn config(options: impl IntoIterator<Item = RequestOption>) -> RequestConfig {
        apply_options(&RequestConfig::default(), options)
    }

    #[test]
    fn test_encode_absent_body_is_empty() {
        let encoded = encode_body(None).unwrap();
        assert!(encoded.bytes.is_empty());
        assert!(encoded.implied_content_type.is_none());
    }

    #[test]
    fn test_encode_bytes_and_text_pass_through() {
        let raw = Body::from(vec![0u8, 159, 146, 150]);
        assert_eq!(&encode_body(Some(&raw)).unwrap().bytes[..], &[0u8, 159, 146, 150]);

        let text = Body::from("héllo %s");
        assert_eq!(&encode_body(Some(&text)).unwrap().bytes[..], "héllo %s".as_bytes());
    }

    #[test]
    fn test_encode_form() {
        let body = Body::form([("name", "a b"), ("x", "1&2")]);
        let encoded = encode_body(Some(&body)).unwrap();
        assert_eq!(&encoded.bytes[..], b"name=a+b&x=1%262");
        assert_eq!(encoded.implied_content_type, Some(FORM_CONTENT_TYPE));
    }

    #[test]
    fn test_encode_json_round_trip() {
        #[derive(serde::Serialize)]
        struct Payload {
            a: &'static str,
            n: Vec<u32>,
        }

        let body = Body::json(Payload {
            a: "b",
            n: vec![1, 2],
        });
        let encoded = encode_body(Some(&body)).unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&encoded.bytes).unwrap();
        assert_eq!(decoded, json!({"a": "b", "n": [1, 2]}));
    }

    #[test]
    fn test_encode_json_failure() {
        use std::collections::HashMap;

        // Non-string map keys cannot be represented in JSON
        let mut map = HashMap::new();
        map.insert((1, 2), "v");
        let body = Body::json(map);
        let err = encode_body(Some(&body)).unwrap_err();
        assert!(matches!(err, HttpError::Encoding(_)));
    }

    #[test]
    fn test_path_segments_concatenated_raw() {
        let req = build_request(&config([
            RequestOption::url("http://example.com/api"),
            RequestOption::path("/v1"),
            RequestOption::path("users"),
        ]))
        .unwrap();
        assert_eq!(req.uri().path(), "/api/v1users");
    }

    #[test]
    fn test_path_on_bare_host() {
        let req = build_request(&config([
            RequestOption::url("http://example.com"),
            RequestOption::path("/users"),
        ]))
        .unwrap();
        assert_eq!(req.uri().to_string(), "http://example.com/users");
    }

    #[test]
    fn test_query_params_appended() {
        let req = build_request(&config([
            RequestOption::url("http://example.com/search?fixed=1"),
            RequestOption::param("q", "a b/c"),
            RequestOption::param("x", 1),
        ]))
        .unwrap();

        let query = req.uri().query().unwrap();
        assert!(query.contains("fixed=1"));
        assert!(query.contains("q=a+b%2Fc"));
        assert!(query.contains("x=1"));
        assert_eq!(query.split('&').count(), 3);
    }

    #[test]
    fn test_headers_and_cookies_attached() {
        let req = build_request(&config([
            RequestOption::url("http://example.com"),
            RequestOption::header("X-One", "1"),
            RequestOption::add_header("x-multi", "a"),
            RequestOption::add_header("x-multi", "b"),
            RequestOption::cookie("a", "1"),
            RequestOption::cookie("b", "2"),
        ]))
        .unwrap();

        assert_eq!(req.headers()["x-one"], "1");
        let multi: Vec<_> = req.headers().get_all("x-multi").iter().collect();
        assert_eq!(multi, vec!["a", "b"]);
        assert_eq!(req.headers()[COOKIE], "a=1; b=2");
    }

    #[test]
    fn test_cookies_merge_with_explicit_header() {
        let req = build_request(&config([
            RequestOption::url("http://example.com"),
            RequestOption::header("cookie", "pre=0"),
            RequestOption::cookie("a", "1"),
        ]))
        .unwrap();
        assert_eq!(req.headers()[COOKIE], "pre=0; a=1");
    }

    #[test]
    fn test_form_content_type_respects_caller() {
        let req = build_request(&config([
            RequestOption::url("http://example.com"),
            RequestOption::method("POST"),
            RequestOption::form([("a", "b")]),
        ]))
        .unwrap();
        assert_eq!(req.headers()[CONTENT_TYPE], FORM_CONTENT_TYPE);

        let req = build_request(&config([
            RequestOption::url("http://example.com"),
            RequestOption::header("Content-Type", "text/plain"),
            RequestOption::form([("a", "b")]),
        ]))
        .unwrap();
        assert_eq!(req.headers()[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_json_body_sets_no_content_type() {
        let req = build_request(&config([
            RequestOption::url("http://example.com"),
            RequestOption::json(json!({"a": "b"})),
        ]))
        .unwrap();
        assert!(!req.headers().contains_key(CONTENT_TYPE));
        assert_eq!(&req.body()[..], br#"{"a":"b"}"#);
    }

    #[test]
    fn test_malformed_base_url() {
        let err = build_request(&config([RequestOption::url("http://exa mple.com")])).unwrap_err();
        assert!(matches!(
            err,
            HttpError::Assembly {
                kind: InvalidUriKind::ParseError,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_scheme_and_host() {
        let err = build_request(&config([RequestOption::url("/relative")])).unwrap_err();
        assert!(matches!(
            err,
            HttpError::Assembly {
                kind: InvalidUriKind::MissingScheme,
                ..
            }
        ));

        let err = build_request(&config([RequestOption::url("ftp://example.com")])).unwrap_err();
        assert!(matches!(
            err,
            HttpError::Assembly {
                kind: InvalidUriKind::UnsupportedScheme,
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_path_segment() {
        let err = build_request(&config([
            RequestOption::url("http://example.com"),
            RequestOption::path("/a b"),
        ]))
        .unwrap_err();
        assert!(matches!(err, HttpError::Assembly { .. }));
    }

    #[test]
    fn test_encoding_error_precedes_url_error() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert((1, 2), "v");
        let err = build_request(&config([
            RequestOption::url("not a url"),
            RequestOption::json(map),
        ]))
        .unwrap_err();
        assert!(matches!(err, HttpError::Encoding(_)));
    }

    #[test]
    fn test_invalid_header_and_method() {
        let err = build_request(&config([
            RequestOption::url("http://example.com"),
            RequestOption::header("bad header", "v"),
        ]))
        .unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeaderName(_)));

        let err = build_request(&config([
            RequestOption::url("http://example.com"),
            RequestOption::method("BAD METHOD"),
        ]))
        .unwrap_err();
        assert!(matches!(err, HttpError::InvalidMethod(_)));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let options = || {
            [
                RequestOption::url("http://example.com"),
                RequestOption::params([("b", "2"), ("a", "1"), ("c", "3")]),
                RequestOption::headers([("x-b", "2"), ("x-a", "1")]),
                RequestOption::body("payload"),
            ]
        };
        let first = build_request(&config(options())).unwrap();
        let second = build_request(&config(options())).unwrap();

        assert_eq!(first.uri(), second.uri());
        assert_eq!(first.headers(), second.headers());
        assert_eq!(first.body(), second.body());
    }

    #[test]
    fn test_has_explicit_path() {
        assert!(!has_explicit_path("http://host"));
        assert!(!has_explicit_path("http://host?x=1"));
        assert!(has_explicit_path("http://host/"));
        assert!(has_explicit_path("http://host:80/a"));
    }
}
