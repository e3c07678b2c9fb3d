use chrono::{DateTime, Local};
use serde::Serialize;
use serde::ser::Serializer;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

const START_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Read-only summary of one completed call.
///
/// Serializes to JSON with the field names below; bodies are embedded as
/// JSON when they parse as JSON and as plain strings otherwise.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecutionStat {
    #[serde(serialize_with = "serialize_start_at")]
    pub start_at: DateTime<Local>,
    /// Elapsed milliseconds
    pub cost: u64,
    pub request: RequestStat,
    pub response: ResponseStat,
    #[serde(rename = "Err")]
    pub error: String,
    pub retry: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestStat {
    pub method: String,
    /// First value of each header
    pub header: BTreeMap<String, String>,
    #[serde(rename = "URL")]
    pub url: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseStat {
    pub header: BTreeMap<String, String>,
    pub body: serde_json::Value,
    pub status_code: u16,
    /// `-1` when unknown
    pub content_length: i64,
}

fn serialize_start_at<S: Serializer>(at: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&at.format(START_AT_FORMAT).to_string())
}

/// Decode `raw` as JSON, falling back to the raw text
pub(crate) fn body_value(raw: &[u8]) -> serde_json::Value {
    if raw.is_empty() {
        return serde_json::Value::String(String::new());
    }
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(raw).into_owned()))
}

/// First value per header name
pub(crate) fn first_values(headers: &http::HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        out.entry(name.as_str().to_owned())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

pub(crate) fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

impl fmt::Display for ExecutionStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_body_value_falls_back_to_string() {
        assert_eq!(body_value(br#"{"a":1}"#), serde_json::json!({"a": 1}));
        assert_eq!(body_value(b"plain text"), serde_json::json!("plain text"));
        assert_eq!(body_value(b""), serde_json::json!(""));
    }

    #[test]
    fn test_first_values() {
        let mut headers = http::HeaderMap::new();
        headers.append("x-a", "1".parse().unwrap());
        headers.append("x-a", "2".parse().unwrap());
        headers.append("x-b", "3".parse().unwrap());

        let values = first_values(&headers);
        assert_eq!(values["x-a"], "1");
        assert_eq!(values["x-b"], "3");
    }

    #[test]
    fn test_serialized_shape() {
        let stat = ExecutionStat {
            start_at: Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            cost: 12,
            request: RequestStat {
                method: "GET".to_owned(),
                url: "http://example.com/".to_owned(),
                ..Default::default()
            },
            response: ResponseStat {
                status_code: 200,
                content_length: -1,
                body: serde_json::json!({"ok": true}),
                ..Default::default()
            },
            error: String::new(),
            retry: 0,
        };

        let value: serde_json::Value = serde_json::from_str(&stat.to_string()).unwrap();
        assert_eq!(value["StartAt"], "2024-01-02 03:04:05.000");
        assert_eq!(value["Cost"], 12);
        assert_eq!(value["Request"]["URL"], "http://example.com/");
        assert_eq!(value["Response"]["StatusCode"], 200);
        assert_eq!(value["Response"]["Body"]["ok"], true);
        assert_eq!(value["Err"], "");
    }
}
