//! Request inspection.
//!
//! # Responsibilities
//! - Request ids (`x-request-id`, set by tower-http, or a fresh `req_` id)
//! - Capture what a proxy delivered: method, URL, headers, query, cookies, body
//! - Resolve the client address the way proxies report it
//!
//! # Design Decisions
//! - Multi-valued headers and query parameters become JSON arrays
//! - JSON bodies are parsed when the content type says so; anything else is
//!   returned as (lossy) text

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, Method, Uri};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Header carrying the request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Fresh `req_<uuid>` identifier.
pub fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

/// The request id attached by the request-id layer, or a fresh one.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(new_request_id)
}

/// Everything the testbed saw of one request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub headers: Map<String, Value>,
    pub query: Map<String, Value>,
    pub cookies: Map<String, Value>,
    pub body: Value,
    pub client_ip: String,
    pub user_agent: String,
    pub content_type: String,
}

impl RequestInfo {
    pub fn capture(
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        query: &[(String, String)],
        remote: Option<SocketAddr>,
        body: &Bytes,
    ) -> Self {
        let content_type = header_str(headers, header::CONTENT_TYPE.as_str());
        Self {
            method: method.to_string(),
            url: uri.to_string(),
            headers: collect_multi(
                headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()))),
            ),
            query: collect_multi(query.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            cookies: parse_cookies(headers),
            body: parse_body(&content_type, body),
            client_ip: client_ip(headers, remote),
            user_agent: header_str(headers, header::USER_AGENT.as_str()),
            content_type,
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn collect_multi<'a, V>(pairs: impl Iterator<Item = (&'a str, V)>) -> Map<String, Value>
where
    V: Into<String>,
{
    let mut map = Map::new();
    for (key, value) in pairs {
        let value = Value::String(value.into());
        match map.get_mut(key) {
            None => {
                map.insert(key.to_string(), value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    map
}

fn parse_cookies(headers: &HeaderMap) -> Map<String, Value> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.to_string(), Value::String(value.to_string())))
        })
        .collect()
}

fn parse_body(content_type: &str, body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    if content_type.contains("application/json") {
        if let Ok(value) = serde_json::from_slice(body) {
            return value;
        }
    }
    Value::String(String::from_utf8_lossy(body).into_owned())
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn repeated_headers_and_params_become_arrays() {
        let headers = headers(&[("x-tag", "a"), ("x-tag", "b"), ("accept", "*/*")]);
        let query = vec![
            ("id".to_string(), "1".to_string()),
            ("id".to_string(), "2".to_string()),
            ("q".to_string(), "x".to_string()),
        ];
        let info = RequestInfo::capture(
            &Method::GET,
            &Uri::from_static("/api/test?id=1&id=2&q=x"),
            &headers,
            &query,
            None,
            &Bytes::new(),
        );

        assert_eq!(info.headers["x-tag"], json!(["a", "b"]));
        assert_eq!(info.headers["accept"], json!("*/*"));
        assert_eq!(info.query["id"], json!(["1", "2"]));
        assert_eq!(info.query["q"], json!("x"));
        assert_eq!(info.body, Value::Null);
    }

    #[test]
    fn json_body_is_parsed_and_text_is_not() {
        let json_headers = headers(&[("content-type", "application/json")]);
        let info = RequestInfo::capture(
            &Method::POST,
            &Uri::from_static("/api/test"),
            &json_headers,
            &[],
            None,
            &Bytes::from_static(br#"{"a":1}"#),
        );
        assert_eq!(info.body, json!({"a": 1}));

        let text_headers = headers(&[("content-type", "text/plain")]);
        let info = RequestInfo::capture(
            &Method::POST,
            &Uri::from_static("/api/test"),
            &text_headers,
            &[],
            None,
            &Bytes::from_static(br#"{"a":1}"#),
        );
        assert_eq!(info.body, json!(r#"{"a":1}"#));
    }

    #[test]
    fn cookies_are_split() {
        let info = RequestInfo::capture(
            &Method::GET,
            &Uri::from_static("/"),
            &headers(&[("cookie", "session=abc; theme=dark")]),
            &[],
            None,
            &Bytes::new(),
        );
        assert_eq!(info.cookies["session"], json!("abc"));
        assert_eq!(info.cookies["theme"], json!("dark"));
    }

    #[test]
    fn client_ip_prefers_forwarded_headers() {
        let remote: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), Some(remote)), "10.0.0.9");
        assert_eq!(
            client_ip(&headers(&[("x-real-ip", "192.0.2.7")]), Some(remote)),
            "192.0.2.7"
        );
        assert_eq!(
            client_ip(
                &headers(&[("x-forwarded-for", "203.0.113.1, 10.0.0.1")]),
                Some(remote)
            ),
            "203.0.113.1"
        );
    }

    #[test]
    fn request_id_falls_back_to_fresh_id() {
        assert!(request_id(&HeaderMap::new()).starts_with("req_"));
        assert_eq!(request_id(&headers(&[("x-request-id", "abc")])), "abc");
    }
}
