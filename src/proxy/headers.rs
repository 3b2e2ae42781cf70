//! Header and body translation between the client and the relay protocol

use crate::error::{Error, Result};
use crate::relay::{JobResult, RECOMPUTED_HEADERS};
use crate::rewrite::tunnel_location;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Select the client headers the private service needs: content type,
/// session cookies and the CSRF token (either common spelling).
pub fn forward_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut forwarded = BTreeMap::new();

    if let Some(content_type) = header_str(headers, header::CONTENT_TYPE.as_str()) {
        forwarded.insert("Content-Type".to_string(), content_type.to_string());
    }
    if let Some(cookie) = header_str(headers, header::COOKIE.as_str()) {
        forwarded.insert("Cookie".to_string(), cookie.to_string());
    }
    if let Some(token) =
        header_str(headers, "x-csrftoken").or_else(|| header_str(headers, "x-csrf-token"))
    {
        forwarded.insert("X-CSRFToken".to_string(), token.to_string());
    }

    forwarded
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Job body extracted from a client request
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBody {
    pub body: Option<serde_json::Value>,
    pub is_base64: bool,
}

/// Best-effort body extraction.
///
/// JSON content is parsed into a value and falls back to text when it does
/// not parse; bytes that are not UTF-8 are carried base64-encoded.
pub fn extract_body(method: &Method, content_type: Option<&str>, body: &Bytes) -> ExtractedBody {
    let none = ExtractedBody {
        body: None,
        is_base64: false,
    };
    if *method == Method::GET || *method == Method::HEAD || body.is_empty() {
        return none;
    }

    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);
    if is_json {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
            return ExtractedBody {
                body: Some(value),
                is_base64: false,
            };
        }
    }

    match std::str::from_utf8(body) {
        Ok(text) => ExtractedBody {
            body: Some(serde_json::Value::String(text.to_string())),
            is_base64: false,
        },
        Err(_) => ExtractedBody {
            body: Some(serde_json::Value::String(STANDARD.encode(body))),
            is_base64: true,
        },
    }
}

/// Result headers safe to send to the client.
///
/// Array values (repeated `Set-Cookie`) become one header line each. A
/// root-relative `Location` is sent into the tunnel.
pub fn response_headers(result: &JobResult) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &result.headers {
        if RECOMPUTED_HEADERS
            .iter()
            .any(|skip| name.eq_ignore_ascii_case(skip))
        {
            continue;
        }
        let values: Vec<&str> = match value {
            serde_json::Value::String(value) => vec![value.as_str()],
            serde_json::Value::Array(items) => {
                items.iter().filter_map(serde_json::Value::as_str).collect()
            }
            _ => continue,
        };
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::debug!(job_id = %result.id, header = %name, "Dropping invalid result header");
            continue;
        };

        for value in values {
            let value = match tunnel_location(value) {
                Some(location) if header_name == header::LOCATION => location,
                _ => value.to_string(),
            };
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(header_name.clone(), value);
                }
                Err(_) => {
                    tracing::debug!(job_id = %result.id, header = %name, "Dropping invalid result header value");
                }
            }
        }
    }
    headers
}

/// Raw response bytes, decoding base64 bodies
pub fn decode_body(result: &JobResult) -> Result<Bytes> {
    if result.is_base64 {
        STANDARD
            .decode(result.body.trim())
            .map(Bytes::from)
            .map_err(|e| Error::Upstream(format!("Invalid base64 body for {}: {}", result.id, e)))
    } else {
        Ok(Bytes::from(result.body.clone()))
    }
}
