//! Wire types for the relay protocol
//!
//! Jobs and results travel between broker, agent and browser as JSON. All
//! types use camelCase serialization to match the agent protocol.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Headers recomputed by whichever side re-sends a body; never relayed
pub const RECOMPUTED_HEADERS: [&str; 3] = ["content-length", "content-encoding", "transfer-encoding"];

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A relayed request awaiting execution by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub method: String,
    /// Service-relative path including the query string
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Body is a base64 string holding raw bytes
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_base64: bool,
    pub timestamp: u64,
}

impl Job {
    /// Create a job with a fresh id, validating the target path
    pub fn new(method: impl Into<String>, path: &str) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            method: method.into().to_ascii_uppercase(),
            path: normalize_path(path)?,
            headers: BTreeMap::new(),
            body: None,
            is_base64: false,
            timestamp: now_millis(),
        })
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Option<serde_json::Value>) -> Self {
        self.body = body;
        self
    }

    /// Attach raw bytes as a base64 body
    pub fn with_binary_body(mut self, encoded: String) -> Self {
        self.body = Some(serde_json::Value::String(encoded));
        self.is_base64 = true;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// The agent's completed response to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub id: String,
    pub status: u16,
    /// Header values as sent by the agent. A repeated header (`set-cookie`)
    /// may be an array of strings; other non-string values are never forwarded.
    #[serde(default)]
    pub headers: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_base64: bool,
    pub timestamp: u64,
}

impl JobResult {
    pub fn new(id: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            is_base64: false,
            timestamp: now_millis(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into(), serde_json::Value::String(value.into()));
        self
    }

    /// First string header matching `name`, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_str())
    }

    /// Replace a header's value, keeping the agent's spelling of the name
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let key = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| name.to_string());
        self.headers
            .insert(key, serde_json::Value::String(value.into()));
    }

    /// Whether the body is text of the given media type (e.g. `text/html`)
    pub fn is_text_of_type(&self, media_type: &str) -> bool {
        !self.is_base64
            && self
                .header("content-type")
                .map(|ct| ct.to_ascii_lowercase().contains(media_type))
                .unwrap_or(false)
    }

    /// Text of an HTML document fit for navigation rewriting.
    ///
    /// A missing content type counts as HTML. Base64 bodies are decoded using
    /// the declared charset: ISO-8859-1 family byte-for-byte, anything else
    /// as UTF-8 with invalid sequences replaced.
    pub fn html_document(&self) -> Option<String> {
        let content_type = self.header("content-type").map(str::to_ascii_lowercase);
        let is_html = content_type
            .as_deref()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(true);
        if !is_html {
            return None;
        }
        if !self.is_base64 {
            return Some(self.body.clone());
        }

        let bytes = STANDARD.decode(self.body.trim()).ok()?;
        let single_byte = content_type
            .as_deref()
            .and_then(charset)
            .map(|cs| matches!(cs, "iso-8859-1" | "latin1" | "latin-1" | "windows-1252" | "us-ascii"))
            .unwrap_or(false);
        Some(if single_byte {
            bytes.iter().map(|&b| b as char).collect()
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        })
    }
}

fn charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        (name.trim() == "charset").then(|| value.trim().trim_matches('"'))
    })
}

/// Reject absolute targets and ensure a leading slash
pub fn normalize_path(path: &str) -> Result<String> {
    let path = path.trim();
    if path.is_empty() {
        return Err(Error::Validation("Missing path".to_string()));
    }
    if path.starts_with("//") || has_scheme(path) {
        return Err(Error::Validation(format!(
            "Path must be service-relative: {}",
            path
        )));
    }
    if path.starts_with('/') {
        Ok(path.to_string())
    } else {
        Ok(format!("/{}", path))
    }
}

fn has_scheme(path: &str) -> bool {
    match path.find(':') {
        Some(idx) => {
            let scheme = &path[..idx];
            !scheme.is_empty()
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

// =============================================================================
// Relay request and response bodies
// =============================================================================

/// Body of `POST ?action=queue`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Body of `POST ?action=complete`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64: bool,
}

fn default_status() -> u16 {
    200
}

impl CompleteRequest {
    /// Convert into a stored result, rejecting a missing or empty id
    pub fn into_result(self) -> Result<JobResult> {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Validation("Missing id".to_string()))?;

        Ok(JobResult {
            id,
            status: self.status,
            headers: self.headers.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
            is_base64: self.is_base64,
            timestamp: now_millis(),
        })
    }
}

/// Response to `GET ?action=poll`
#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
}

/// Response to `GET ?action=result`
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultResponse {
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

/// Response to `POST ?action=queue`
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueResponse {
    pub success: bool,
    pub id: String,
}

/// Response to `POST ?action=complete`
#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub success: bool,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

/// API error detail
#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code("BAD_REQUEST", message)
    }

    pub fn from_error(err: &Error) -> Self {
        let code = match err {
            Error::Validation(_) | Error::Serialization(_) => "BAD_REQUEST",
            Error::Timeout(_) => "TIMEOUT",
            Error::Upstream(_) | Error::Http(_) => "BAD_GATEWAY",
            _ => "INTERNAL_ERROR",
        };
        Self::with_code(code, err.to_string())
    }

    fn with_code(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}
