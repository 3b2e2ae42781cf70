//! Upstream execution of relayed jobs

use crate::error::{Error, Result};
use crate::relay::{Job, JobResult, RECOMPUTED_HEADERS};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use std::time::Duration;

/// Executes a job against the private service
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Perform the request described by `job` and capture the response
    async fn execute(&self, job: &Job) -> Result<JobResult>;
}

/// Upstream backed by an HTTP client pointed at the private service
pub struct HttpUpstream {
    client: reqwest::Client,
    target_url: String,
}

impl HttpUpstream {
    /// Redirects are relayed to the browser rather than followed, so the
    /// `Set-Cookie` and `Location` of a login response reach the client.
    pub fn new(target_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            target_url: target_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    fn build_request(&self, job: &Job) -> Result<reqwest::RequestBuilder> {
        let method = reqwest::Method::from_bytes(job.method.as_bytes())
            .map_err(|_| Error::Validation(format!("Invalid method: {}", job.method)))?;
        let url = format!("{}{}", self.target_url, job.path);

        let mut request = self.client.request(method, url);
        for (name, value) in &job.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        Ok(match &job.body {
            None | Some(serde_json::Value::Null) => request,
            Some(serde_json::Value::String(encoded)) if job.is_base64 => {
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| Error::Validation(format!("Invalid base64 body: {}", e)))?;
                request.body(bytes)
            }
            Some(serde_json::Value::String(text)) => request.body(text.clone()),
            Some(value) => request.json(value),
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn execute(&self, job: &Job) -> Result<JobResult> {
        let response = self.build_request(job)?.send().await?;
        let status = response.status().as_u16();

        let headers = collect_headers(response.headers());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        let bytes = response.bytes().await?;
        let (body, is_base64) = encode_body(content_type.as_deref(), &bytes);

        tracing::debug!(
            job_id = %job.id,
            method = %job.method,
            path = %job.path,
            status,
            "Upstream request finished"
        );

        let mut result = JobResult::new(job.id.clone(), status, body);
        result.headers = headers;
        result.is_base64 = is_base64;
        Ok(result)
    }
}

/// Response headers in relay form. Repeated `Set-Cookie` lines stay
/// separate as an array; other repeated headers are joined with `, `.
fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, serde_json::Value> {
    let mut collected = BTreeMap::new();
    for name in headers.keys() {
        if RECOMPUTED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let value = match values.as_slice() {
            [] => continue,
            [single] => serde_json::Value::String(single.to_string()),
            many if *name == reqwest::header::SET_COOKIE => serde_json::Value::Array(
                many.iter()
                    .map(|v| serde_json::Value::String(v.to_string()))
                    .collect(),
            ),
            many => serde_json::Value::String(many.join(", ")),
        };
        collected.insert(name.as_str().to_string(), value);
    }
    collected
}

/// Body as text when the content type is textual and the bytes are UTF-8,
/// otherwise base64
pub fn encode_body(content_type: Option<&str>, bytes: &[u8]) -> (String, bool) {
    let textual = content_type.map(is_textual).unwrap_or(true);
    if textual {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return (text.to_string(), false);
        }
    }
    (STANDARD.encode(bytes), true)
}

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || ["json", "javascript", "xml", "x-www-form-urlencoded"]
            .iter()
            .any(|kind| content_type.contains(kind))
}
