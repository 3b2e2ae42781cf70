//! HTTP handler for the client-facing proxy endpoint
//!
//! `GET|POST|PUT|DELETE|PATCH /api/proxy?path=<p>` queues the request for
//! the agent and holds the connection until the result arrives or the relay
//! deadline passes.

use super::headers::{decode_body, extract_body, forward_headers, response_headers};
use crate::error::{Error, Result};
use crate::relay::{Broker, Job, JobResult};
use crate::rewrite::{ContentRewriter, PROXY_PATH};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

/// Body returned when the agent misses the deadline
pub const TIMEOUT_MESSAGE: &str = "Proxy Timeout - Agent did not respond";

/// Shared state for the proxy handler
#[derive(Clone)]
pub struct ProxyState {
    pub broker: Arc<Broker>,
    pub rewriter: Arc<ContentRewriter>,
    /// Rewrite `url()` references in proxied stylesheets
    pub rewrite_css: bool,
}

/// Create the proxy router
pub fn proxy_router(state: ProxyState) -> Router {
    Router::new()
        .route(
            PROXY_PATH,
            get(proxy_request)
                .post(proxy_request)
                .put(proxy_request)
                .delete(proxy_request)
                .patch(proxy_request),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    path: Option<String>,
}

async fn proxy_request(
    State(state): State<ProxyState>,
    method: Method,
    Query(params): Query<ProxyQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.broker.collect_garbage().await;

    let Some(path) = params.path.filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing path").into_response();
    };

    let job = match build_job(&method, &path, &headers, &body) {
        Ok(job) => job,
        Err(e) => return (e.status_code(), e.to_string()).into_response(),
    };

    match state.broker.execute(job).await {
        Ok(result) => match build_response(result, &state) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(path = %path, "Unusable agent result: {}", e);
                (e.status_code(), e.to_string()).into_response()
            }
        },
        Err(Error::Timeout(_)) => (StatusCode::GATEWAY_TIMEOUT, TIMEOUT_MESSAGE).into_response(),
        Err(e) => (e.status_code(), e.to_string()).into_response(),
    }
}

fn build_job(method: &Method, path: &str, headers: &HeaderMap, body: &Bytes) -> Result<Job> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let extracted = extract_body(method, content_type, body);

    let job = Job::new(method.as_str(), path)?.with_headers(forward_headers(headers));
    Ok(match extracted.body {
        Some(serde_json::Value::String(encoded)) if extracted.is_base64 => {
            job.with_binary_body(encoded)
        }
        other => job.with_body(other),
    })
}

fn build_response(result: JobResult, state: &ProxyState) -> Result<Response> {
    let status = StatusCode::from_u16(result.status).map_err(|_| {
        Error::Upstream(format!(
            "Invalid status {} for job {}",
            result.status, result.id
        ))
    })?;
    let headers = response_headers(&result);

    let body = if state.rewrite_css && result.is_text_of_type("text/css") {
        Bytes::from(state.rewriter.rewrite_css(&result.body))
    } else {
        decode_body(&result)?
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn make_state(config: RelayConfig) -> ProxyState {
        ProxyState {
            broker: Arc::new(Broker::new(config)),
            rewriter: Arc::new(ContentRewriter::new().unwrap()),
            rewrite_css: true,
        }
    }

    fn fast_config() -> RelayConfig {
        RelayConfig {
            poll_interval_ms: 5,
            max_attempts: 400,
            ..RelayConfig::default()
        }
    }

    /// Act as the agent: wait for one job and answer it
    fn spawn_agent(
        broker: Arc<Broker>,
        respond: impl FnOnce(Job) -> JobResult + Send + 'static,
    ) -> tokio::task::JoinHandle<Job> {
        tokio::spawn(async move {
            loop {
                if let Some(job) = broker.poll().await {
                    broker.complete(respond(job.clone())).await;
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_proxy_end_to_end() {
        let state = make_state(fast_config());
        let agent = spawn_agent(state.broker.clone(), |job| {
            JobResult::new(job.id, 200, "OK").with_header("Content-Type", "text/plain")
        });

        let resp = proxy_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/proxy?path=/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/plain");
        assert_eq!(body_bytes(resp).await.as_ref(), b"OK");

        let job = agent.await.unwrap();
        assert_eq!(job.method, "GET");
        assert_eq!(job.path, "/status");
        assert!(job.body.is_none());
    }

    #[tokio::test]
    async fn test_proxy_forwards_method_body_and_headers() {
        let state = make_state(fast_config());
        let agent = spawn_agent(state.broker.clone(), |job| {
            JobResult::new(job.id, 201, r#"{"created":true}"#)
        });

        let resp = proxy_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/proxy?path=%2Fapi%2Fitems%3Fdraft%3D1")
                    .header("content-type", "application/json")
                    .header("cookie", "session=abc")
                    .header("x-csrf-token", "tok")
                    .header("authorization", "Bearer nope")
                    .body(Body::from(r#"{"name":"widget"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::CREATED);

        let job = agent.await.unwrap();
        assert_eq!(job.method, "POST");
        assert_eq!(job.path, "/api/items?draft=1");
        assert_eq!(job.body, Some(serde_json::json!({"name": "widget"})));
        assert_eq!(job.headers.len(), 3);
        assert_eq!(job.headers["Cookie"], "session=abc");
        assert_eq!(job.headers["X-CSRFToken"], "tok");
    }

    #[tokio::test]
    async fn test_proxy_decodes_binary_and_filters_headers() {
        let state = make_state(fast_config());
        spawn_agent(state.broker.clone(), |job| {
            let mut result = JobResult::new(job.id, 200, "iVBORw0KGgo=")
                .with_header("Content-Type", "image/png")
                .with_header("Content-Length", "12")
                .with_header("Content-Encoding", "gzip");
            result.is_base64 = true;
            result
        });

        let resp = proxy_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/proxy?path=/logo.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "image/png");
        assert!(resp.headers().get("content-encoding").is_none());
        assert_ne!(
            resp.headers().get("content-length").map(|v| v.as_bytes()),
            Some(&b"12"[..])
        );
        assert_eq!(
            body_bytes(resp).await.as_ref(),
            &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]
        );
    }

    #[tokio::test]
    async fn test_proxy_rewrites_stylesheets() {
        let state = make_state(fast_config());
        spawn_agent(state.broker.clone(), |job| {
            JobResult::new(job.id, 200, "body { background: url(/bg.png) }")
                .with_header("Content-Type", "text/css; charset=utf-8")
        });

        let resp = proxy_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/proxy?path=/site.css")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_bytes(resp).await;
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "body { background: url(/api/proxy?path=/bg.png) }"
        );
    }

    #[tokio::test]
    async fn test_proxy_invalid_status_is_bad_gateway() {
        let state = make_state(fast_config());
        spawn_agent(state.broker.clone(), |job| JobResult::new(job.id, 42, ""));

        let resp = proxy_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/proxy?path=/weird")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_proxy_missing_path() {
        let state = make_state(fast_config());
        let broker = state.broker.clone();

        let resp = proxy_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/proxy")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_bytes(resp).await.as_ref(), b"Missing path");
        assert!(broker.queue().is_empty().await);
    }

    #[tokio::test]
    async fn test_proxy_rejects_absolute_target() {
        let state = make_state(fast_config());

        let resp = proxy_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/proxy?path=https%3A%2F%2Fevil.example%2F")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_proxy_relays_redirect_with_cookies() {
        let state = make_state(fast_config());
        spawn_agent(state.broker.clone(), |job| {
            let mut result = JobResult::new(job.id, 302, "").with_header("Location", "/home");
            result.headers.insert(
                "Set-Cookie".to_string(),
                serde_json::json!(["session=abc", "csrftoken=xyz"]),
            );
            result
        });

        let resp = proxy_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/proxy?path=/login")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("user=me&pass=pw"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()["location"], "/tunnel/home");
        assert_eq!(resp.headers().get_all("set-cookie").iter().count(), 2);
    }

    #[tokio::test]
    async fn test_proxy_call_runs_due_sweep() {
        let state = make_state(RelayConfig {
            gc_interval_secs: 0,
            ..fast_config()
        });
        let stale = crate::relay::now_millis() - 60_000;
        state
            .broker
            .queue()
            .enqueue(Job::new("GET", "/old").unwrap().with_timestamp(stale))
            .await;
        let mut orphan = JobResult::new("orphan", 200, "");
        orphan.timestamp = stale;
        state.broker.store().put(orphan).await;
        let broker = state.broker.clone();

        let resp = proxy_router(state)
            .oneshot(Request::builder().uri("/api/proxy").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(broker.queue().is_empty().await);
        assert!(broker.store().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_times_out_without_agent() {
        let state = make_state(RelayConfig::default());
        let broker = state.broker.clone();
        let started = tokio::time::Instant::now();

        let resp = proxy_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/proxy?path=/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(body_bytes(resp).await.as_ref(), TIMEOUT_MESSAGE.as_bytes());

        // The job stays queued; a late result is simply orphaned
        let job = broker.poll().await.unwrap();
        assert_eq!(job.path, "/status");
        broker.complete(JobResult::new(job.id, 200, "late")).await;
        assert_eq!(broker.store().len().await, 1);
    }
}
