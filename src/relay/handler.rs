//! HTTP handler for the agent-facing relay endpoint
//!
//! `/api/relay` multiplexes on the `action` query parameter:
//! - GET  ?action=poll                      : hand the oldest job to the agent
//! - POST ?action=complete                  : stage the agent's result
//! - POST ?action=queue                     : enqueue a job, return its id
//! - GET  ?action=result&id=<id>[&rewrite=1]: single non-blocking read

use super::broker::Broker;
use super::types::*;
use crate::error::Error;
use crate::rewrite::{tunnel_location, ContentRewriter, RELAY_PATH};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

/// Shared state for the relay handler
#[derive(Clone)]
pub struct RelayState {
    pub broker: Arc<Broker>,
    pub rewriter: Arc<ContentRewriter>,
}

/// Create the relay router
pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route(RELAY_PATH, get(relay).post(relay))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct RelayQuery {
    action: Option<String>,
    id: Option<String>,
    rewrite: Option<String>,
}

async fn relay(
    State(state): State<RelayState>,
    Query(params): Query<RelayQuery>,
    body: Bytes,
) -> Response {
    state.broker.collect_garbage().await;

    match params.action.as_deref() {
        Some("poll") => poll(&state).await,
        Some("complete") => complete(&state, &body).await,
        Some("queue") => queue(&state, &body).await,
        Some("result") => result(&state, params.id, params.rewrite.as_deref()).await,
        _ => bad_request("Invalid action"),
    }
}

// =============================================================================
// Actions
// =============================================================================

async fn poll(state: &RelayState) -> Response {
    let job = state.broker.poll().await;
    Json(PollResponse {
        pending: job.is_some(),
        job,
    })
    .into_response()
}

async fn complete(state: &RelayState, body: &Bytes) -> Response {
    let request: CompleteRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return bad_request(format!("Invalid body: {}", e)),
    };
    let result = match request.into_result() {
        Ok(result) => result,
        Err(e) => return error_response(&e),
    };

    state.broker.complete(result).await;
    Json(CompleteResponse { success: true }).into_response()
}

async fn queue(state: &RelayState, body: &Bytes) -> Response {
    let request: QueueRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return bad_request(format!("Invalid body: {}", e)),
    };
    let Some(path) = request.path.filter(|p| !p.is_empty()) else {
        return bad_request("Missing path");
    };

    let job = match Job::new(request.method, &path) {
        Ok(job) => job
            .with_headers(request.headers.unwrap_or_default())
            .with_body(request.body),
        Err(e) => return error_response(&e),
    };

    let id = state.broker.submit(job).await;
    Json(QueueResponse { success: true, id }).into_response()
}

async fn result(state: &RelayState, id: Option<String>, rewrite: Option<&str>) -> Response {
    let Some(id) = id.filter(|id| !id.is_empty()) else {
        return bad_request("Missing id");
    };

    let result = state.broker.take_result(&id).await.map(|result| {
        if wants_rewrite(rewrite) {
            prepare_for_navigation(&state.rewriter, result)
        } else {
            result
        }
    });

    Json(ResultResponse {
        completed: result.is_some(),
        result,
    })
    .into_response()
}

fn wants_rewrite(flag: Option<&str>) -> bool {
    matches!(flag, Some("1") | Some("true"))
}

/// Shape a result for the bootstrap page: HTML (typed or untyped) comes back
/// as rewritten text, and a root-relative redirect stays inside the tunnel.
fn prepare_for_navigation(rewriter: &ContentRewriter, mut result: JobResult) -> JobResult {
    if let Some(location) = result.header("location").and_then(tunnel_location) {
        result.set_header("location", location);
    }

    if let Some(html) = result.html_document() {
        match rewriter.rewrite_html(&html) {
            Ok(body) => {
                result.body = body;
                result.is_base64 = false;
            }
            Err(e) => {
                tracing::warn!(job_id = %result.id, "Serving document unrewritten: {}", e);
            }
        }
    }
    result
}

// =============================================================================
// Errors
// =============================================================================

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiError::bad_request(message))).into_response()
}

fn error_response(err: &Error) -> Response {
    (err.status_code(), Json(ApiError::from_error(err))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_state() -> RelayState {
        RelayState {
            broker: Arc::new(Broker::default()),
            rewriter: Arc::new(ContentRewriter::new().unwrap()),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 64)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn send(state: &RelayState, method: &str, uri: &str, body: &str) -> Response {
        relay_router(state.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_poll_empty() {
        let state = make_state();
        let resp = send(&state, "GET", "/api/relay?action=poll", "").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!({"pending": false}));
    }

    #[tokio::test]
    async fn test_queue_poll_complete_result() {
        let state = make_state();

        let resp = send(
            &state,
            "POST",
            "/api/relay?action=queue",
            r#"{"method":"get","path":"/dashboard","headers":{}}"#,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        let id = json["id"].as_str().unwrap().to_string();

        let resp = send(&state, "GET", "/api/relay?action=poll", "").await;
        let json = body_json(resp).await;
        assert_eq!(json["pending"], true);
        assert_eq!(json["job"]["id"], id.as_str());
        assert_eq!(json["job"]["method"], "GET");
        assert_eq!(json["job"]["path"], "/dashboard");
        assert!(json["job"]["timestamp"].is_u64());

        let uri = format!("/api/relay?action=result&id={}", id);
        let json = body_json(send(&state, "GET", &uri, "").await).await;
        assert_eq!(json, serde_json::json!({"completed": false}));

        let complete = serde_json::json!({
            "id": id,
            "status": 200,
            "headers": {"Content-Type": "text/plain"},
            "body": "OK",
            "isBase64": false
        });
        let resp = send(
            &state,
            "POST",
            "/api/relay?action=complete",
            &complete.to_string(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!({"success": true}));

        let json = body_json(send(&state, "GET", &uri, "").await).await;
        assert_eq!(json["completed"], true);
        assert_eq!(json["result"]["status"], 200);
        assert_eq!(json["result"]["body"], "OK");

        // Single read
        let json = body_json(send(&state, "GET", &uri, "").await).await;
        assert_eq!(json["completed"], false);
    }

    #[tokio::test]
    async fn test_result_with_rewrite() {
        let state = make_state();
        state
            .broker
            .complete(
                JobResult::new("page", 200, r#"<html><head></head><body><a href="/foo">f</a></body></html>"#)
                    .with_header("Content-Type", "text/html; charset=utf-8"),
            )
            .await;
        state
            .broker
            .complete(JobResult::new("raw", 200, r#"<a href="/foo">f</a>"#).with_header("Content-Type", "text/html"))
            .await;

        let json = body_json(send(&state, "GET", "/api/relay?action=result&id=page&rewrite=1", "").await).await;
        let body = json["result"]["body"].as_str().unwrap();
        assert!(body.contains(r#"href="/tunnel/foo""#));
        assert!(body.contains("data-tunnelgate-patch"));

        let json = body_json(send(&state, "GET", "/api/relay?action=result&id=raw", "").await).await;
        assert_eq!(json["result"]["body"], r#"<a href="/foo">f</a>"#);
    }

    #[tokio::test]
    async fn test_rewrite_untyped_html() {
        let state = make_state();
        state
            .broker
            .complete(JobResult::new("bare", 200, r#"<a href="/foo">f</a>"#))
            .await;

        let json = body_json(send(&state, "GET", "/api/relay?action=result&id=bare&rewrite=1", "").await).await;
        let body = json["result"]["body"].as_str().unwrap();
        assert!(body.contains(r#"href="/tunnel/foo""#));
        assert!(body.contains("data-tunnelgate-patch"));
    }

    #[tokio::test]
    async fn test_rewrite_decodes_base64_html() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let state = make_state();
        let mut result = JobResult::new(
            "latin1",
            200,
            STANDARD.encode(b"<html><head></head><body><a href=\"/caf\xe9\">caf\xe9</a></body></html>"),
        )
        .with_header("Content-Type", "text/html; charset=iso-8859-1");
        result.is_base64 = true;
        state.broker.complete(result).await;

        let json = body_json(send(&state, "GET", "/api/relay?action=result&id=latin1&rewrite=1", "").await).await;
        assert_eq!(json["result"]["isBase64"], false);
        let body = json["result"]["body"].as_str().unwrap();
        assert!(body.contains("href=\"/tunnel/caf\u{e9}\""));
        assert!(body.contains("data-tunnelgate-patch"));
    }

    #[tokio::test]
    async fn test_rewrite_keeps_redirect_in_tunnel() {
        let state = make_state();
        state
            .broker
            .complete(
                JobResult::new("login", 302, "")
                    .with_header("Location", "/home")
                    .with_header("Content-Type", "text/html"),
            )
            .await;
        state
            .broker
            .complete(JobResult::new("sso", 302, "").with_header("Location", "https://sso.example/"))
            .await;

        let json = body_json(send(&state, "GET", "/api/relay?action=result&id=login&rewrite=1", "").await).await;
        assert_eq!(json["result"]["status"], 302);
        assert_eq!(json["result"]["headers"]["Location"], "/tunnel/home");

        let json = body_json(send(&state, "GET", "/api/relay?action=result&id=sso&rewrite=1", "").await).await;
        assert_eq!(json["result"]["headers"]["Location"], "https://sso.example/");
    }

    #[tokio::test]
    async fn test_relay_call_runs_due_sweep() {
        let state = RelayState {
            broker: Arc::new(Broker::new(RelayConfig {
                gc_interval_secs: 0,
                ..RelayConfig::default()
            })),
            rewriter: Arc::new(ContentRewriter::new().unwrap()),
        };
        let stale = now_millis() - 60_000;
        state
            .broker
            .queue()
            .enqueue(Job::new("GET", "/old").unwrap().with_timestamp(stale))
            .await;
        let mut orphan = JobResult::new("orphan", 200, "");
        orphan.timestamp = stale;
        state.broker.store().put(orphan).await;
        state
            .broker
            .store()
            .put(JobResult::new("fresh", 200, ""))
            .await;

        let resp = send(&state, "GET", "/api/relay?action=result&id=unknown", "").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.broker.queue().is_empty().await);
        assert_eq!(state.broker.store().len().await, 1);
        assert!(state.broker.take_result("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_rewrite_skips_non_html() {
        let state = make_state();
        state
            .broker
            .complete(JobResult::new("json", 200, r#"{"href":"/foo"}"#).with_header("Content-Type", "application/json"))
            .await;

        let json = body_json(send(&state, "GET", "/api/relay?action=result&id=json&rewrite=true", "").await).await;
        assert_eq!(json["result"]["body"], r#"{"href":"/foo"}"#);
    }

    #[tokio::test]
    async fn test_complete_unknown_id_is_accepted() {
        let state = make_state();
        let resp = send(
            &state,
            "POST",
            "/api/relay?action=complete",
            r#"{"id":"never-issued","status":204}"#,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.broker.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_complete_validation() {
        let state = make_state();

        let resp = send(&state, "POST", "/api/relay?action=complete", r#"{"status":200}"#).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");

        let resp = send(&state, "POST", "/api/relay?action=complete", r#"{"id":""}"#).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&state, "POST", "/api/relay?action=complete", "{not json").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.broker.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_queue_validation() {
        let state = make_state();

        let resp = send(&state, "POST", "/api/relay?action=queue", r#"{"method":"GET"}"#).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["message"], "Missing path");

        let resp = send(
            &state,
            "POST",
            "/api/relay?action=queue",
            r#"{"path":"https://evil.example/"}"#,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&state, "POST", "/api/relay?action=queue", "").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.broker.queue().is_empty().await);
    }

    #[tokio::test]
    async fn test_result_requires_id() {
        let state = make_state();
        let resp = send(&state, "GET", "/api/relay?action=result", "").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["message"], "Missing id");
    }

    #[tokio::test]
    async fn test_invalid_action() {
        let state = make_state();
        for uri in ["/api/relay", "/api/relay?action=explode"] {
            let resp = send(&state, "GET", uri, "").await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(resp).await["error"]["message"], "Invalid action");
        }
    }
}
