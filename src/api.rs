//! Unified API router for the tunnelgate broker
//!
//! Merges the module routers into a single axum `Router` with CORS and
//! request tracing.
//!
//! ## Endpoint Map
//!
//! | Path              | Module | Description                               |
//! |-------------------|--------|-------------------------------------------|
//! | `/health`         | api    | Liveness check                            |
//! | `/api/proxy`      | proxy  | Client request, blocks until the agent answers |
//! | `/api/relay`      | relay  | Agent poll/complete, browser queue/result |
//! | `/tunnel/*path`   | tunnel | Bootstrap page for tunneled navigation    |

use crate::config::TunnelGateConfig;
use crate::proxy::{proxy_router, ProxyState};
use crate::relay::{relay_router, Broker, RelayState};
use crate::rewrite::ContentRewriter;
use crate::tunnel::{tunnel_router, TunnelState};
use axum::{
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the complete broker HTTP application
///
/// Merges the relay, proxy and tunnel routers, adds CORS and tracing
/// middleware, and returns a single `Router` ready for `axum::serve`.
pub fn build_app(
    broker: Arc<Broker>,
    rewriter: Arc<ContentRewriter>,
    config: &TunnelGateConfig,
) -> Router {
    let cors = build_cors(&config.server.cors_origins);

    let relay_state = RelayState {
        broker: broker.clone(),
        rewriter: rewriter.clone(),
    };
    let proxy_state = ProxyState {
        broker,
        rewriter,
        rewrite_css: config.rewrite.proxy_css,
    };
    let tunnel_state = TunnelState {
        config: Arc::new(config.tunnel.clone()),
    };

    Router::new()
        .route("/health", get(health_check))
        .merge(relay_router(relay_state))
        .merge(proxy_router(proxy_state))
        .merge(tunnel_router(tunnel_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// =============================================================================
// Root handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// CORS
// =============================================================================

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("x-csrftoken"),
            header::HeaderName::from_static("x-csrf-token"),
        ]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}
