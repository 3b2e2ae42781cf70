//! HTTP handler for `/tunnel` navigation

use super::page::bootstrap_page;
use crate::config::TunnelConfig;
use crate::rewrite::TUNNEL_PREFIX;
use axum::{
    extract::State,
    http::Uri,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use std::sync::Arc;

/// Shared state for the tunnel handler
#[derive(Clone)]
pub struct TunnelState {
    pub config: Arc<TunnelConfig>,
}

/// Create the tunnel router
pub fn tunnel_router(state: TunnelState) -> Router {
    Router::new()
        .route(TUNNEL_PREFIX, get(tunnel_page))
        .route("/tunnel/", get(tunnel_page))
        .route("/tunnel/*path", get(tunnel_page))
        .with_state(state)
}

/// GET /tunnel/*path
async fn tunnel_page(State(state): State<TunnelState>, uri: Uri) -> impl IntoResponse {
    let path = service_path(&uri);
    tracing::debug!(path = %path, "Serving tunnel bootstrap page");
    Html(bootstrap_page(&path, &state.config))
}

/// Private-service path and query addressed by a tunnel URI
pub fn service_path(uri: &Uri) -> String {
    let rest = uri
        .path()
        .strip_prefix(TUNNEL_PREFIX)
        .unwrap_or_else(|| uri.path());
    let path = if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    };

    match uri.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", path, query),
        _ => path,
    }
}
