//! Request enrichment and completion logging.
//!
//! Runs inside the context scope. Adds request attributes to the context,
//! then emits one completion record per request unless the path is
//! excluded (health checks would otherwise flood the output).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::context::RequestContext;

/// Context keys written by this stage; plugins may not claim them.
pub const ENRICHED_KEYS: [&str; 3] = ["method", "path", "client_ip"];

/// Paths that never produce a completion record.
#[derive(Debug, Clone)]
pub struct EnrichState {
    skip_routes: Arc<HashSet<String>>,
}

impl EnrichState {
    pub fn new(skip_routes: impl IntoIterator<Item = String>) -> Self {
        Self {
            skip_routes: Arc::new(skip_routes.into_iter().collect()),
        }
    }

    pub fn is_skipped(&self, path: &str) -> bool {
        self.skip_routes.contains(path)
    }
}

pub async fn enrich_middleware(
    State(state): State<EnrichState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let path = request.uri().path().to_string();

    if let Some(ctx) = request.extensions().get::<RequestContext>() {
        ctx.set("method", request.method().as_str());
        ctx.set("path", path.as_str());
        if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
            ctx.set("client_ip", addr.ip().to_string());
        }
    }

    let response = next.run(request).await;
    if state.is_skipped(&path) {
        return response;
    }

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    if response.status().is_server_error() {
        tracing::error!(status, duration_ms, "request failed");
    } else {
        tracing::info!(status, duration_ms, "request completed");
    }
    response
}
