//! Context establishment middleware.
//!
//! First stage of the fixed chain: creates the request's
//! [`RequestContext`], fills it from the configured plugins, exposes it as a
//! request extension and keeps it in task-local scope while the rest of the
//! chain runs.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::context::{ContextPlugin, RequestContext};

/// Plugins run, in order, for every request.
#[derive(Clone)]
pub struct ContextState {
    plugins: Arc<[Arc<dyn ContextPlugin>]>,
}

impl ContextState {
    pub fn new(plugins: Vec<Arc<dyn ContextPlugin>>) -> Self {
        Self {
            plugins: plugins.into(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.key())
    }
}

pub async fn context_middleware(
    State(state): State<ContextState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = RequestContext::new();
    let mut stored = Vec::with_capacity(state.plugins.len());

    for plugin in state.plugins.iter() {
        match plugin.extract(&request) {
            Ok(Some(value)) => {
                if let Err(error) = ctx.insert(plugin.key(), value.clone()) {
                    tracing::error!(%error, plugin = plugin.key(), "context plugin skipped");
                    continue;
                }
                stored.push((Arc::clone(plugin), value));
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%error, plugin = plugin.key(), "request rejected by context plugin");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": error.to_string() })),
                )
                    .into_response();
            }
        }
    }

    request.extensions_mut().insert(ctx.clone());
    let mut response = ctx.scope(next.run(request)).await;

    for (plugin, value) in &stored {
        plugin.enrich_response(value, response.headers_mut());
    }
    response
}
