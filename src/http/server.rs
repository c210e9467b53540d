//! Application assembly and serving.
//!
//! # Responsibilities
//! - Configure logging exactly once per build
//! - Register the health route
//! - Wire the fixed middleware chain, then caller middleware
//! - Serve the assembled router with graceful shutdown
//!
//! # Design Decisions
//! - Chain order is fixed: context, trace, enrichment, caller middleware
//! - Caller middleware keeps the order it was given (first = outermost)
//! - Excluded paths default to the health path
//! - Health route collisions are left to axum (it panics on duplicates)

use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, MethodRouter, Route},
    Router,
};
use tokio::net::TcpListener;
use tower::{Layer, Service};
use tower_http::trace::TraceLayer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::validation::is_route_path;
use crate::config::AppConfig;
use crate::context::{ContextPlugin, IdPlugin, RequestContext};
use crate::http::health::{get_health, DEFAULT_HEALTH_PATH};
use crate::http::middleware::{
    context_middleware, enrich_middleware, ContextState, EnrichState, ENRICHED_KEYS,
};
use crate::observability::{LoggingConfig, LoggingError, LoggingPipeline};

type Middleware = Box<dyn FnOnce(Router) -> Router + Send>;

/// Errors raised while assembling the application.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("route path {0:?} must start with '/'")]
    InvalidPath(String),

    #[error("context plugin key {0:?} registered twice")]
    DuplicatePluginKey(String),

    #[error("context plugin key {0:?} is reserved for log record metadata")]
    ReservedContextKey(String),

    #[error("context plugin key {0:?} is written by request enrichment")]
    EnrichedContextKey(String),
}

/// Builder for a ready-to-serve application.
///
/// ```no_run
/// use axum::routing::get;
/// use fast_micro::AppBuilder;
///
/// let app = AppBuilder::new()
///     .log_level("INFO")
///     .route("/orders", get(|| async { "[]" }))
///     .build()
///     .expect("valid application");
/// # let _ = app;
/// ```
pub struct AppBuilder {
    log_level: Option<String>,
    logging: LoggingConfig,
    log_writer: Option<BoxMakeWriter>,
    health_path: String,
    skip_route_logging: Vec<String>,
    plugins: Vec<Arc<dyn ContextPlugin>>,
    middleware: Vec<Middleware>,
    routes: Router,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            log_level: None,
            logging: LoggingConfig::default(),
            log_writer: None,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            skip_route_logging: Vec::new(),
            plugins: Vec::new(),
            middleware: Vec::new(),
            routes: Router::new(),
        }
    }

    /// Builder seeded from typed configuration.
    pub fn from_config(app: &AppConfig, logging: &LoggingConfig) -> Self {
        Self::new()
            .logging(logging.clone())
            .health_path(app.health_path.clone())
            .skip_route_logging(app.skip_route_logging.iter().cloned())
    }

    /// Global level by name; parsed in [`build`](Self::build).
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Full logging configuration. A later [`log_level`](Self::log_level)
    /// still overrides its global level.
    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = config;
        self
    }

    /// Send records to `writer` instead of the configured stream.
    ///
    /// Only honoured by the build that installs logging for the process.
    pub fn log_writer<W>(mut self, writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        self.log_writer = Some(BoxMakeWriter::new(writer));
        self
    }

    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Paths excluded from completion logging. Empty means the health path.
    pub fn skip_route_logging<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.skip_route_logging = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Add a context plugin.
    ///
    /// Plugins keyed `request_id` or `correlation_id` replace the built-in
    /// identifier plugins in place.
    pub fn context_plugin<P: ContextPlugin>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Append caller middleware, placed after the fixed chain.
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        self.middleware
            .push(Box::new(move |router: Router| router.layer(layer)));
        self
    }

    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.routes = self.routes.route(path, method_router);
        self
    }

    pub fn merge(mut self, router: Router) -> Self {
        self.routes = self.routes.merge(router);
        self
    }

    pub fn build(self) -> Result<Router, AssemblyError> {
        let mut logging = self.logging;
        if let Some(level) = &self.log_level {
            logging.level = level.parse()?;
        }

        if !is_route_path(&self.health_path) {
            return Err(AssemblyError::InvalidPath(self.health_path));
        }
        if let Some(bad) = self.skip_route_logging.iter().find(|p| !is_route_path(p)) {
            return Err(AssemblyError::InvalidPath(bad.clone()));
        }
        let skip_routes = if self.skip_route_logging.is_empty() {
            vec![self.health_path.clone()]
        } else {
            self.skip_route_logging
        };

        let plugins = resolve_plugins(self.plugins)?;

        let mut pipeline = LoggingPipeline::new(&logging);
        if let Some(writer) = self.log_writer {
            pipeline = pipeline.with_writer(writer);
        }
        pipeline.init()?;

        let context_state = ContextState::new(plugins);
        let middleware_count = self.middleware.len();
        tracing::info!(
            health_path = %self.health_path,
            skip_routes = ?skip_routes,
            context_keys = ?context_state.keys().collect::<Vec<_>>(),
            middleware = middleware_count,
            "application assembled"
        );

        // Layers added later wrap earlier ones, so build from the inside out.
        let mut router = self.routes.route(&self.health_path, get(get_health));
        for middleware in self.middleware.into_iter().rev() {
            router = middleware(router);
        }
        Ok(router
            .layer(from_fn_with_state(EnrichState::new(skip_routes), enrich_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(from_fn_with_state(context_state, context_middleware)))
    }
}

/// Built-in identifier plugins followed by caller plugins.
fn resolve_plugins(
    extra: Vec<Arc<dyn ContextPlugin>>,
) -> Result<Vec<Arc<dyn ContextPlugin>>, AssemblyError> {
    let mut plugins: Vec<Arc<dyn ContextPlugin>> = vec![
        Arc::new(IdPlugin::request_id()),
        Arc::new(IdPlugin::correlation_id()),
    ];
    let builtin = plugins.len();
    let mut seen = HashSet::new();

    for plugin in extra {
        let key = plugin.key().to_string();
        if RequestContext::is_reserved(&key) {
            return Err(AssemblyError::ReservedContextKey(key));
        }
        if ENRICHED_KEYS.contains(&key.as_str()) {
            return Err(AssemblyError::EnrichedContextKey(key));
        }
        if !seen.insert(key.clone()) {
            return Err(AssemblyError::DuplicatePluginKey(key));
        }
        match plugins[..builtin].iter().position(|p| p.key() == key) {
            Some(index) => plugins[index] = plugin,
            None => plugins.push(plugin),
        }
    }
    Ok(plugins)
}

/// Assemble an application from configuration.
pub fn create_app(app: &AppConfig, logging: &LoggingConfig) -> Result<Router, AssemblyError> {
    AppBuilder::from_config(app, logging).build()
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(error) => {
            tracing::error!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderMap, HeaderValue, Request as HttpRequest, StatusCode};
    use axum::middleware::{from_fn, Next};
    use axum::response::Response;
    use axum::Extension;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::context::HeaderPlugin;
    use crate::observability::{CaptureWriter, LoggingGuard};

    fn capture() -> (CaptureWriter, LoggingGuard) {
        let writer = CaptureWriter::default();
        let guard = LoggingPipeline::new(&LoggingConfig::default())
            .with_writer(writer.clone())
            .set_default();
        (writer, guard)
    }

    fn completions(writer: &CaptureWriter) -> Vec<Value> {
        writer
            .records()
            .into_iter()
            .filter(|r| r["event"] == "request completed" || r["event"] == "request failed")
            .collect()
    }

    async fn send(app: Router, request: Request) -> (StatusCode, HeaderMap, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn build_err(builder: AppBuilder) -> AssemblyError {
        match builder.build() {
            Ok(_) => panic!("expected assembly to fail"),
            Err(err) => err,
        }
    }

    fn get_request(uri: &str) -> Request {
        HttpRequest::get(uri).body(Body::empty()).unwrap()
    }

    async fn whoami(Extension(ctx): Extension<RequestContext>) -> String {
        tracing::info!("inside handler");
        ctx.request_id().unwrap_or_default()
    }

    async fn mark_a(request: Request, next: Next) -> Response {
        let mut response = next.run(request).await;
        response.headers_mut().append("x-trail", HeaderValue::from_static("a"));
        response
    }

    async fn mark_b(request: Request, next: Next) -> Response {
        let mut response = next.run(request).await;
        response.headers_mut().append("x-trail", HeaderValue::from_static("b"));
        response
    }

    async fn expose_context(request: Request, next: Next) -> Response {
        let seen = RequestContext::current().and_then(|ctx| ctx.request_id());
        let mut response = next.run(request).await;
        if let Some(id) = seen.and_then(|id| HeaderValue::from_str(&id).ok()) {
            response.headers_mut().insert("x-seen-request-id", id);
        }
        response
    }

    #[tokio::test]
    async fn test_health_succeeds_without_completion_record() {
        let (writer, _guard) = capture();
        let app = AppBuilder::new().log_level("INFO").build().unwrap();

        let (status, _, body) = send(app, get_request("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["hostname"].is_string());
        assert_eq!(body["status"], "success");
        assert!(body["timestamp"].is_f64());
        assert!(completions(&writer).is_empty());
    }

    #[tokio::test]
    async fn test_route_emits_one_completion_record_with_ids() {
        let (writer, _guard) = capture();
        let app = AppBuilder::new()
            .log_level("INFO")
            .route("/orders", get(whoami))
            .build()
            .unwrap();

        let (status, headers, _) = send(app, get_request("/orders")).await;
        assert_eq!(status, StatusCode::OK);

        let records = completions(&writer);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["level"], "info");
        assert_eq!(record["status"], 200);
        assert_eq!(record["method"], "GET");
        assert_eq!(record["path"], "/orders");
        assert!(record["duration_ms"].is_f64());
        assert_eq!(
            record["request_id"],
            headers["x-request-id"].to_str().unwrap()
        );
        assert_eq!(
            record["correlation_id"],
            headers["x-correlation-id"].to_str().unwrap()
        );
    }

    #[tokio::test]
    async fn test_plugin_value_appears_in_every_record_of_the_request() {
        let (writer, _guard) = capture();
        let app = AppBuilder::new()
            .context_plugin(HeaderPlugin::user_agent())
            .route("/orders", get(whoami))
            .build()
            .unwrap();

        let request = HttpRequest::get("/orders")
            .header("user-agent", "probe/1.0")
            .body(Body::empty())
            .unwrap();
        let _ = send(app, request).await;

        let records: Vec<Value> = writer
            .records()
            .into_iter()
            .filter(|r| r.get("request_id").is_some())
            .collect();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record["user_agent"], "probe/1.0");
        }
        assert_eq!(records[0]["event"], "inside handler");
        assert_eq!(records[0]["request_id"], records[1]["request_id"]);
    }

    #[tokio::test]
    async fn test_handler_sees_the_echoed_request_id() {
        let (_writer, _guard) = capture();
        let app = AppBuilder::new().route("/me", get(whoami)).build().unwrap();

        let response = app.oneshot(get_request("/me")).await.unwrap();
        let header = response.headers()["x-request-id"].to_str().unwrap().to_string();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), header);
    }

    #[tokio::test]
    async fn test_incoming_ids_are_reused() {
        let (_writer, _guard) = capture();
        let app = AppBuilder::new().route("/me", get(whoami)).build().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let corr = uuid::Uuid::new_v4().to_string();

        let request = HttpRequest::get("/me")
            .header("x-request-id", &id)
            .header("x-correlation-id", &corr)
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = send(app, request).await;

        assert_eq!(headers["x-request-id"], id.as_str());
        assert_eq!(headers["x-correlation-id"], corr.as_str());
    }

    #[tokio::test]
    async fn test_malformed_request_id_is_rejected() {
        let (writer, _guard) = capture();
        let app = AppBuilder::new().route("/me", get(whoami)).build().unwrap();

        let request = HttpRequest::get("/me")
            .header("x-request-id", "not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("x-request-id"));
        assert!(completions(&writer).is_empty());
    }

    #[tokio::test]
    async fn test_builtin_id_plugin_can_be_replaced() {
        let (_writer, _guard) = capture();
        let app = AppBuilder::new()
            .context_plugin(IdPlugin::request_id().validate(false))
            .route("/me", get(whoami))
            .build()
            .unwrap();

        let request = HttpRequest::get("/me")
            .header("x-request-id", "job-17")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-request-id"], "job-17");
    }

    #[tokio::test]
    async fn test_caller_middleware_runs_after_fixed_chain_in_order() {
        let (_writer, _guard) = capture();
        let app = AppBuilder::new()
            .layer(from_fn(expose_context))
            .layer(from_fn(mark_a))
            .layer(from_fn(mark_b))
            .route("/me", get(whoami))
            .build()
            .unwrap();

        let (_, headers, _) = send(app, get_request("/me")).await;

        assert_eq!(headers["x-seen-request-id"], headers["x-request-id"]);
        let trail: Vec<&str> = headers
            .get_all("x-trail")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(trail, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_custom_skip_list_replaces_default() {
        let (writer, _guard) = capture();
        let app = AppBuilder::new()
            .skip_route_logging(["/quiet"])
            .route("/quiet", get(|| async { "shh" }))
            .build()
            .unwrap();

        let _ = send(app.clone(), get_request("/quiet")).await;
        assert!(completions(&writer).is_empty());

        let _ = send(app, get_request("/health")).await;
        let records = completions(&writer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["path"], "/health");
    }

    #[tokio::test]
    async fn test_custom_health_path() {
        let (writer, _guard) = capture();
        let app = AppBuilder::new().health_path("/healthz").build().unwrap();

        let (status, _, body) = send(app.clone(), get_request("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (status, _, _) = send(app, get_request("/health")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(completions(&writer).iter().all(|r| r["path"] != "/healthz"));
    }

    #[tokio::test]
    async fn test_server_errors_log_at_error_level() {
        let (writer, _guard) = capture();
        let app = AppBuilder::new()
            .route("/boom", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .build()
            .unwrap();

        let (status, _, _) = send(app, get_request("/boom")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let records = completions(&writer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["level"], "error");
        assert_eq!(records[0]["event"], "request failed");
    }

    #[test]
    fn test_invalid_log_level_fails_build() {
        let err = build_err(AppBuilder::new().log_level("VERBOSE"));
        assert!(matches!(
            err,
            AssemblyError::Logging(LoggingError::InvalidLevel(ref name)) if name == "VERBOSE"
        ));
    }

    #[test]
    fn test_invalid_paths_fail_build() {
        let err = build_err(AppBuilder::new().health_path("health"));
        assert!(matches!(err, AssemblyError::InvalidPath(ref p) if p == "health"));

        let err = build_err(AppBuilder::new().skip_route_logging(["/ok", "nope"]));
        assert!(matches!(err, AssemblyError::InvalidPath(ref p) if p == "nope"));
    }

    #[test]
    fn test_plugin_key_conflicts_fail_build() {
        let err = build_err(
            AppBuilder::new()
                .context_plugin(HeaderPlugin::user_agent())
                .context_plugin(HeaderPlugin::user_agent()),
        );
        assert!(matches!(err, AssemblyError::DuplicatePluginKey(ref k) if k == "user_agent"));

        let err = build_err(
            AppBuilder::new().context_plugin(HeaderPlugin::new("level", axum::http::header::ACCEPT)),
        );
        assert!(matches!(err, AssemblyError::ReservedContextKey(ref k) if k == "level"));
    }

    #[test]
    fn test_plugin_cannot_claim_enriched_keys() {
        for key in ENRICHED_KEYS {
            let err = build_err(
                AppBuilder::new().context_plugin(HeaderPlugin::new(key, axum::http::header::ACCEPT)),
            );
            assert!(matches!(err, AssemblyError::EnrichedContextKey(ref k) if k == key));
        }
    }

    #[test]
    fn test_create_app_from_config() {
        let app = AppConfig {
            health_path: "/status".into(),
            skip_route_logging: Vec::new(),
        };
        assert!(create_app(&app, &LoggingConfig::default()).is_ok());
    }
}
