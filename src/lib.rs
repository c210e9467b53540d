//! Preconfigured axum applications with structured, context-aware logging.
//!
//! ```text
//!   startup:  LoggingConfig ──▶ observability (JSON lines, pinned targets)
//!
//!   request:  context ──▶ trace ──▶ enrich ──▶ caller middleware ──▶ handler
//!               │                     │                                │
//!               └── RequestContext ───┴──── merged into every record ──┘
//! ```

pub mod config;
pub mod context;
pub mod http;
pub mod observability;

pub use config::{AppConfig, ServiceConfig};
pub use context::RequestContext;
pub use http::{create_app, serve, AppBuilder, AssemblyError};
pub use observability::{init_logging, LogLevel, LoggingConfig};
