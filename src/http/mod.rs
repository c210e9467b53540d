//! HTTP assembly subsystem.
//!
//! # Data Flow
//! ```text
//! AppBuilder (server.rs)
//!     → observability::logging (configured once)
//!     → health.rs (GET <health_path>)
//!     → middleware/ (fixed chain) + caller middleware
//!     → axum::Router, served by server::serve
//! ```

pub mod health;
pub mod middleware;
pub mod server;

pub use health::{HealthStatus, DEFAULT_HEALTH_PATH};
pub use server::{create_app, serve, shutdown_signal, AppBuilder, AssemblyError};
