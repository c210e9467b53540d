//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic, including level names)
//! - Validate the bind address and route paths
//! - Reject empty per-target logger names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ServiceConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    InvalidBindAddress(String),

    #[error("{field} {path:?} must start with '/'")]
    InvalidPath { field: &'static str, path: String },

    #[error("logging.loggers contains an empty target name")]
    EmptyLoggerTarget,
}

/// Returns `true` for paths the router accepts.
pub fn is_route_path(path: &str) -> bool {
    path.starts_with('/')
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if !is_route_path(&config.app.health_path) {
        errors.push(ValidationError::InvalidPath {
            field: "app.health_path",
            path: config.app.health_path.clone(),
        });
    }

    for path in &config.app.skip_route_logging {
        if !is_route_path(path) {
            errors.push(ValidationError::InvalidPath {
                field: "app.skip_route_logging",
                path: path.clone(),
            });
        }
    }

    if config.logging.loggers.keys().any(|target| target.trim().is_empty()) {
        errors.push(ValidationError::EmptyLoggerTarget);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
