//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! LoggingConfig (typed, validated)
//!     → logging.rs (filter + pinned targets, install/reload)
//!     → format.rs (one JSON object per event)
//!         ← context::RequestContext (merged when a request is in scope)
//!     → stdout / stderr / capture.rs
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request context flows into every record emitted while serving
//! - Installation is idempotent

pub mod capture;
pub mod format;
pub mod level;
pub mod logging;

pub use capture::CaptureWriter;
pub use format::ContextJsonFormat;
pub use level::LogLevel;
pub use logging::{
    init_logging, LogStream, LoggingConfig, LoggingError, LoggingGuard, LoggingPipeline,
    PINNED_TARGETS,
};
