//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, level names checked by serde)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → AppBuilder::from_config / LoggingPipeline::new
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{AppConfig, ListenerConfig, ServiceConfig};
pub use validation::{validate_config, ValidationError};
