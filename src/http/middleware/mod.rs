//! Fixed middleware chain.
//!
//! ```text
//! context.rs  (establish RequestContext, run plugins, echo id headers)
//!     → tower_http TraceLayer (serving-runtime events)
//!     → enrich.rs (method/path/client_ip, completion record)
//!     → caller middleware
//!     → handler
//! ```

pub mod context;
pub mod enrich;

pub use context::{context_middleware, ContextState};
pub use enrich::{enrich_middleware, EnrichState, ENRICHED_KEYS};
