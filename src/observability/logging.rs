//! Structured logging.
//!
//! # Responsibilities
//! - Turn a [`LoggingConfig`] into a level filter and a JSON formatting layer
//! - Install that pipeline globally (idempotent) or for the current thread
//! - Pin the serving-runtime targets regardless of the global level
//!
//! # Design Decisions
//! - Configuration is an explicit value, validated when parsed
//! - The formatting layer is installed once per process; later calls only
//!   swap the filter through a reload handle, so lines are never duplicated
//! - Explicit per-target levels win over the pinned targets

use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, Registry};

use crate::observability::format::ContextJsonFormat;
use crate::observability::level::LogLevel;

/// Serving-runtime targets held at fixed levels.
///
/// `hyper` carries server internals, `tower_http::trace` emits one event per
/// request and would flood the output at verbose levels.
pub const PINNED_TARGETS: [(&str, LogLevel); 2] = [
    ("hyper", LogLevel::Info),
    ("tower_http::trace", LogLevel::Warning),
];

static INSTALLED: Mutex<Option<reload::Handle<Targets, Registry>>> = Mutex::new(None);

/// Errors raised while configuring logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("unrecognized log level name {0:?} (expected trace, debug, info, warning, error or critical)")]
    InvalidLevel(String),

    #[error("failed to install logging pipeline: {0}")]
    Install(String),
}

/// Output stream for rendered records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    #[default]
    Stdout,
    Stderr,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global minimum level.
    pub level: LogLevel,

    /// Stream records are written to.
    pub stream: LogStream,

    /// Per-target level overrides (e.g. `"sqlx" = "warning"`).
    pub loggers: BTreeMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Default configuration at the named global level.
    pub fn with_level(level: &str) -> Result<Self, LoggingError> {
        Ok(Self {
            level: level.parse()?,
            ..Self::default()
        })
    }

    /// Override the level of one target.
    pub fn logger(mut self, target: impl Into<String>, level: LogLevel) -> Self {
        self.loggers.insert(target.into(), level);
        self
    }

    /// Build the level filter this configuration describes.
    pub fn filter(&self) -> Targets {
        let mut targets = Targets::new().with_default(LevelFilter::from(self.level));
        for (target, level) in PINNED_TARGETS {
            targets = targets.with_target(target, LevelFilter::from(level));
        }
        for (target, level) in &self.loggers {
            targets = targets.with_target(target.clone(), LevelFilter::from(*level));
        }
        targets
    }
}

/// Keeps a thread-scoped pipeline active; dropping it tears the pipeline down.
#[must_use = "the pipeline is removed when the guard is dropped"]
pub struct LoggingGuard {
    _guard: DefaultGuard,
}

/// A configured but not yet installed logging pipeline.
pub struct LoggingPipeline {
    filter: Targets,
    writer: BoxMakeWriter,
}

impl LoggingPipeline {
    pub fn new(config: &LoggingConfig) -> Self {
        let writer = match config.stream {
            LogStream::Stdout => BoxMakeWriter::new(io::stdout),
            LogStream::Stderr => BoxMakeWriter::new(io::stderr),
        };
        Self {
            filter: config.filter(),
            writer,
        }
    }

    /// Send records to `writer` instead of the configured stream.
    pub fn with_writer<W>(mut self, writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        self.writer = BoxMakeWriter::new(writer);
        self
    }

    pub fn filter(&self) -> &Targets {
        &self.filter
    }

    /// Install for the current thread only.
    pub fn set_default(self) -> LoggingGuard {
        let subscriber = Registry::default().with(self.filter).with(
            fmt::layer()
                .event_format(ContextJsonFormat)
                .with_writer(self.writer),
        );
        LoggingGuard {
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    /// Install process-wide.
    ///
    /// The first call installs the subscriber. Later calls replace the level
    /// filter and keep the writer chosen by the first call.
    pub fn init(self) -> Result<(), LoggingError> {
        let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = installed.as_ref() {
            handle
                .reload(self.filter)
                .map_err(|e| LoggingError::Install(e.to_string()))?;
            tracing::debug!("logging configuration re-applied");
            return Ok(());
        }

        let (filter, handle) = reload::Layer::new(self.filter);
        Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(ContextJsonFormat)
                    .with_writer(self.writer),
            )
            .try_init()
            .map_err(|e| LoggingError::Install(e.to_string()))?;

        *installed = Some(handle);
        Ok(())
    }
}

/// Configure process-wide logging from `config`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    LoggingPipeline::new(config).init()
}
