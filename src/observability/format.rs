//! JSON record rendering.
//!
//! Every event becomes one JSON object on one line:
//!
//! ```text
//! {"logger":"app::orders","level":"info","timestamp":"2024-05-01T12:00:00.000000Z",
//!  "event":"order placed","order_id":7,"request_id":"…","correlation_id":"…"}
//! ```
//!
//! Field precedence, lowest first: event fields, request context fields,
//! record metadata (`logger`, `level`, `timestamp`, `event`).

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::context::{RequestContext, RESERVED_KEYS};
use crate::observability::level::LogLevel;

/// Event formatter emitting context-enriched JSON lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextJsonFormat;

impl<S, N> FormatEvent<S, N> for ContextJsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let record = build_record(event);
        let line = serde_json::to_string(&record).map_err(|_| fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

/// Assemble the record for `event`, merging the active request context.
fn build_record(event: &Event<'_>) -> Map<String, Value> {
    let meta = event.metadata();
    let mut visitor = FieldVisitor::default();
    event.record(&mut visitor);

    let logger = visitor
        .log_target
        .take()
        .unwrap_or_else(|| meta.target().to_string());

    let mut record = Map::new();
    record.insert("logger".into(), Value::String(logger));
    record.insert("level".into(), Value::String(LogLevel::from(meta.level()).as_str().into()));
    record.insert(
        "timestamp".into(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    record.insert(
        "event".into(),
        Value::String(visitor.message.take().unwrap_or_default()),
    );

    for (key, value) in visitor.fields {
        if !RESERVED_KEYS.contains(&key.as_str()) {
            record.insert(key, value);
        }
    }

    // Missing context (start-up, background tasks) is not an error.
    RequestContext::with_current(|fields| {
        for (key, value) in fields {
            record.insert(key.clone(), value.clone());
        }
    });

    record
}

/// Collects event fields as JSON values.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    log_target: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            // Records bridged from the `log` crate carry their origin here.
            "log.target" => self.log_target = value.as_str().map(str::to_string),
            name if name.starts_with("log.") => {}
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));

        let sources: Vec<Value> = std::iter::successors(value.source(), |err| err.source())
            .map(|err| Value::String(err.to_string()))
            .collect();
        if !sources.is_empty() && !field.name().starts_with("log.") {
            self.fields
                .insert(format!("{}.sources", field.name()), Value::Array(sources));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}
