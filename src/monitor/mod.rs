//! Structured event emission with two sinks.
//!
//! Every emission goes to the local log sink (debug/info gated by an
//! environment source filter). An emission carrying both a data payload and
//! a message is additionally appended to the shared capped event stream —
//! the only write path into the aggregation pipeline.

mod logger;

pub use logger::{init_app_logger, init_logger, is_logging_disabled, LoggerConfig};

use crate::errors::Result;
use crate::runtime::fault;
use crate::store::StoreHandle;
use log::{debug, error, info, warn};
use serde_json::Value;

/// Environment variable naming the sources whose debug/info emissions reach
/// the local sink (comma-separated, `*` for all). Absent means allow.
pub const SOURCE_FILTER_ENV: &str = "LATTICE_DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

/// One monitor emission bound for the shared stream.
#[derive(Debug, Clone)]
pub struct Event {
    pub source: String,
    pub level: Level,
    pub data: String,
    pub message: String,
    pub ts_ms: i64,
}

impl Event {
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("source", self.source.clone()),
            ("level", self.level.as_str().to_string()),
            ("data", self.data.clone()),
            ("message", self.message.clone()),
            ("ts", self.ts_ms.to_string()),
        ]
    }
}

/// Durable sink: the capped shared stream behind a store handle.
#[derive(Clone)]
pub struct StreamSink {
    store: StoreHandle,
    stream: String,
    max_len: u64,
}

impl StreamSink {
    pub fn new(store: StoreHandle, stream: impl Into<String>, max_len: u64) -> Self {
        Self {
            store,
            stream: stream.into(),
            max_len,
        }
    }

    /// Appends in a detached task: the local sink must never wait on the
    /// store sink, and a failed append is logged, not escalated.
    fn append(&self, event: Event) {
        let sink = self.clone();
        tokio::spawn(async move {
            let fields = event.fields();
            let borrowed: Vec<(&str, &str)> = fields
                .iter()
                .map(|(key, value)| (*key, value.as_str()))
                .collect();
            if let Err(err) = sink
                .store
                .xadd_capped(&sink.stream, sink.max_len, &borrowed)
                .await
            {
                warn!("monitor stream append failed: {err}");
            }
        });
    }
}

/// Per-source structured emitter.
#[derive(Clone)]
pub struct Monitor {
    source: String,
    sink: Option<StreamSink>,
}

impl Monitor {
    pub fn new(source: impl Into<String>, sink: Option<StreamSink>) -> Self {
        Self {
            source: source.into(),
            sink,
        }
    }

    /// A local-only monitor, for contexts with no store attached (tests,
    /// pre-registration bootstrap).
    pub fn local(source: impl Into<String>) -> Self {
        Self::new(source, None)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn debug(&self, message: &str) {
        self.log_local(Level::Debug, None, message);
    }

    pub fn info(&self, message: &str) {
        self.log_local(Level::Info, None, message);
    }

    pub fn warn(&self, message: &str) {
        self.log_local(Level::Warn, None, message);
    }

    pub fn error(&self, message: &str) {
        self.log_local(Level::Error, None, message);
    }

    pub fn debug_data(&self, data: Value, message: &str) {
        self.emit(Level::Debug, data, message);
    }

    pub fn info_data(&self, data: Value, message: &str) {
        self.emit(Level::Info, data, message);
    }

    pub fn warn_data(&self, data: Value, message: &str) {
        self.emit(Level::Warn, data, message);
    }

    pub fn error_data(&self, data: Value, message: &str) {
        self.emit(Level::Error, data, message);
    }

    /// Data + message: local sink plus the durable stream sink.
    pub fn emit(&self, level: Level, data: Value, message: &str) {
        self.log_local(level, Some(&data), message);
        if let Some(sink) = &self.sink {
            sink.append(Event {
                source: self.source.clone(),
                level,
                data: data.to_string(),
                message: message.to_string(),
                ts_ms: chrono::Utc::now().timestamp_millis(),
            });
        }
    }

    /// Lifecycle probe: logs the point and raises when the fault-injection
    /// marker names it.
    pub fn trace(&self, point: &str) -> Result<()> {
        debug!("[{}] trace:{point}", self.source);
        fault::check(point)
    }

    fn log_local(&self, level: Level, data: Option<&Value>, message: &str) {
        match level {
            Level::Debug | Level::Info if !source_allowed(&self.source) => return,
            _ => {}
        }
        let rendered = match data {
            Some(data) => format!("[{}] {message} {data}", self.source),
            None => format!("[{}] {message}", self.source),
        };
        match level {
            Level::Debug => debug!("{rendered}"),
            Level::Info => info!("{rendered}"),
            Level::Warn => warn!("{rendered}"),
            Level::Error => error!("{rendered}"),
        }
    }
}

fn source_allowed(source: &str) -> bool {
    filter_allows(std::env::var(SOURCE_FILTER_ENV).ok().as_deref(), source)
}

/// Absent filter allows everything; a set filter must name the source
/// (or `*`).
fn filter_allows(filter: Option<&str>, source: &str) -> bool {
    match filter {
        None => true,
        Some(filter) => filter
            .split(',')
            .map(str::trim)
            .any(|named| named == "*" || named == source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_absent_allows() {
        assert!(filter_allows(None, "core"));
        assert!(filter_allows(None, "anything"));
    }

    #[test]
    fn test_filter_names_sources() {
        assert!(filter_allows(Some("core,aggregator"), "core"));
        assert!(filter_allows(Some("core, aggregator"), "aggregator"));
        assert!(!filter_allows(Some("core"), "hello-world"));
        assert!(filter_allows(Some("*"), "hello-world"));
    }

    #[test]
    fn test_event_fields_shape() {
        let event = Event {
            source: "core".to_string(),
            level: Level::Info,
            data: json!({"answer": 42}).to_string(),
            message: "ready".to_string(),
            ts_ms: 1_691_234_567_890,
        };
        let fields = event.fields();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0], ("source", "core".to_string()));
        assert_eq!(fields[1], ("level", "info".to_string()));
        assert_eq!(fields[3], ("message", "ready".to_string()));
    }

    #[test]
    fn test_trace_passes_without_marker() {
        let monitor = Monitor::local("core");
        assert!(monitor.trace("wire:service:core").is_ok());
    }

    #[test]
    fn test_local_monitor_has_no_sink() {
        let monitor = Monitor::local("core");
        // No stream sink: emitting with data must not panic.
        monitor.info_data(json!({"k": "v"}), "local only");
        monitor.warn("plain");
    }
}
