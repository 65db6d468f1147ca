//! Injected tracer/meter/logger seams (`spec.md` §6.5, §9 "global singletons
//! → injected trait objects"). No hidden process state: every collaborator is
//! passed in at cluster/session construction.

use std::collections::HashMap;
use std::sync::Arc;

pub trait Span: Send + Sync {
    fn add_tag(&self, key: &str, value: String);
    fn end(self: Box<Self>);
}

pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &'static str, parent: Option<&dyn Span>) -> Box<dyn Span>;
}

pub trait ValueRecorder: Send + Sync {
    fn record_value(&self, value: f64);
}

pub trait Meter: Send + Sync {
    fn get_value_recorder(&self, metric_name: &'static str, tags: HashMap<&'static str, String>) -> Arc<dyn ValueRecorder>;
}

/// Wraps `tracing` macros so call sites never depend on a concrete logging
/// backend, matching the teacher's `tracing::{info,warn}!` field style
/// (`keeper-rs/src/main.rs`) while staying swappable for tests.
pub trait KvLogger: Send + Sync {
    fn debug(&self, prefix: &str, message: &str);
    fn info(&self, prefix: &str, message: &str);
    fn warn(&self, prefix: &str, message: &str);
    fn error(&self, prefix: &str, message: &str);
}

pub struct NoopSpan;

impl Span for NoopSpan {
    fn add_tag(&self, _key: &str, _value: String) {}
    fn end(self: Box<Self>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &'static str, _parent: Option<&dyn Span>) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

pub struct NoopRecorder;

impl ValueRecorder for NoopRecorder {
    fn record_value(&self, _value: f64) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMeter;

impl Meter for NoopMeter {
    fn get_value_recorder(&self, _metric_name: &'static str, _tags: HashMap<&'static str, String>) -> Arc<dyn ValueRecorder> {
        Arc::new(NoopRecorder)
    }
}

/// Default logger: forwards to `tracing`, prefixed `[client/session/stream/bucket] <addr>`
/// the way `spec.md` §6.5 requires.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl KvLogger for TracingLogger {
    fn debug(&self, prefix: &str, message: &str) {
        tracing::debug!(%prefix, "{message}");
    }
    fn info(&self, prefix: &str, message: &str) {
        tracing::info!(%prefix, "{message}");
    }
    fn warn(&self, prefix: &str, message: &str) {
        tracing::warn!(%prefix, "{message}");
    }
    fn error(&self, prefix: &str, message: &str) {
        tracing::error!(%prefix, "{message}");
    }
}

/// The trio passed into every cluster/session/tracker constructor.
#[derive(Clone)]
pub struct Observability {
    pub tracer: Arc<dyn Tracer>,
    pub meter: Arc<dyn Meter>,
    pub logger: Arc<dyn KvLogger>,
}

impl Default for Observability {
    fn default() -> Self {
        Observability { tracer: Arc::new(NoopTracer), meter: Arc::new(NoopMeter), logger: Arc::new(TracingLogger) }
    }
}
