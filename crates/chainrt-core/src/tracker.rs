//! Activity tracker (§4.C): operation-scoped structured tracing. Callers
//! get three contracted operations — `report_error`, `report_change`,
//! `end` — modeled as methods on [`ActivityHandle`] rather than literal
//! closures, since Rust methods compose with `?` at call sites better than
//! stored closures.

use serde_json::Value;
use std::time::Instant;

/// Request/trace/span identifiers pulled from context at acquisition time.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

/// Pluggable tracker implementation. The core only depends on this
/// three-closure-shaped contract, never on a concrete backend.
pub trait ActivityTracker: Send + Sync {
    fn start(&self, op_name: &str, ctx: RequestContext) -> ActivityHandle;
}

/// Closures over a trait object, returned by `start`. `end()` is called
/// exactly once per operation; dropping a handle without calling `end()`
/// still emits a completion event (via `Drop`) so a bug in caller code
/// can't silently suppress the trace.
pub struct ActivityHandle {
    inner: Box<dyn ActivityHandleImpl>,
    ended: bool,
}

pub trait ActivityHandleImpl: Send {
    fn report_error(&mut self, err: &str);
    fn report_change(&mut self, id: &str, payload: Value);
    fn end(&mut self);
}

impl ActivityHandle {
    pub fn new(inner: Box<dyn ActivityHandleImpl>) -> Self {
        Self {
            inner,
            ended: false,
        }
    }

    pub fn report_error(&mut self, err: impl std::fmt::Display) {
        self.inner.report_error(&err.to_string());
    }

    pub fn report_change(&mut self, id: impl Into<String>, payload: Value) {
        self.inner.report_change(&id.into(), payload);
    }

    pub fn end(mut self) {
        self.inner.end();
        self.ended = true;
    }
}

impl Drop for ActivityHandle {
    fn drop(&mut self) {
        if !self.ended {
            self.inner.end();
        }
    }
}

/// `tracing`-backed implementation: a `tracing::info_span!` per operation
/// plus structured start/change/error/completion events, carrying
/// `request_id`/`trace_id`/`span_id` as fields.
pub struct TracingActivityTracker;

impl ActivityTracker for TracingActivityTracker {
    fn start(&self, op_name: &str, ctx: RequestContext) -> ActivityHandle {
        let span = tracing::info_span!(
            "activity",
            op = %op_name,
            request_id = ctx.request_id.as_deref().unwrap_or(""),
            trace_id = ctx.trace_id.as_deref().unwrap_or(""),
            span_id = ctx.span_id.as_deref().unwrap_or(""),
        );
        let _enter = span.enter();
        tracing::info!(op = %op_name, "activity started");
        drop(_enter);

        ActivityHandle::new(Box::new(TracingHandle {
            op_name: op_name.to_string(),
            span,
            started_at: Instant::now(),
        }))
    }
}

struct TracingHandle {
    op_name: String,
    span: tracing::Span,
    started_at: Instant,
}

impl ActivityHandleImpl for TracingHandle {
    fn report_error(&mut self, err: &str) {
        let _enter = self.span.enter();
        tracing::error!(op = %self.op_name, error = %err, "activity error");
    }

    fn report_change(&mut self, id: &str, payload: Value) {
        let _enter = self.span.enter();
        tracing::info!(op = %self.op_name, change_id = %id, payload = %payload, "activity change");
    }

    fn end(&mut self) {
        let _enter = self.span.enter();
        let duration_ms = self.started_at.elapsed().as_millis();
        tracing::info!(op = %self.op_name, duration_ms, "activity ended");
    }
}
