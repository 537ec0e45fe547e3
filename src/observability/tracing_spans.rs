//! Distributed tracing: nested spans with arena-style storage keyed by
//! string ids (§4.6, §9 "cyclic references"). Named `tracing_spans` to avoid
//! colliding with the `tracing` crate used for operational logging.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

thread_local! {
    static CURRENT_SPAN: std::cell::RefCell<Option<SpanContext>> = const { std::cell::RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SpanContext {
    pub span_id: String,
    pub trace_id: String,
}

#[derive(Debug, Clone)]
pub struct TraceSpan {
    pub span_id: String,
    pub name: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    pub attributes: HashMap<String, String>,
    pub events: Vec<(DateTime<Utc>, String)>,
    pub tags: HashMap<String, String>,
}

impl TraceSpan {
    pub fn duration_ms(&self) -> Option<i64> {
        self.end.map(|e| (e - self.start).num_milliseconds())
    }
}

/// Generates a `len`-char lowercase-hex id from one or two v4 UUIDs —
/// `len` is either 16 (span id) or 32 (trace id, exactly one UUID's hex).
fn random_id(len: usize) -> String {
    let mut hex = uuid::Uuid::new_v4().simple().to_string();
    while hex.len() < len {
        hex.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    hex.truncate(len);
    hex
}

/// A scoped handle to an in-flight span. Finishing it (explicitly via
/// [`DistributedTracer::finish_span`] or implicitly on drop with `Ok` status)
/// moves it from the active map to the bounded completed deque and restores
/// the parent as current.
pub struct SpanGuard<'a> {
    tracer: &'a DistributedTracer,
    span_id: String,
    finished: bool,
}

impl<'a> SpanGuard<'a> {
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn set_attribute(&self, key: &str, value: impl Into<String>) {
        self.tracer.set_attribute(&self.span_id, key, value.into());
    }

    pub fn add_event(&self, name: impl Into<String>) {
        self.tracer.add_event(&self.span_id, name.into());
    }

    pub fn finish(mut self, status: SpanStatus) {
        self.tracer.finish_span(&self.span_id, status);
        self.finished = true;
    }
}

impl<'a> Drop for SpanGuard<'a> {
    fn drop(&mut self) {
        if !self.finished {
            self.tracer.finish_span(&self.span_id, SpanStatus::Ok);
        }
    }
}

/// Holds active and (bounded) completed spans behind a single mutex, with
/// the current span tracked per-thread (§9: thread-local correlation
/// context).
pub struct DistributedTracer {
    active: Mutex<HashMap<String, TraceSpan>>,
    completed: Mutex<VecDeque<TraceSpan>>,
    max_completed: usize,
}

impl DistributedTracer {
    pub fn new(max_completed: usize) -> Self {
        Self { active: Mutex::new(HashMap::new()), completed: Mutex::new(VecDeque::new()), max_completed }
    }

    pub fn with_defaults() -> Self {
        Self::new(10_000)
    }

    /// Starts a span. If the current thread already carries a trace
    /// context, inherits its trace id and uses the current span as parent;
    /// otherwise starts a new trace.
    pub fn start_span(&self, name: &str, op_type: &str) -> SpanGuard<'_> {
        let parent = CURRENT_SPAN.with(|c| c.borrow().clone());
        let span_id = random_id(16);
        let trace_id = parent.as_ref().map(|p| p.trace_id.clone()).unwrap_or_else(|| random_id(32));
        let mut attributes = HashMap::new();
        attributes.insert("operation_type".to_string(), op_type.to_string());

        let span = TraceSpan {
            span_id: span_id.clone(),
            name: name.to_string(),
            trace_id: trace_id.clone(),
            parent_span_id: parent.as_ref().map(|p| p.span_id.clone()),
            start: Utc::now(),
            end: None,
            status: SpanStatus::Ok,
            attributes,
            events: Vec::new(),
            tags: HashMap::new(),
        };
        self.active.lock().unwrap().insert(span_id.clone(), span);

        CURRENT_SPAN.with(|c| {
            *c.borrow_mut() = Some(SpanContext { span_id: span_id.clone(), trace_id: trace_id.clone() })
        });

        SpanGuard { tracer: self, span_id, finished: false }
    }

    pub fn current_context(&self) -> Option<SpanContext> {
        CURRENT_SPAN.with(|c| c.borrow().clone())
    }

    fn set_attribute(&self, span_id: &str, key: &str, value: String) {
        if let Some(span) = self.active.lock().unwrap().get_mut(span_id) {
            span.attributes.insert(key.to_string(), value);
        }
    }

    fn add_event(&self, span_id: &str, name: String) {
        if let Some(span) = self.active.lock().unwrap().get_mut(span_id) {
            span.events.push((Utc::now(), name));
        }
    }

    /// Records `end`/`status`, moves the span from active to the bounded
    /// completed deque (evicting the oldest on overflow), and restores the
    /// parent as current in thread-local context (§4.6).
    fn finish_span(&self, span_id: &str, status: SpanStatus) {
        let span = {
            let mut active = self.active.lock().unwrap();
            active.remove(span_id)
        };
        let Some(mut span) = span else { return };
        span.end = Some(Utc::now());
        span.status = status;

        let parent_id = span.parent_span_id.clone();

        let mut completed = self.completed.lock().unwrap();
        completed.push_back(span);
        while completed.len() > self.max_completed {
            completed.pop_front();
        }
        drop(completed);

        CURRENT_SPAN.with(|c| {
            let mut current = c.borrow_mut();
            *current = parent_id.map(|pid| {
                let trace_id = current.as_ref().map(|ctx| ctx.trace_id.clone()).unwrap_or_default();
                SpanContext { span_id: pid, trace_id }
            });
        });
    }

    pub fn completed_spans(&self) -> Vec<TraceSpan> {
        self.completed.lock().unwrap().iter().cloned().collect()
    }

    pub fn spans_for_trace(&self, trace_id: &str) -> Vec<TraceSpan> {
        self.completed.lock().unwrap().iter().filter(|s| s.trace_id == trace_id).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finishing_with_ok_records_nonnegative_duration() {
        let tracer = DistributedTracer::with_defaults();
        let guard = tracer.start_span("replace", "REPLACE");
        let span_id = guard.span_id().to_string();
        guard.finish(SpanStatus::Ok);
        let spans = tracer.completed_spans();
        let span = spans.iter().find(|s| s.span_id == span_id).unwrap();
        assert_eq!(span.status, SpanStatus::Ok);
        assert!(span.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn child_span_inherits_trace_id_and_parent() {
        let tracer = DistributedTracer::with_defaults();
        let parent = tracer.start_span("outer", "TRANSFORM");
        let parent_id = parent.span_id().to_string();
        let child = tracer.start_span("inner", "STEP");
        let child_id = child.span_id().to_string();
        let parent_ctx = tracer.current_context();
        assert_eq!(parent_ctx.as_ref().unwrap().span_id, child_id);
        child.finish(SpanStatus::Ok);
        parent.finish(SpanStatus::Ok);

        let spans = tracer.completed_spans();
        let child_span = spans.iter().find(|s| s.span_id == child_id).unwrap();
        assert_eq!(child_span.parent_span_id.as_deref(), Some(parent_id.as_str()));
        let parent_span = spans.iter().find(|s| s.span_id == parent_id).unwrap();
        assert_eq!(child_span.trace_id, parent_span.trace_id);
    }

    #[test]
    fn drop_without_explicit_finish_defaults_to_ok() {
        let tracer = DistributedTracer::with_defaults();
        let span_id = {
            let guard = tracer.start_span("auto", "X");
            guard.span_id().to_string()
        };
        let spans = tracer.completed_spans();
        assert_eq!(spans.iter().find(|s| s.span_id == span_id).unwrap().status, SpanStatus::Ok);
    }

    #[test]
    fn completed_deque_is_bounded() {
        let tracer = DistributedTracer::new(2);
        for i in 0..5 {
            tracer.start_span(&format!("s{i}"), "X").finish(SpanStatus::Ok);
        }
        assert_eq!(tracer.completed_spans().len(), 2);
    }
}
