//! Metrics, alerts, structured logging, and distributed tracing (§4.6),
//! composed into a single [`ObservabilityManager`] the orchestrator (C11)
//! drives through one operation-scoped context per transform.

pub mod alerts;
pub mod logging;
pub mod metrics;
pub mod tracing_spans;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;
use sysinfo::System;

use self::alerts::{AlertManager, Operator, Severity, ThresholdRule};
pub use self::alerts::Alert;
use self::logging::{LogEntry, LogLevel, StructuredLogger};
pub use self::logging::{detect_pii, is_sensitive_field, sanitize_text};
use self::tracing_spans::{DistributedTracer, SpanGuard, SpanStatus};
pub use self::tracing_spans::TraceSpan;
pub use self::metrics::{MetricPoint, MetricType, MetricsCollector};

/// Bundles the identifiers a caller gets back from
/// [`ObservabilityManager::operation_context`] (§4.6).
pub struct OperationContext<'a> {
    pub operation_id: String,
    pub correlation_id: String,
    span: SpanGuard<'a>,
    manager: &'a ObservabilityManager,
    op_type: String,
}

impl<'a> OperationContext<'a> {
    pub fn span_id(&self) -> &str {
        self.span.span_id()
    }

    pub fn trace_id(&self) -> Option<String> {
        self.manager.tracer.current_context().map(|c| c.trace_id)
    }

    pub fn log_info(&self, message: &str, data: HashMap<String, Value>) {
        self.manager.logger.log(LogLevel::Info, message, &self.op_type, Some(self.operation_id.clone()), self.manager.tracer.current_context().as_ref(), data);
    }

    /// On success, finishes the span OK; on error, records the error as a
    /// structured log entry and marks the span ERROR with `error_type`
    /// attribute (§8 invariant 10).
    pub fn finish(self, outcome: Result<(), &str>) {
        match outcome {
            Ok(()) => self.span.finish(SpanStatus::Ok),
            Err(error_type) => {
                self.manager.logger.log(
                    LogLevel::Error,
                    &format!("operation failed: {error_type}"),
                    &self.op_type,
                    Some(self.operation_id.clone()),
                    self.manager.tracer.current_context().as_ref(),
                    HashMap::new(),
                );
                self.span.set_attribute("error_type", error_type);
                self.span.finish(SpanStatus::Error);
            }
        }
    }
}

/// Default thresholds pre-registered on initialization (§4.6): CPU > 80%
/// MEDIUM, memory > 85% HIGH, available memory < 1 GB CRITICAL.
fn default_thresholds() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule {
            metric_name: "system.cpu_percent".to_string(),
            threshold_value: 80.0,
            operator: Operator::Gt,
            severity: Severity::Medium,
            message_template: "CPU usage at {value}%".to_string(),
            cooldown_seconds: 300,
            labels_filter: HashMap::new(),
        },
        ThresholdRule {
            metric_name: "system.memory_percent".to_string(),
            threshold_value: 85.0,
            operator: Operator::Gt,
            severity: Severity::High,
            message_template: "Memory usage at {value}%".to_string(),
            cooldown_seconds: 300,
            labels_filter: HashMap::new(),
        },
        ThresholdRule {
            metric_name: "system.available_memory_gb".to_string(),
            threshold_value: 1.0,
            operator: Operator::Lt,
            severity: Severity::Critical,
            message_template: "Available memory down to {value} GB".to_string(),
            cooldown_seconds: 180,
            labels_filter: HashMap::new(),
        },
    ]
}

/// Background system-metrics collector (§4.6). Runs on a joinable
/// `std::thread`, woken on a condvar so shutdown doesn't wait a full
/// interval. Self-disables (logging once) if `sysinfo` reports nothing
/// usable on this platform.
pub struct RealTimeMonitor {
    running: Arc<AtomicBool>,
    wake: Arc<(Mutex<bool>, Condvar)>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RealTimeMonitor {
    pub fn start(metrics: Arc<MetricsCollector>, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let wake = Arc::new((Mutex::new(false), Condvar::new()));

        let running_clone = running.clone();
        let wake_clone = wake.clone();
        let handle = std::thread::spawn(move || {
            let mut sys = System::new_all();
            let mut disabled_logged = false;
            while running_clone.load(Ordering::SeqCst) {
                sys.refresh_memory();
                sys.refresh_cpu_usage();
                let total_mem = sys.total_memory();
                if total_mem == 0 {
                    if !disabled_logged {
                        tracing::warn!("system metrics collection unavailable on this platform; self-disabling");
                        disabled_logged = true;
                    }
                } else {
                    let used_mem = sys.used_memory();
                    let mem_percent = used_mem as f64 / total_mem as f64 * 100.0;
                    let available_gb = (total_mem - used_mem) as f64 / (1024.0 * 1024.0 * 1024.0);
                    let cpu_percent = sys.global_cpu_usage() as f64;
                    metrics.gauge("system.cpu_percent", cpu_percent, HashMap::new());
                    metrics.gauge("system.memory_percent", mem_percent, HashMap::new());
                    metrics.gauge("system.available_memory_gb", available_gb, HashMap::new());
                }

                let (lock, cvar) = &*wake_clone;
                let guard = lock.lock().unwrap();
                let _ = cvar.wait_timeout(guard, interval).unwrap();
            }
        });

        Self { running, wake, handle: Mutex::new(Some(handle)) }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let (lock, cvar) = &*self.wake;
        let mut woke = lock.lock().unwrap();
        *woke = true;
        cvar.notify_all();
        drop(woke);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// Scoped wrapper emitting the `transform.operations.*` metric family
/// (§4.6). Resolved per SPEC_FULL.md §4.6: always consults the
/// caller-supplied result when present; falls back to closure-`Err`-as-
/// failure only when the wrapped operation has no `LoadResult` of its own.
pub struct TransformOperationMonitor<'a> {
    metrics: &'a MetricsCollector,
}

impl<'a> TransformOperationMonitor<'a> {
    pub fn new(metrics: &'a MetricsCollector) -> Self {
        Self { metrics }
    }

    /// Runs `body`, recording start/completion/execution-time/throughput
    /// metrics. `body` returns `(T, Option<bool>)` where the second element
    /// is the caller-supplied success signal (from a `LoadResult`) when
    /// available; `None` defers to whether `body` itself returned `Err`.
    pub fn monitor_operation<T, E>(
        &self,
        op_type: &str,
        table: &str,
        estimated_rows: u64,
        body: impl FnOnce() -> Result<(T, Option<bool>), E>,
    ) -> Result<T, E> {
        let mut labels = HashMap::new();
        labels.insert("op_type".to_string(), op_type.to_string());
        labels.insert("table".to_string(), table.to_string());
        self.metrics.counter("transform.operations.started", 1.0, labels.clone());

        let start = std::time::Instant::now();
        let outcome = body();
        let elapsed = start.elapsed().as_secs_f64();

        let success = match &outcome {
            Ok((_, Some(result_success))) => *result_success,
            Ok((_, None)) => true,
            Err(_) => false,
        };

        let mut completed_labels = labels.clone();
        completed_labels.insert("status".to_string(), if success { "success" } else { "error" }.to_string());
        self.metrics.counter("transform.operations.completed", 1.0, completed_labels);
        self.metrics.timer("transform.operations.execution_time", elapsed, labels.clone());

        if estimated_rows > 0 && elapsed > 0.0 {
            self.metrics.gauge("transform.operations.throughput", estimated_rows as f64 / elapsed, labels);
        }

        outcome.map(|(value, _)| value)
    }
}

/// Composes the tracer, logger, alert manager, and metrics collector behind
/// one shared value the orchestrator holds for its lifetime.
pub struct ObservabilityManager {
    pub metrics: Arc<MetricsCollector>,
    tracer: DistributedTracer,
    logger: StructuredLogger,
    monitor: Option<RealTimeMonitor>,
}

impl ObservabilityManager {
    pub fn new(pii_detection_enabled: bool, enable_monitoring: bool, monitoring_interval: Duration) -> Self {
        let metrics = Arc::new(MetricsCollector::with_defaults());
        let monitor = if enable_monitoring { Some(RealTimeMonitor::start(metrics.clone(), monitoring_interval)) } else { None };
        Self {
            metrics,
            tracer: DistributedTracer::with_defaults(),
            logger: StructuredLogger::new(pii_detection_enabled, 10_000),
            monitor,
        }
    }

    pub fn new_alert_manager(&self) -> AlertManager<'_> {
        let manager = AlertManager::new(&self.metrics);
        for rule in default_thresholds() {
            manager.add_threshold_rule(rule);
        }
        manager
    }

    /// Opens a span and a correlated logging scope for one logical
    /// operation, returning the identifiers callers attach to downstream
    /// records (§4.6).
    pub fn operation_context(&self, name: &str, op_type: &str) -> OperationContext<'_> {
        let operation_id = uuid::Uuid::new_v4().to_string();
        let correlation_id = self.logger.current_correlation_id();
        let span = self.tracer.start_span(name, op_type);
        OperationContext { operation_id, correlation_id, span, manager: self, op_type: op_type.to_string() }
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn tracer(&self) -> &DistributedTracer {
        &self.tracer
    }

    pub fn operation_monitor(&self) -> TransformOperationMonitor<'_> {
        TransformOperationMonitor::new(&self.metrics)
    }

    /// Structured export document per §6.3.
    pub fn export_observability_data(&self, trace_id: Option<&str>, correlation_id: Option<&str>, since: Option<chrono::DateTime<chrono::Utc>>) -> Value {
        let logs: Vec<Value> = self
            .logger
            .query(trace_id, correlation_id, since)
            .into_iter()
            .map(log_entry_to_json)
            .collect();

        let spans = self.tracer.completed_spans();
        let mut by_trace: HashMap<String, Vec<&TraceSpan>> = HashMap::new();
        for span in &spans {
            by_trace.entry(span.trace_id.clone()).or_default().push(span);
        }
        let traces: Vec<Value> = by_trace
            .into_iter()
            .filter(|(tid, _)| trace_id.is_none_or(|t| tid == t))
            .map(|(tid, spans)| {
                let start = spans.iter().map(|s| s.start).min();
                let end = spans.iter().filter_map(|s| s.end).max();
                let duration_ms = match (start, end) {
                    (Some(s), Some(e)) => (e - s).num_milliseconds(),
                    _ => 0,
                };
                serde_json::json!({
                    "trace_id": tid,
                    "service_name": "sqlflow-transform-engine",
                    "span_count": spans.len(),
                    "start_time": start,
                    "end_time": end,
                    "total_duration_ms": duration_ms,
                    "spans": spans.iter().map(|s| span_to_json(s)).collect::<Vec<_>>(),
                })
            })
            .collect();

        serde_json::json!({
            "service_name": "sqlflow-transform-engine",
            "export_timestamp": chrono::Utc::now(),
            "logs": logs,
            "traces": traces,
        })
    }

    /// Writes the same-shape document to `metrics_YYYYMMDD_HHMMSS.json`
    /// under `dir` (§6.3).
    pub fn export_metrics_to_file(&self, dir: &std::path::Path) -> std::io::Result<std::path::PathBuf> {
        let filename = format!("metrics_{}.json", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(filename);
        let doc = self.export_observability_data(None, None, None);
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, &doc)?;
        Ok(path)
    }
}

impl Drop for ObservabilityManager {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
    }
}

fn log_entry_to_json(entry: LogEntry) -> Value {
    serde_json::json!({
        "timestamp": entry.timestamp,
        "level": format!("{:?}", entry.level).to_lowercase(),
        "message": entry.message,
        "correlation_id": entry.correlation_id,
        "operation_type": entry.operation_type,
        "operation_id": entry.operation_id,
        "span_id": entry.span_id,
        "trace_id": entry.trace_id,
        "structured_data": entry.structured_data,
        "sanitized": entry.sanitized,
    })
}

fn span_to_json(span: &TraceSpan) -> Value {
    serde_json::json!({
        "span_id": span.span_id,
        "name": span.name,
        "trace_id": span.trace_id,
        "parent_span_id": span.parent_span_id,
        "start": span.start,
        "end": span.end,
        "status": format!("{:?}", span.status),
        "attributes": span.attributes,
        "events": span.events,
        "tags": span.tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_context_finish_ok_completes_span() {
        let manager = ObservabilityManager::new(true, false, Duration::from_secs(10));
        let ctx = manager.operation_context("replace", "REPLACE");
        ctx.finish(Ok(()));
        assert_eq!(manager.tracer().completed_spans().len(), 1);
    }

    #[test]
    fn operation_context_finish_err_marks_span_error() {
        let manager = ObservabilityManager::new(true, false, Duration::from_secs(10));
        let ctx = manager.operation_context("merge", "MERGE");
        ctx.finish(Err("StepExecutionError"));
        let spans = manager.tracer().completed_spans();
        assert_eq!(spans[0].status, SpanStatus::Error);
        assert_eq!(spans[0].attributes.get("error_type"), Some(&"StepExecutionError".to_string()));
    }

    #[test]
    fn export_observability_data_has_expected_shape() {
        let manager = ObservabilityManager::new(true, false, Duration::from_secs(10));
        let ctx = manager.operation_context("replace", "REPLACE");
        ctx.finish(Ok(()));
        let doc = manager.export_observability_data(None, None, None);
        assert_eq!(doc["service_name"], "sqlflow-transform-engine");
        assert!(doc["traces"].is_array());
    }

    #[test]
    fn operation_monitor_consults_supplied_result_over_ok_return() {
        let metrics = MetricsCollector::with_defaults();
        let monitor = TransformOperationMonitor::new(&metrics);
        let _: Result<(), &str> = monitor.monitor_operation("INCREMENTAL", "t", 0, || Ok(((), Some(false))));
        let mut labels = HashMap::new();
        labels.insert("op_type".to_string(), "INCREMENTAL".to_string());
        labels.insert("table".to_string(), "t".to_string());
        labels.insert("status".to_string(), "error".to_string());
        assert_eq!(metrics.latest_value("transform.operations.completed", &labels), Some(1.0));
    }
}
