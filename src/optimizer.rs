//! Performance optimization for large write operations (§4.9). Grounded in
//! `original_source/.../transform/performance.py`'s `PerformanceOptimizer`:
//! bulk-operation thresholds, SQL-hint annotation, and memory estimation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

const BULK_OPERATION_THRESHOLD: u64 = 10_000;
const LARGE_DATASET_THRESHOLD: u64 = 100_000;
const MEMORY_LIMIT_MB: f64 = 2048.0;
const DEFAULT_AVG_ROW_BYTES: u64 = 1024;
const RECENT_OPERATIONS_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct MemoryCheck {
    pub estimated_memory_mb: f64,
    pub memory_limit_mb: f64,
    pub within_limits: bool,
}

#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation_type: String,
    pub execution_time_s: f64,
    pub rows_processed: u64,
    pub optimized: bool,
}

/// Running aggregate over recorded operations, bounded to the most recent
/// [`RECENT_OPERATIONS_CAPACITY`] for the report (§4.9).
#[derive(Default)]
struct PerformanceMetrics {
    operation_count: u64,
    total_execution_time_s: f64,
    total_rows_processed: u64,
    bulk_operations: u64,
    optimized_queries: u64,
    recent: VecDeque<OperationRecord>,
}

impl PerformanceMetrics {
    fn record(&mut self, operation_type: &str, execution_time_s: f64, rows_processed: u64, optimized: bool) {
        self.operation_count += 1;
        self.total_execution_time_s += execution_time_s;
        self.total_rows_processed += rows_processed;
        if optimized {
            self.optimized_queries += 1;
        }
        if operation_type.to_uppercase().contains("BULK") {
            self.bulk_operations += 1;
        }
        self.recent.push_back(OperationRecord {
            operation_type: operation_type.to_string(),
            execution_time_s,
            rows_processed,
            optimized,
        });
        while self.recent.len() > RECENT_OPERATIONS_CAPACITY {
            self.recent.pop_front();
        }
    }

    fn throughput(&self) -> f64 {
        if self.total_execution_time_s == 0.0 {
            0.0
        } else {
            self.total_rows_processed as f64 / self.total_execution_time_s
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceReport {
    pub operation_count: u64,
    pub total_execution_time_s: f64,
    pub total_rows_processed: u64,
    pub throughput_rows_per_sec: f64,
    pub bulk_operations: u64,
    pub optimized_queries: u64,
    pub bulk_operation_threshold: u64,
    pub large_dataset_threshold: u64,
    pub memory_limit_mb: f64,
    pub recent_operations: Vec<OperationRecord>,
}

/// Scoped handle returned by [`PerformanceOptimizer::monitor_performance`];
/// records the elapsed time and row count on drop.
pub struct PerformanceScope<'a> {
    optimizer: &'a PerformanceOptimizer,
    operation_type: String,
    estimated_rows: u64,
    start: Instant,
}

impl<'a> Drop for PerformanceScope<'a> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        self.optimizer
            .metrics
            .lock()
            .unwrap()
            .record(&self.operation_type, elapsed, self.estimated_rows, true);
        tracing::info!(
            operation_type = %self.operation_type,
            rows = self.estimated_rows,
            execution_time_s = elapsed,
            "transform operation completed"
        );
    }
}

/// Bulk-vs-row decisions, SQL-hint annotation, and memory estimation for
/// write-mode handlers (§4.9).
pub struct PerformanceOptimizer {
    enabled: bool,
    metrics: Mutex<PerformanceMetrics>,
}

impl Default for PerformanceOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceOptimizer {
    pub fn new() -> Self {
        Self { enabled: true, metrics: Mutex::new(PerformanceMetrics::default()) }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn should_use_bulk(&self, estimated_rows: u64) -> bool {
        self.enabled && estimated_rows >= BULK_OPERATION_THRESHOLD
    }

    /// Annotates an `INSERT INTO` statement with a bulk hint when the row
    /// estimate crosses the threshold. Returns the statement unchanged
    /// otherwise.
    pub fn optimize_insert(&self, sql: &str, estimated_rows: u64) -> (String, bool) {
        if !self.should_use_bulk(estimated_rows) {
            return (sql.to_string(), false);
        }
        if sql.to_uppercase().contains("INSERT INTO") {
            (replace_case_insensitive(sql, "INSERT INTO", "INSERT /*+ USE_BULK_INSERT */ INTO"), true)
        } else {
            (sql.to_string(), false)
        }
    }

    pub fn optimize_delete(&self, sql: &str, table_name: &str) -> (String, bool) {
        if !self.enabled {
            return (sql.to_string(), false);
        }
        if sql.to_uppercase().contains("DELETE FROM") {
            (format!("-- optimized delete with column pruning for {table_name}\n{sql}"), true)
        } else {
            (sql.to_string(), false)
        }
    }

    pub fn optimize_merge(&self, sql: &str, estimated_rows: u64) -> (String, bool) {
        if !self.should_use_bulk(estimated_rows) {
            return (sql.to_string(), false);
        }
        if sql.to_uppercase().contains("MERGE INTO") {
            (format!("-- optimized merge for {estimated_rows} rows\n{sql}"), true)
        } else {
            (sql.to_string(), false)
        }
    }

    pub fn estimate_memory_mb(&self, rows: u64) -> f64 {
        self.estimate_memory_mb_with_row_size(rows, DEFAULT_AVG_ROW_BYTES)
    }

    pub fn estimate_memory_mb_with_row_size(&self, rows: u64, avg_row_bytes: u64) -> f64 {
        let total_bytes = rows as f64 * avg_row_bytes as f64;
        (total_bytes * 2.0) / (1024.0 * 1024.0)
    }

    pub fn check_memory_constraints(&self, estimated_rows: u64) -> MemoryCheck {
        let estimated_memory_mb = self.estimate_memory_mb(estimated_rows);
        MemoryCheck {
            estimated_memory_mb,
            memory_limit_mb: MEMORY_LIMIT_MB,
            within_limits: estimated_memory_mb <= MEMORY_LIMIT_MB,
        }
    }

    /// Starts a scope that records execution time and row count when
    /// dropped (§4.9). The caller decides the operation type label.
    pub fn monitor_performance(&self, operation_type: &str, estimated_rows: u64) -> PerformanceScope<'_> {
        PerformanceScope {
            optimizer: self,
            operation_type: operation_type.to_string(),
            estimated_rows,
            start: Instant::now(),
        }
    }

    pub fn performance_report(&self) -> PerformanceReport {
        let metrics = self.metrics.lock().unwrap();
        PerformanceReport {
            operation_count: metrics.operation_count,
            total_execution_time_s: metrics.total_execution_time_s,
            total_rows_processed: metrics.total_rows_processed,
            throughput_rows_per_sec: metrics.throughput(),
            bulk_operations: metrics.bulk_operations,
            optimized_queries: metrics.optimized_queries,
            bulk_operation_threshold: BULK_OPERATION_THRESHOLD,
            large_dataset_threshold: LARGE_DATASET_THRESHOLD,
            memory_limit_mb: MEMORY_LIMIT_MB,
            recent_operations: metrics.recent.iter().cloned().collect(),
        }
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock().unwrap() = PerformanceMetrics::default();
    }
}

fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> String {
    match haystack.to_uppercase().find(&needle.to_uppercase()) {
        Some(idx) => format!("{}{}{}", &haystack[..idx], replacement, &haystack[idx + needle.len()..]),
        None => haystack.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_threshold_is_ten_thousand_rows() {
        let optimizer = PerformanceOptimizer::new();
        assert!(!optimizer.should_use_bulk(9_999));
        assert!(optimizer.should_use_bulk(10_000));
    }

    #[test]
    fn insert_gets_bulk_hint_only_above_threshold() {
        let optimizer = PerformanceOptimizer::new();
        let (sql, optimized) = optimizer.optimize_insert("INSERT INTO t SELECT * FROM s", 100);
        assert!(!optimized);
        assert_eq!(sql, "INSERT INTO t SELECT * FROM s");

        let (sql, optimized) = optimizer.optimize_insert("INSERT INTO t SELECT * FROM s", 50_000);
        assert!(optimized);
        assert!(sql.contains("USE_BULK_INSERT"));
    }

    #[test]
    fn memory_constraint_respects_two_gb_limit() {
        let optimizer = PerformanceOptimizer::new();
        let small = optimizer.check_memory_constraints(1_000);
        assert!(small.within_limits);
        let huge = optimizer.check_memory_constraints(2_000_000);
        assert!(!huge.within_limits);
    }

    #[test]
    fn monitor_performance_scope_records_operation() {
        let optimizer = PerformanceOptimizer::new();
        {
            let _scope = optimizer.monitor_performance("INSERT", 500);
        }
        let report = optimizer.performance_report();
        assert_eq!(report.operation_count, 1);
        assert_eq!(report.total_rows_processed, 500);
    }
}
