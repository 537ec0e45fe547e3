//! Incremental strategy engine (§4.8). Grounded in
//! `original_source/.../transform/incremental_strategies.py`'s
//! `IncrementalStrategy` family and `IncrementalStrategyManager`: four
//! concrete load strategies, an auto-selector scoring `can_handle` +
//! `estimate_performance`, and a post-load quality pass.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::engine::SqlEngine;
use crate::error::{Result, TransformError};
use crate::model::WriteMode;
use crate::sql_safety::SqlValue;
use crate::watermark::WatermarkStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStrategy {
    Append,
    Upsert,
    Snapshot,
    Cdc,
}

/// Labels the single shared [`LoadResult`] with whichever strategy space
/// produced it: a C7 write-mode handler (REPLACE/APPEND/MERGE/INCREMENTAL)
/// or a C8 incremental strategy (APPEND/UPSERT/SNAPSHOT/CDC). The two spaces
/// overlap in name but not in mechanism, so they're kept as distinct
/// variants rather than forced into one enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    WriteMode(WriteMode),
    Load(LoadStrategy),
}

/// How UPSERT/CDC resolve rows present in both source and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    SourceWins,
    TargetWins,
    Skip,
}

/// Shape of a table's change behavior, used to pick a strategy (§4.8).
#[derive(Debug, Clone)]
pub struct LoadPattern {
    pub row_count_estimate: u64,
    pub change_rate: f64,
    pub insert_rate: f64,
    pub update_rate: f64,
    pub delete_rate: f64,
    pub load_frequency_hours: f64,
    pub data_latency_s: f64,
    pub has_primary_key: bool,
    pub has_update_timestamp: bool,
    pub has_delete_flag: bool,
    pub requires_exact_history: bool,
    pub allows_duplicates: bool,
    pub needs_rollback: bool,
}

/// A strategy's source description (§3). `parameters` carries any bound
/// values `source_query` references via `$name` placeholders.
#[derive(Debug, Clone, Default)]
pub struct DataSource {
    pub source_query: String,
    pub table_name: String,
    pub key_columns: Vec<String>,
    pub time_column: Option<String>,
    pub delete_column: Option<String>,
    pub parameters: HashMap<String, SqlValue>,
}

impl DataSource {
    pub fn new(source_query: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self { source_query: source_query.into(), table_name: table_name.into(), ..Default::default() }
    }

    pub fn with_key_columns(mut self, keys: Vec<String>) -> Self {
        self.key_columns = keys;
        self
    }

    pub fn with_time_column(mut self, col: impl Into<String>) -> Self {
        self.time_column = Some(col.into());
        self
    }

    pub fn with_delete_column(mut self, col: impl Into<String>) -> Self {
        self.delete_column = Some(col.into());
        self
    }
}

/// Outcome of one strategy execution (§3). `success()` holds iff
/// `validation_errors` is empty.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub strategy_used: ExecutionStrategy,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
    pub execution_time_ms: u64,
    pub watermark_updated: Option<DateTime<Utc>>,
    pub data_quality_score: f64,
    pub validation_errors: Vec<String>,
    pub rollback_point: Option<String>,
    pub rollback_metadata: HashMap<String, String>,
}

impl LoadResult {
    pub fn success(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PerformanceEstimate {
    pub time_ms: u64,
    pub memory_mb: f64,
}

fn elapsed_ms(start: Instant) -> u64 {
    (start.elapsed().as_millis() as u64).max(1)
}

/// A concrete incremental load strategy (§4.8).
pub trait IncrementalStrategy: Send + Sync {
    fn name(&self) -> LoadStrategy;
    fn can_handle(&self, pattern: &LoadPattern) -> bool;
    fn estimate_performance(&self, pattern: &LoadPattern) -> PerformanceEstimate;
    fn execute(
        &self,
        engine: &dyn SqlEngine,
        source: &DataSource,
        target: &str,
        conflict_resolution: ConflictResolution,
    ) -> Result<LoadResult>;
}

/// Watermark-filtered append-only insert.
pub struct AppendStrategy<'a> {
    watermarks: &'a WatermarkStore,
}

impl<'a> AppendStrategy<'a> {
    pub fn new(watermarks: &'a WatermarkStore) -> Self {
        Self { watermarks }
    }
}

impl<'a> IncrementalStrategy for AppendStrategy<'a> {
    fn name(&self) -> LoadStrategy {
        LoadStrategy::Append
    }

    fn can_handle(&self, pattern: &LoadPattern) -> bool {
        pattern.insert_rate > 0.8 && pattern.update_rate < 0.1 && pattern.delete_rate < 0.1 && !pattern.allows_duplicates
    }

    fn estimate_performance(&self, pattern: &LoadPattern) -> PerformanceEstimate {
        PerformanceEstimate {
            time_ms: (pattern.row_count_estimate / 10).max(1),
            memory_mb: pattern.row_count_estimate as f64 * 1024.0 * 2.0 / 1_048_576.0,
        }
    }

    fn execute(
        &self,
        engine: &dyn SqlEngine,
        source: &DataSource,
        target: &str,
        _conflict_resolution: ConflictResolution,
    ) -> Result<LoadResult> {
        let start = Instant::now();
        let watermark = source.time_column.as_deref().and_then(|col| self.watermarks.get(engine, target, col));

        let filtered_query = match (&source.time_column, watermark) {
            (Some(col), Some(wm)) => {
                format!("SELECT * FROM ({}) AS sqlflow_append_src WHERE {col} > '{}'", source.source_query, wm.to_rfc3339())
            }
            _ => source.source_query.clone(),
        };

        let insert_sql = format!("INSERT INTO {target} {filtered_query}");
        let exec_result = engine.execute(&insert_sql, &[])?;
        // Neither adapter (§6.1) reports a trustworthy affected-row count, so
        // the rowcount path only applies when one is actually present; both
        // shipped engines fall through to the post-count query.
        let rows_inserted = match exec_result.rows_affected {
            Some(n) if n > 0 => n,
            _ => {
                let count_sql = format!("SELECT count(*) as count FROM ({filtered_query}) AS sqlflow_append_count");
                engine.count(&count_sql, &[]).unwrap_or(0)
            }
        };

        let new_watermark = if rows_inserted > 0 { Some(Utc::now()) } else { None };
        if let (Some(col), Some(wm)) = (&source.time_column, new_watermark) {
            self.watermarks.update(target, col, wm);
        }

        Ok(LoadResult {
            strategy_used: ExecutionStrategy::Load(LoadStrategy::Append),
            rows_inserted,
            rows_updated: 0,
            rows_deleted: 0,
            execution_time_ms: elapsed_ms(start),
            watermark_updated: new_watermark,
            data_quality_score: 1.0,
            validation_errors: Vec::new(),
            rollback_point: None,
            rollback_metadata: HashMap::new(),
        })
    }
}

/// Insert-if-not-exists plus update-on-intersection, keyed on `key_columns`.
pub struct UpsertStrategy;

impl IncrementalStrategy for UpsertStrategy {
    fn name(&self) -> LoadStrategy {
        LoadStrategy::Upsert
    }

    fn can_handle(&self, pattern: &LoadPattern) -> bool {
        pattern.has_primary_key && pattern.update_rate > 0.0 && !pattern.requires_exact_history
    }

    fn estimate_performance(&self, pattern: &LoadPattern) -> PerformanceEstimate {
        PerformanceEstimate {
            time_ms: (pattern.row_count_estimate / 5).max(1),
            memory_mb: pattern.row_count_estimate as f64 * 1024.0 * 3.0 / 1_048_576.0,
        }
    }

    fn execute(
        &self,
        engine: &dyn SqlEngine,
        source: &DataSource,
        target: &str,
        conflict_resolution: ConflictResolution,
    ) -> Result<LoadResult> {
        if source.key_columns.is_empty() {
            return Err(TransformError::MergeKeyValidation {
                table: target.to_string(),
                reason: "UPSERT strategy requires non-empty key_columns".into(),
                keys: Vec::new(),
            });
        }

        let start = Instant::now();
        let temp_table = format!("temp_upsert_{}", Utc::now().timestamp_millis());
        engine.execute(&format!("CREATE OR REPLACE TABLE {temp_table} AS {}", source.source_query), &[])?;

        let key_predicate = source.key_columns.iter().map(|k| format!("t.{k} = s.{k}")).collect::<Vec<_>>().join(" AND ");

        let run = || -> Result<(u64, u64)> {
            let rows_inserted = engine
                .count(
                    &format!(
                        "SELECT count(*) as count FROM {temp_table} s WHERE NOT EXISTS (SELECT 1 FROM {target} t WHERE {key_predicate})"
                    ),
                    &[],
                )
                .unwrap_or(0);
            let intersecting = engine
                .count(
                    &format!(
                        "SELECT count(*) as count FROM {temp_table} s WHERE EXISTS (SELECT 1 FROM {target} t WHERE {key_predicate})"
                    ),
                    &[],
                )
                .unwrap_or(0);

            engine.execute(
                &format!(
                    "INSERT INTO {target} SELECT s.* FROM {temp_table} s WHERE NOT EXISTS (SELECT 1 FROM {target} t WHERE {key_predicate})"
                ),
                &[],
            )?;

            let rows_updated = if conflict_resolution == ConflictResolution::SourceWins && intersecting > 0 {
                let target_columns = engine.table_columns(target)?;
                let non_key_columns: Vec<&String> =
                    target_columns.iter().filter(|c| !source.key_columns.contains(*c)).collect();
                if non_key_columns.is_empty() {
                    0
                } else {
                    let set_clause =
                        non_key_columns.iter().map(|c| format!("{c} = s.{c}")).collect::<Vec<_>>().join(", ");
                    engine.execute(
                        &format!("UPDATE {target} AS t SET {set_clause} FROM {temp_table} s WHERE {key_predicate}"),
                        &[],
                    )?;
                    intersecting
                }
            } else {
                0
            };

            Ok((rows_inserted, rows_updated))
        };

        let outcome = run();
        let _ = engine.execute(&format!("DROP TABLE {temp_table}"), &[]);
        let (rows_inserted, rows_updated) = outcome?;

        Ok(LoadResult {
            strategy_used: ExecutionStrategy::Load(LoadStrategy::Upsert),
            rows_inserted,
            rows_updated,
            rows_deleted: 0,
            execution_time_ms: elapsed_ms(start),
            watermark_updated: None,
            data_quality_score: 1.0,
            validation_errors: Vec::new(),
            rollback_point: None,
            rollback_metadata: HashMap::new(),
        })
    }
}

/// Full-table replace via a backup table, for high-change-rate sources with
/// no exact-history requirement.
pub struct SnapshotStrategy;

impl IncrementalStrategy for SnapshotStrategy {
    fn name(&self) -> LoadStrategy {
        LoadStrategy::Snapshot
    }

    fn can_handle(&self, pattern: &LoadPattern) -> bool {
        pattern.row_count_estimate < 1_000_000 && pattern.change_rate > 0.5 && !pattern.requires_exact_history
    }

    fn estimate_performance(&self, pattern: &LoadPattern) -> PerformanceEstimate {
        PerformanceEstimate {
            time_ms: (pattern.row_count_estimate / 2).max(1),
            memory_mb: pattern.row_count_estimate as f64 * 1024.0 * 4.0 / 1_048_576.0,
        }
    }

    fn execute(
        &self,
        engine: &dyn SqlEngine,
        source: &DataSource,
        target: &str,
        _conflict_resolution: ConflictResolution,
    ) -> Result<LoadResult> {
        let start = Instant::now();
        let backup_table = format!("backup_{target}_{}", Utc::now().timestamp());
        let before_count = engine.count(&format!("SELECT count(*) as count FROM {target}"), &[]).unwrap_or(0);

        engine.execute(&format!("CREATE TABLE {backup_table} AS SELECT * FROM {target}"), &[])?;
        engine.execute(&format!("DELETE FROM {target}"), &[])?;

        if let Err(e) = engine.execute(&format!("INSERT INTO {target} {}", source.source_query), &[]) {
            let _ = rollback_snapshot(engine, target, &backup_table);
            return Err(e);
        }

        let after_count = engine.count(&format!("SELECT count(*) as count FROM {target}"), &[]).unwrap_or(0);
        let mut rollback_metadata = HashMap::new();
        rollback_metadata.insert("rows_before".to_string(), before_count.to_string());

        Ok(LoadResult {
            strategy_used: ExecutionStrategy::Load(LoadStrategy::Snapshot),
            rows_inserted: after_count,
            rows_updated: 0,
            rows_deleted: before_count,
            execution_time_ms: elapsed_ms(start),
            watermark_updated: None,
            data_quality_score: 1.0,
            validation_errors: Vec::new(),
            rollback_point: Some(backup_table),
            rollback_metadata,
        })
    }
}

/// Reverts a [`SnapshotStrategy`] load using its `rollback_point` (§4.8):
/// empty the target, copy the backup back in, drop the backup.
pub fn rollback_snapshot(engine: &dyn SqlEngine, target: &str, backup_table: &str) -> Result<()> {
    engine.execute(&format!("DELETE FROM {target}"), &[])?;
    engine.execute(&format!("INSERT INTO {target} SELECT * FROM {backup_table}"), &[])?;
    engine.execute(&format!("DROP TABLE {backup_table}"), &[])?;
    Ok(())
}

/// Change-data-capture replay: DELETE, then UPDATE, then INSERT, ordered by
/// the marker value in `delete_column` (`'D'`/`'U'`/`'I'`).
pub struct CdcStrategy;

impl IncrementalStrategy for CdcStrategy {
    fn name(&self) -> LoadStrategy {
        LoadStrategy::Cdc
    }

    fn can_handle(&self, pattern: &LoadPattern) -> bool {
        pattern.has_delete_flag && pattern.has_primary_key && pattern.delete_rate > 0.0
    }

    fn estimate_performance(&self, pattern: &LoadPattern) -> PerformanceEstimate {
        PerformanceEstimate {
            time_ms: (pattern.row_count_estimate / 8).max(1),
            memory_mb: pattern.row_count_estimate as f64 * 1024.0 * 2.5 / 1_048_576.0,
        }
    }

    fn execute(
        &self,
        engine: &dyn SqlEngine,
        source: &DataSource,
        target: &str,
        _conflict_resolution: ConflictResolution,
    ) -> Result<LoadResult> {
        let delete_column = source.delete_column.as_deref().ok_or_else(|| TransformError::Identifier {
            identifier: target.to_string(),
            reason: "CDC strategy requires a delete_column".into(),
        })?;
        if source.key_columns.is_empty() {
            return Err(TransformError::MergeKeyValidation {
                table: target.to_string(),
                reason: "CDC strategy requires non-empty key_columns".into(),
                keys: Vec::new(),
            });
        }

        let start = Instant::now();
        let temp_table = format!("temp_cdc_{}", Utc::now().timestamp_millis());
        engine.execute(&format!("CREATE OR REPLACE TABLE {temp_table} AS {}", source.source_query), &[])?;

        let key_predicate = source.key_columns.iter().map(|k| format!("t.{k} = s.{k}")).collect::<Vec<_>>().join(" AND ");
        let target_columns = engine.table_columns(target).unwrap_or_default();
        let non_key_columns: Vec<&String> =
            target_columns.iter().filter(|c| !source.key_columns.contains(*c) && c.as_str() != delete_column).collect();

        let run = || -> Result<(u64, u64, u64)> {
            let rows_deleted = engine
                .count(&format!("SELECT count(*) as count FROM {temp_table} WHERE {delete_column} = 'D'"), &[])
                .unwrap_or(0);
            engine.execute(
                &format!(
                    "DELETE FROM {target} AS t WHERE EXISTS (SELECT 1 FROM {temp_table} s WHERE s.{delete_column} = 'D' AND {key_predicate})"
                ),
                &[],
            )?;

            let rows_updated = engine
                .count(
                    &format!(
                        "SELECT count(*) as count FROM {temp_table} s WHERE s.{delete_column} = 'U' AND EXISTS (SELECT 1 FROM {target} t WHERE {key_predicate})"
                    ),
                    &[],
                )
                .unwrap_or(0);
            if rows_updated > 0 && !non_key_columns.is_empty() {
                let set_clause =
                    non_key_columns.iter().map(|c| format!("{c} = s.{c}")).collect::<Vec<_>>().join(", ");
                engine.execute(
                    &format!(
                        "UPDATE {target} AS t SET {set_clause} FROM {temp_table} s WHERE s.{delete_column} = 'U' AND {key_predicate}"
                    ),
                    &[],
                )?;
            }

            let rows_inserted = engine
                .count(&format!("SELECT count(*) as count FROM {temp_table} WHERE {delete_column} = 'I'"), &[])
                .unwrap_or(0);
            if rows_inserted > 0 {
                let projected = if target_columns.is_empty() { "*".to_string() } else { target_columns.join(", ") };
                engine.execute(
                    &format!("INSERT INTO {target} SELECT {projected} FROM {temp_table} WHERE {delete_column} = 'I'"),
                    &[],
                )?;
            }

            Ok((rows_deleted, rows_updated, rows_inserted))
        };

        let outcome = run();
        let _ = engine.execute(&format!("DROP TABLE {temp_table}"), &[]);
        let (rows_deleted, rows_updated, rows_inserted) = outcome?;

        Ok(LoadResult {
            strategy_used: ExecutionStrategy::Load(LoadStrategy::Cdc),
            rows_inserted,
            rows_updated,
            rows_deleted,
            execution_time_ms: elapsed_ms(start),
            watermark_updated: None,
            data_quality_score: 1.0,
            validation_errors: Vec::new(),
            rollback_point: None,
            rollback_metadata: HashMap::new(),
        })
    }
}

fn base_weight(strategy: LoadStrategy) -> f64 {
    match strategy {
        LoadStrategy::Append => 1.0,
        LoadStrategy::Upsert => 0.7,
        LoadStrategy::Snapshot => 0.5,
        LoadStrategy::Cdc => 0.9,
    }
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub strategy: LoadStrategy,
    pub score: f64,
    pub fallback: bool,
}

/// Scores every strategy that reports `can_handle(pattern)` and returns the
/// highest scorer, ties broken by the caller's declaration order (§4.8). If
/// no strategy claims the pattern, falls back to APPEND and logs a warning.
pub fn select_strategy(strategies: &[&dyn IncrementalStrategy], pattern: &LoadPattern) -> SelectionOutcome {
    let mut best: Option<(LoadStrategy, f64)> = None;
    for strategy in strategies {
        if !strategy.can_handle(pattern) {
            continue;
        }
        let estimate = strategy.estimate_performance(pattern);
        let mut score = base_weight(strategy.name());
        if estimate.time_ms < 10_000 {
            score += 0.2;
        }
        if estimate.memory_mb < 100.0 {
            score += 0.1;
        }
        match &best {
            Some((_, best_score)) if score <= *best_score => {}
            _ => best = Some((strategy.name(), score)),
        }
    }

    match best {
        Some((strategy, score)) => SelectionOutcome { strategy, score, fallback: false },
        None => {
            tracing::warn!("no incremental strategy reported can_handle for this load pattern; falling back to APPEND");
            SelectionOutcome { strategy: LoadStrategy::Append, score: 0.0, fallback: true }
        }
    }
}

/// Derives a [`LoadPattern`] from target statistics and data-source shape
/// when the orchestrator's `execute_with_auto_strategy` is not given one
/// explicitly (§4.11).
pub fn analyze_load_pattern(engine: &dyn SqlEngine, source: &DataSource, target: &str) -> LoadPattern {
    let row_count_estimate = engine.count(&format!("SELECT count(*) as count FROM {target}"), &[]).unwrap_or(0);
    let has_primary_key = !source.key_columns.is_empty();
    let has_update_timestamp = source.time_column.is_some();
    let has_delete_flag = source.delete_column.is_some();

    LoadPattern {
        row_count_estimate,
        change_rate: if has_delete_flag { 0.6 } else { 0.3 },
        insert_rate: if has_delete_flag { 0.3 } else { 0.8 },
        update_rate: if has_primary_key { 0.2 } else { 0.0 },
        delete_rate: if has_delete_flag { 0.1 } else { 0.0 },
        load_frequency_hours: 24.0,
        data_latency_s: 0.0,
        has_primary_key,
        has_update_timestamp,
        has_delete_flag,
        requires_exact_history: false,
        allows_duplicates: false,
        needs_rollback: false,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).map(|d| d.with_timezone(&Utc)).ok().or_else(|| {
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|n| DateTime::<Utc>::from_naive_utc_and_offset(n, Utc))
    })
}

fn estimate_null_rate(engine: &dyn SqlEngine, target: &str) -> f64 {
    let columns = match engine.table_columns(target) {
        Ok(c) if !c.is_empty() => c,
        _ => return 0.0,
    };
    let total = engine.count(&format!("SELECT count(*) as count FROM {target}"), &[]).unwrap_or(0);
    if total == 0 {
        return 0.0;
    }
    let null_sum_expr = columns.iter().map(|c| format!("count(*) - count({c})")).collect::<Vec<_>>().join(" + ");
    let null_count =
        engine.count(&format!("SELECT CAST(({null_sum_expr}) AS BIGINT) as count FROM {target}"), &[]).unwrap_or(0);
    null_count as f64 / (total as f64 * columns.len() as f64)
}

/// Aggregated outcome of the post-load quality pass (§4.8): four sub-checks
/// — freshness, duplicates, null rate, and a schema-drift placeholder that
/// always passes.
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub overall_score: f64,
    pub checks_passed: u32,
    pub checks_failed: u32,
    pub null_rate: f64,
    pub duplicate_rate: f64,
    pub schema_drift_detected: bool,
    pub data_freshness_hours: f64,
    pub recommendations: Vec<String>,
}

/// Runs the four sub-checks described in §4.8 against `target` and scores
/// `checks_passed / total_checks`.
pub fn validate_incremental_quality(
    engine: &dyn SqlEngine,
    _result: &LoadResult,
    source: &DataSource,
    target: &str,
) -> QualityReport {
    const TOTAL_CHECKS: u32 = 4;
    let mut checks_passed = 0u32;
    let mut recommendations = Vec::new();

    let data_freshness_hours = match &source.time_column {
        Some(time_col) => match engine.max_value(&format!("SELECT max({time_col}) as value FROM {target}"), &[]) {
            Ok(Some(raw)) => parse_timestamp(&raw).map(|t| (Utc::now() - t).num_seconds() as f64 / 3600.0).unwrap_or(f64::MAX),
            _ => f64::MAX,
        },
        None => 0.0,
    };
    if source.time_column.is_none() || data_freshness_hours < 24.0 {
        checks_passed += 1;
    }

    let duplicate_rate = if !source.key_columns.is_empty() {
        let total = engine.count(&format!("SELECT count(*) as count FROM {target}"), &[]).unwrap_or(0);
        let key_list = source.key_columns.join(", ");
        let distinct =
            engine.count(&format!("SELECT count(DISTINCT {key_list}) as count FROM {target}"), &[]).unwrap_or(total);
        if distinct == 0 {
            0.0
        } else {
            total as f64 / distinct as f64
        }
    } else {
        0.0
    };
    if duplicate_rate < 0.01 {
        checks_passed += 1;
    } else {
        recommendations.push(format!("duplicate rate {duplicate_rate:.4} exceeds the 0.01 threshold"));
    }

    let null_rate = estimate_null_rate(engine, target);
    if null_rate < 0.1 {
        checks_passed += 1;
    } else {
        recommendations.push(format!("null rate {null_rate:.4} exceeds the 0.1 threshold"));
    }

    // Schema drift placeholder: always passes.
    checks_passed += 1;

    QualityReport {
        overall_score: checks_passed as f64 / TOTAL_CHECKS as f64,
        checks_passed,
        checks_failed: TOTAL_CHECKS - checks_passed,
        null_rate,
        duplicate_rate,
        schema_drift_detected: false,
        data_freshness_hours,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    fn pattern() -> LoadPattern {
        LoadPattern {
            row_count_estimate: 1_000,
            change_rate: 0.1,
            insert_rate: 0.9,
            update_rate: 0.0,
            delete_rate: 0.0,
            load_frequency_hours: 1.0,
            data_latency_s: 5.0,
            has_primary_key: false,
            has_update_timestamp: true,
            has_delete_flag: false,
            requires_exact_history: false,
            allows_duplicates: false,
            needs_rollback: false,
        }
    }

    #[test]
    fn append_suitability_matches_high_insert_low_churn() {
        let watermarks = WatermarkStore::in_memory().unwrap();
        let strategy = AppendStrategy::new(&watermarks);
        assert!(strategy.can_handle(&pattern()));
        let mut p = pattern();
        p.update_rate = 0.5;
        assert!(!strategy.can_handle(&p));
    }

    #[test]
    fn append_execute_inserts_and_advances_watermark() {
        let watermarks = WatermarkStore::in_memory().unwrap();
        let engine = MockEngine::new();
        engine.set_count("count", 5);
        let strategy = AppendStrategy::new(&watermarks);
        let source = DataSource::new("SELECT * FROM raw", "t");
        let result = strategy.execute(&engine, &source, "t", ConflictResolution::SourceWins).unwrap();
        assert_eq!(result.rows_inserted, 5);
        assert!(result.success());
        assert!(result.watermark_updated.is_some());
    }

    #[test]
    fn upsert_requires_key_columns() {
        let engine = MockEngine::new();
        let strategy = UpsertStrategy;
        let source = DataSource::new("SELECT * FROM raw", "t");
        assert!(strategy.execute(&engine, &source, "t", ConflictResolution::SourceWins).is_err());
    }

    #[test]
    fn upsert_counts_inserts_and_updates() {
        let engine = MockEngine::new();
        engine.set_table_columns("t", vec!["id".into(), "amount".into()]);
        engine.set_count("NOT EXISTS", 3);
        engine.set_count("s WHERE EXISTS", 2);
        let strategy = UpsertStrategy;
        let source = DataSource::new("SELECT * FROM raw", "t").with_key_columns(vec!["id".into()]);
        let result = strategy.execute(&engine, &source, "t", ConflictResolution::SourceWins).unwrap();
        assert_eq!(result.rows_inserted, 3);
        assert_eq!(result.rows_updated, 2);
        assert!(engine.executed_statements().iter().any(|s| s.starts_with("DROP TABLE temp_upsert_")));
    }

    #[test]
    fn snapshot_rolls_back_on_insert_failure() {
        let engine = MockEngine::new();
        engine.set_count("count", 10);
        engine.fail_next_containing("INSERT INTO t SELECT");
        let strategy = SnapshotStrategy;
        let source = DataSource::new("SELECT * FROM raw", "t");
        let err = strategy.execute(&engine, &source, "t", ConflictResolution::SourceWins);
        assert!(err.is_err());
        assert!(engine.executed_statements().iter().any(|s| s.starts_with("INSERT INTO t SELECT * FROM backup_")));
    }

    #[test]
    fn cdc_requires_delete_column_and_keys() {
        let engine = MockEngine::new();
        let strategy = CdcStrategy;
        let source = DataSource::new("SELECT * FROM raw", "t").with_key_columns(vec!["id".into()]);
        assert!(strategy.execute(&engine, &source, "t", ConflictResolution::SourceWins).is_err());
    }

    #[test]
    fn select_strategy_picks_the_only_handler_that_qualifies() {
        let watermarks = WatermarkStore::in_memory().unwrap();
        let append = AppendStrategy::new(&watermarks);
        let cdc = CdcStrategy;
        let mut p = pattern();
        p.has_delete_flag = true;
        p.has_primary_key = true;
        p.delete_rate = 0.2;
        // delete_rate above 0.1 disqualifies APPEND, leaving CDC as the only
        // handler that reports can_handle for this pattern.
        let strategies: Vec<&dyn IncrementalStrategy> = vec![&append, &cdc];
        let outcome = select_strategy(&strategies, &p);
        assert_eq!(outcome.strategy, LoadStrategy::Cdc);
        assert!(!outcome.fallback);
    }

    #[test]
    fn select_strategy_falls_back_to_append_when_nothing_matches() {
        let upsert = UpsertStrategy;
        let mut p = pattern();
        p.has_primary_key = false;
        p.update_rate = 0.0;
        let strategies: Vec<&dyn IncrementalStrategy> = vec![&upsert];
        let outcome = select_strategy(&strategies, &p);
        assert_eq!(outcome.strategy, LoadStrategy::Append);
        assert!(outcome.fallback);
    }

    #[test]
    fn quality_report_scores_four_checks() {
        let engine = MockEngine::new();
        engine.set_table_columns("t", vec!["id".into()]);
        engine.set_count("count", 100);
        let source = DataSource::new("SELECT * FROM raw", "t").with_key_columns(vec!["id".into()]);
        let result = LoadResult {
            strategy_used: ExecutionStrategy::Load(LoadStrategy::Append),
            rows_inserted: 1,
            rows_updated: 0,
            rows_deleted: 0,
            execution_time_ms: 1,
            watermark_updated: None,
            data_quality_score: 1.0,
            validation_errors: Vec::new(),
            rollback_point: None,
            rollback_metadata: HashMap::new(),
        };
        let report = validate_incremental_quality(&engine, &result, &source, "t");
        assert_eq!(report.checks_passed + report.checks_failed, 4);
        assert!(report.overall_score >= 0.0 && report.overall_score <= 1.0);
    }
}
