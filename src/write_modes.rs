//! Write-mode SQL generation (§4.7). Grounded in
//! `original_source/.../transform/handlers.py`'s `*TransformHandler` family:
//! each mode turns a [`TransformStep`] into an ordered statement sequence
//! plus a parameter map the orchestrator (C11) executes in order.

use std::collections::HashMap;

use chrono::{Duration, Utc};

use crate::engine::SqlEngine;
use crate::error::{Result, TransformError};
use crate::model::{TransformStep, WriteMode};
use crate::sql_safety::SqlValue;
use crate::time_substitution::substitute_time_macros;

/// An ordered SQL statement sequence plus the parameter map every statement
/// is executed with (§4.7). Statements that don't reference a placeholder
/// simply ignore the unused entries.
pub struct GeneratedSql {
    pub statements: Vec<String>,
    pub params: HashMap<String, SqlValue>,
}

impl GeneratedSql {
    fn single(statement: impl Into<String>) -> Self {
        Self { statements: vec![statement.into()], params: HashMap::new() }
    }
}

fn temp_name(prefix: &str) -> String {
    format!("{prefix}_{}", Utc::now().timestamp_millis())
}

/// Parses a `LOOKBACK` string like `"2 DAYS"` into a day count, defaulting
/// to 1 on anything that doesn't parse (§4.7, grounded in
/// `handlers.py::_parse_lookback`).
fn parse_lookback_days(lookback: &str) -> i64 {
    let mut parts = lookback.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(n), Some(_unit)) => n.parse::<i64>().unwrap_or(1),
        _ => 1,
    }
}

fn columns_match(a: &[String], b: &[String]) -> bool {
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}

fn generate_replace(step: &TransformStep) -> Result<GeneratedSql> {
    Ok(GeneratedSql::single(format!("CREATE OR REPLACE TABLE {} AS {}", step.table_name, step.sql_query)))
}

fn generate_append(step: &TransformStep, engine: &dyn SqlEngine) -> Result<GeneratedSql> {
    if !engine.table_exists(&step.table_name)? {
        return Ok(GeneratedSql::single(format!("CREATE TABLE {} AS {}", step.table_name, step.sql_query)));
    }

    let view_name = temp_name("temp_transform");
    let create_view = format!("CREATE OR REPLACE VIEW {view_name} AS {}", step.sql_query);
    engine.execute(&create_view, &[])?;

    let source_columns = engine.table_columns(&view_name)?;
    let target_columns = engine.table_columns(&step.table_name)?;
    if !columns_match(&source_columns, &target_columns) {
        let _ = engine.execute(&format!("DROP VIEW {view_name}"), &[]);
        return Err(TransformError::SchemaValidation {
            table: step.table_name.clone(),
            reason: "source and target column sets differ".into(),
            source_schema: source_columns,
            target_schema: target_columns,
        });
    }

    Ok(GeneratedSql {
        statements: vec![
            create_view,
            format!("INSERT INTO {} SELECT * FROM {view_name}", step.table_name),
            format!("DROP VIEW {view_name}"),
        ],
        params: HashMap::new(),
    })
}

fn generate_merge(step: &TransformStep, engine: &dyn SqlEngine) -> Result<GeneratedSql> {
    if !engine.table_exists(&step.table_name)? {
        return Ok(GeneratedSql::single(format!("CREATE TABLE {} AS {}", step.table_name, step.sql_query)));
    }

    if step.merge_keys.is_empty() {
        return Err(TransformError::MergeKeyValidation {
            table: step.table_name.clone(),
            reason: "MERGE mode requires at least one merge key".into(),
            keys: Vec::new(),
        });
    }

    let temp_table = temp_name("temp_merge");
    let create_temp = format!("CREATE OR REPLACE TABLE {temp_table} AS {}", step.sql_query);
    engine.execute(&create_temp, &[])?;

    let source_columns = engine.table_columns(&temp_table)?;
    let target_columns = engine.table_columns(&step.table_name)?;
    let missing_in_source: Vec<&String> = step.merge_keys.iter().filter(|k| !source_columns.contains(k)).collect();
    let missing_in_target: Vec<&String> = step.merge_keys.iter().filter(|k| !target_columns.contains(k)).collect();
    if !missing_in_source.is_empty() || !missing_in_target.is_empty() {
        let _ = engine.execute(&format!("DROP TABLE {temp_table}"), &[]);
        return Err(TransformError::MergeKeyValidation {
            table: step.table_name.clone(),
            reason: "merge_keys must exist in both source and target schemas".into(),
            keys: step.merge_keys.clone(),
        });
    }

    Ok(GeneratedSql {
        statements: vec![
            create_temp,
            format!("INSERT OR REPLACE INTO {} SELECT * FROM {temp_table}", step.table_name),
            format!("DROP TABLE {temp_table}"),
        ],
        params: HashMap::new(),
    })
}

fn generate_incremental(step: &TransformStep, engine: &dyn SqlEngine) -> Result<GeneratedSql> {
    let end = Utc::now();
    let lookback_days = step.lookback.as_deref().map(parse_lookback_days).unwrap_or(0);
    let start = end - Duration::days(1) - Duration::days(lookback_days);

    let (substituted_sql, params) = substitute_time_macros(&step.sql_query, start, end);

    if !engine.table_exists(&step.table_name)? {
        return Ok(GeneratedSql {
            statements: vec![format!("CREATE TABLE {} AS {substituted_sql}", step.table_name)],
            params,
        });
    }

    let time_column = step.time_column.as_deref().ok_or_else(|| TransformError::Identifier {
        identifier: step.table_name.clone(),
        reason: "INCREMENTAL mode requires a time_column".into(),
    })?;

    let delete_sql =
        format!("DELETE FROM {} WHERE {time_column} >= $start_date AND {time_column} <= $end_date", step.table_name);
    let insert_sql = format!("INSERT INTO {} {substituted_sql}", step.table_name);

    Ok(GeneratedSql {
        statements: vec!["BEGIN TRANSACTION".to_string(), delete_sql, insert_sql, "COMMIT".to_string()],
        params,
    })
}

/// Dispatches to the write-mode handler matching `step.mode` (§4.7).
pub fn generate_sql_with_params(step: &TransformStep, engine: &dyn SqlEngine) -> Result<GeneratedSql> {
    match step.mode {
        WriteMode::Replace => generate_replace(step),
        WriteMode::Append => generate_append(step, engine),
        WriteMode::Merge => generate_merge(step, engine),
        WriteMode::Incremental => generate_incremental(step, engine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    #[test]
    fn replace_emits_single_statement_no_params() {
        let step = TransformStep::new("t", "SELECT 1", WriteMode::Replace);
        let generated = generate_sql_with_params(&step, &MockEngine::new()).unwrap();
        assert_eq!(generated.statements, vec!["CREATE OR REPLACE TABLE t AS SELECT 1".to_string()]);
        assert!(generated.params.is_empty());
    }

    #[test]
    fn append_creates_table_when_absent() {
        let engine = MockEngine::new();
        let step = TransformStep::new("t", "SELECT 1", WriteMode::Append);
        let generated = generate_sql_with_params(&step, &engine).unwrap();
        assert_eq!(generated.statements.len(), 1);
        assert!(generated.statements[0].starts_with("CREATE TABLE t AS"));
    }

    #[test]
    fn append_inserts_through_view_when_present_and_compatible() {
        let engine = MockEngine::new();
        engine.set_table_exists("t", true);
        engine.set_table_columns("t", vec!["a".into(), "b".into()]);
        let step = TransformStep::new("t", "SELECT a, b FROM s", WriteMode::Append);

        struct ViewAwareEngine(MockEngine);
        impl SqlEngine for ViewAwareEngine {
            fn execute(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<crate::engine::EngineResult> {
                if sql.starts_with("CREATE OR REPLACE VIEW") {
                    self.0.set_table_columns(sql.split_whitespace().nth(4).unwrap(), vec!["a".into(), "b".into()]);
                }
                self.0.execute(sql, params)
            }
            fn count(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<u64> {
                self.0.count(sql, params)
            }
            fn max_value(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<Option<String>> {
                self.0.max_value(sql, params)
            }
            fn string_column(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<Vec<String>> {
                self.0.string_column(sql, params)
            }
            fn begin(&self) -> Result<()> {
                self.0.begin()
            }
            fn commit(&self) -> Result<()> {
                self.0.commit()
            }
            fn rollback(&self) -> Result<()> {
                self.0.rollback()
            }
            fn table_exists(&self, table: &str) -> Result<bool> {
                self.0.table_exists(table)
            }
            fn table_columns(&self, table: &str) -> Result<Vec<String>> {
                self.0.table_columns(table)
            }
        }

        let wrapped = ViewAwareEngine(engine);
        let generated = generate_sql_with_params(&step, &wrapped).unwrap();
        assert_eq!(generated.statements.len(), 3);
        assert!(generated.statements[1].contains("INSERT INTO t SELECT * FROM temp_transform"));
    }

    #[test]
    fn merge_requires_keys_when_target_exists() {
        let engine = MockEngine::new();
        engine.set_table_exists("t", true);
        let step = TransformStep::new("t", "SELECT 1", WriteMode::Merge);
        assert!(generate_sql_with_params(&step, &engine).is_err());
    }

    #[test]
    fn incremental_substitutes_macros_and_wraps_transaction_when_target_exists() {
        let engine = MockEngine::new();
        engine.set_table_exists("t", true);
        let step = TransformStep::new("t", "SELECT * FROM s WHERE d >= @start_date", WriteMode::Incremental)
            .with_time_column("d");
        let generated = generate_sql_with_params(&step, &engine).unwrap();
        assert_eq!(generated.statements[0], "BEGIN TRANSACTION");
        assert_eq!(generated.statements.last().unwrap(), "COMMIT");
        assert!(generated.statements[2].contains("$start_date"));
    }

    #[test]
    fn lookback_parses_leading_integer_defaulting_to_one() {
        assert_eq!(parse_lookback_days("2 DAYS"), 2);
        assert_eq!(parse_lookback_days("garbage"), 1);
        assert_eq!(parse_lookback_days("x DAYS"), 1);
    }
}
