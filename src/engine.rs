//! The external SQL engine contract (§6.1): an embedded, columnar OLAP
//! query processor this crate drives but does not own. The core is
//! synchronous (§5); [`ClickHouseEngine`] presents a blocking facade over
//! the async `clickhouse` client by driving it through an owned Tokio
//! runtime, the way the orchestrator and its components expect.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, TransformError};
use crate::sql_safety::SqlValue;

/// Outcome of a non-query statement (`INSERT`/`DELETE`/`CREATE`/...).
#[derive(Debug, Clone, Default)]
pub struct EngineResult {
    pub rows_affected: Option<u64>,
}

/// The minimal surface C1–C11 require of an embedded analytical SQL engine.
/// See SPEC_FULL.md §6.1 for the full external-interface contract this
/// trait realizes.
pub trait SqlEngine: Send + Sync {
    fn execute(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<EngineResult>;

    /// Scalar `SELECT count(...) ...`-shaped query.
    fn count(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<u64>;

    /// Scalar nullable value query, e.g. `SELECT MAX(col) FROM t`.
    fn max_value(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<Option<String>>;

    /// A single string column projected across many rows, e.g. column names
    /// from `information_schema.columns` or catalog table names.
    fn string_column(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<Vec<String>>;

    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    fn table_exists(&self, table: &str) -> Result<bool>;
    fn table_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Catalog-reported file paths backing an external/native table, used
    /// by C4's file-path-based partition detection. Adapters with no such
    /// catalog concept return an empty list.
    fn list_table_files(&self, _table: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineDialect {
    ClickHouse,
}

/// Adapter over `clickhouse::Client`.
///
/// ClickHouse has no traditional `BEGIN`/`COMMIT`/`ROLLBACK` transaction
/// model (table engines like `MergeTree` are not transactional in the
/// RDBMS sense); `begin`/`commit` are no-ops and `rollback` is best-effort
/// (it cannot undo an already-applied `INSERT`). This is a deliberate,
/// documented limitation (see DESIGN.md) rather than a silent gap: the
/// orchestrator still issues the statements in the spec-mandated order, so
/// callers against a genuinely transactional engine get full atomicity,
/// while ClickHouse callers get "best effort, logged" semantics.
pub struct ClickHouseEngine {
    client: clickhouse::Client,
    runtime: tokio::runtime::Runtime,
}

impl ClickHouseEngine {
    pub fn new(url: &str, database: &str, user: &str, password: &str) -> Result<Self> {
        let client = clickhouse::Client::default()
            .with_url(url)
            .with_database(database)
            .with_user(user)
            .with_password(password);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| TransformError::Connection { reason: e.to_string() })?;
        Ok(Self { client, runtime })
    }

    /// Resolves `$name` placeholders into dialect-safe literals. ClickHouse's
    /// client binds positional `?` parameters; named `$name` placeholders
    /// from C2/C7/C8 are substituted here rather than forwarded, since this
    /// adapter is the single place that understands both conventions.
    fn resolve(&self, sql: &str, params: &[(&str, SqlValue)]) -> String {
        let mut out = sql.to_string();
        for (name, value) in params {
            let literal = format_literal(value);
            out = out.replace(&format!("${name}"), &literal);
        }
        out
    }
}

fn format_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

#[derive(Debug, serde::Deserialize, serde::Serialize, clickhouse::Row)]
struct CountRow {
    count: u64,
}

#[derive(Debug, serde::Deserialize, serde::Serialize, clickhouse::Row)]
struct MaxRow {
    value: Option<String>,
}

#[derive(Debug, serde::Deserialize, serde::Serialize, clickhouse::Row)]
struct StringRow {
    value: String,
}

impl SqlEngine for ClickHouseEngine {
    fn execute(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<EngineResult> {
        let resolved = self.resolve(sql, params);
        self.runtime.block_on(async {
            self.client
                .query(&resolved)
                .execute()
                .await
                .map_err(|e| TransformError::Connection { reason: e.to_string() })
        })?;
        Ok(EngineResult { rows_affected: None })
    }

    fn count(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<u64> {
        let resolved = self.resolve(sql, params);
        self.runtime.block_on(async {
            self.client
                .query(&resolved)
                .fetch_one::<CountRow>()
                .await
                .map(|r| r.count)
                .map_err(|e| TransformError::Connection { reason: e.to_string() })
        })
    }

    fn max_value(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<Option<String>> {
        let resolved = self.resolve(sql, params);
        self.runtime.block_on(async {
            self.client
                .query(&resolved)
                .fetch_one::<MaxRow>()
                .await
                .map(|r| r.value)
                .map_err(|e| TransformError::Connection { reason: e.to_string() })
        })
    }

    fn string_column(&self, sql: &str, params: &[(&str, SqlValue)]) -> Result<Vec<String>> {
        let resolved = self.resolve(sql, params);
        self.runtime.block_on(async {
            self.client
                .query(&resolved)
                .fetch_all::<StringRow>()
                .await
                .map(|rows| rows.into_iter().map(|r| r.value).collect())
                .map_err(|e| TransformError::Connection { reason: e.to_string() })
        })
    }

    fn begin(&self) -> Result<()> {
        tracing::debug!("ClickHouse has no transaction model; BEGIN is a no-op");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        tracing::warn!("ClickHouse ROLLBACK requested; already-applied statements cannot be undone");
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let count = self.count(
            "SELECT count() as count FROM system.tables WHERE name = $table",
            &[("table", SqlValue::Text(table.to_string()))],
        )?;
        Ok(count > 0)
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        self.string_column(
            "SELECT name as value FROM system.columns WHERE table = $table ORDER BY position",
            &[("table", SqlValue::Text(table.to_string()))],
        )
    }
}

/// Test-only in-memory engine: records every executed statement and serves
/// canned responses, so C7/C8/C11 logic can be exercised without a live
/// embedded engine.
#[derive(Default)]
pub struct MockEngine {
    inner: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    executed: Vec<String>,
    counts: HashMap<String, u64>,
    max_values: HashMap<String, Option<String>>,
    string_columns: HashMap<String, Vec<String>>,
    existing_tables: HashMap<String, bool>,
    table_columns: HashMap<String, Vec<String>>,
    in_transaction: bool,
    fail_on_contains: Option<String>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_table_exists(&self, table: &str, exists: bool) {
        self.inner.lock().unwrap().existing_tables.insert(table.to_string(), exists);
    }

    pub fn set_table_columns(&self, table: &str, columns: Vec<String>) {
        self.inner.lock().unwrap().table_columns.insert(table.to_string(), columns);
    }

    pub fn set_count(&self, key: &str, count: u64) {
        self.inner.lock().unwrap().counts.insert(key.to_string(), count);
    }

    pub fn set_max_value(&self, key: &str, value: Option<String>) {
        self.inner.lock().unwrap().max_values.insert(key.to_string(), value);
    }

    pub fn set_string_column(&self, key: &str, values: Vec<String>) {
        self.inner.lock().unwrap().string_columns.insert(key.to_string(), values);
    }

    /// Causes the next `execute` whose SQL contains `needle` to fail.
    pub fn fail_next_containing(&self, needle: &str) {
        self.inner.lock().unwrap().fail_on_contains = Some(needle.to_string());
    }

    pub fn executed_statements(&self) -> Vec<String> {
        self.inner.lock().unwrap().executed.clone()
    }
}

impl SqlEngine for MockEngine {
    fn execute(&self, sql: &str, _params: &[(&str, SqlValue)]) -> Result<EngineResult> {
        let mut state = self.inner.lock().unwrap();
        if let Some(needle) = state.fail_on_contains.clone() {
            if sql.contains(&needle) {
                state.fail_on_contains = None;
                return Err(TransformError::StepExecution {
                    table: String::new(),
                    step_type: "unknown".into(),
                    statement: sql.to_string(),
                    reason: "mock-injected failure".into(),
                });
            }
        }
        if sql.trim_start().to_uppercase().starts_with("BEGIN") {
            state.in_transaction = true;
        }
        if sql.trim_start().to_uppercase().starts_with("COMMIT")
            || sql.trim_start().to_uppercase().starts_with("ROLLBACK")
        {
            state.in_transaction = false;
        }
        state.executed.push(sql.to_string());
        Ok(EngineResult { rows_affected: Some(0) })
    }

    fn count(&self, sql: &str, _params: &[(&str, SqlValue)]) -> Result<u64> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .counts
            .iter()
            .find(|(k, _)| sql.contains(k.as_str()))
            .map(|(_, v)| *v)
            .unwrap_or(0))
    }

    fn max_value(&self, sql: &str, _params: &[(&str, SqlValue)]) -> Result<Option<String>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .max_values
            .iter()
            .find(|(k, _)| sql.contains(k.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or(None))
    }

    fn string_column(&self, sql: &str, _params: &[(&str, SqlValue)]) -> Result<Vec<String>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .string_columns
            .iter()
            .find(|(k, _)| sql.contains(k.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_default())
    }

    fn begin(&self) -> Result<()> {
        self.inner.lock().unwrap().in_transaction = true;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.inner.lock().unwrap().in_transaction = false;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.inner.lock().unwrap().in_transaction = false;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().existing_tables.get(table).copied().unwrap_or(false))
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.inner.lock().unwrap().table_columns.get(table).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_engine_records_statements_in_order() {
        let engine = MockEngine::new();
        engine.execute("BEGIN TRANSACTION", &[]).unwrap();
        engine.execute("DELETE FROM t", &[]).unwrap();
        engine.execute("COMMIT", &[]).unwrap();
        assert_eq!(
            engine.executed_statements(),
            vec!["BEGIN TRANSACTION".to_string(), "DELETE FROM t".to_string(), "COMMIT".to_string()]
        );
    }

    #[test]
    fn mock_engine_can_fail_on_demand() {
        let engine = MockEngine::new();
        engine.fail_next_containing("DROP");
        assert!(engine.execute("DROP TABLE t", &[]).is_err());
        assert!(engine.execute("SELECT 1", &[]).is_ok());
    }

    #[test]
    fn format_literal_escapes_quotes() {
        assert_eq!(format_literal(&SqlValue::Text("a'b".into())), "'a''b'");
        assert_eq!(format_literal(&SqlValue::Int(5)), "5");
        assert_eq!(format_literal(&SqlValue::Null), "NULL");
    }
}
