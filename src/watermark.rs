//! Durable, cached watermark store (§4.3). Structured after the teacher's
//! `ConfigDb`: a `Mutex<rusqlite::Connection>` opened once, migrated
//! idempotently, with an in-memory cache layered on top.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::engine::SqlEngine;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatermarkKey {
    table: String,
    column: String,
}

pub struct WatermarkStore {
    conn: Mutex<Connection>,
    cache: Mutex<HashMap<WatermarkKey, DateTime<Utc>>>,
}

impl WatermarkStore {
    /// Opens (or creates) the durable store at `path` and runs the
    /// idempotent migration creating `sqlflow_transform_watermarks` plus its
    /// lookup index (§6.2).
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sqlflow_transform_watermarks (
                table_name TEXT NOT NULL,
                time_column TEXT NOT NULL,
                last_watermark TEXT,
                last_updated TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                PRIMARY KEY (table_name, time_column)
            );
            CREATE INDEX IF NOT EXISTS idx_watermark_lookup
                ON sqlflow_transform_watermarks(table_name, time_column);",
        )?;
        Ok(Self { conn: Mutex::new(conn), cache: Mutex::new(HashMap::new()) })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Read protocol (§4.3): cache, then durable metadata, then a MAX()
    /// probe against the live table, writing the probed value back on
    /// success. Every failure path in this function returns `Ok(None)`
    /// rather than an error — a missing table on first run is expected.
    pub fn get(&self, engine: &dyn SqlEngine, table: &str, column: &str) -> Option<DateTime<Utc>> {
        let key = WatermarkKey { table: table.to_string(), column: column.to_string() };

        if let Some(v) = self.cache.lock().unwrap().get(&key).copied() {
            return Some(v);
        }

        if let Ok(Some(v)) = self.read_metadata(table, column) {
            self.cache.lock().unwrap().insert(key.clone(), v);
            return Some(v);
        }

        let probe_sql = format!("SELECT MAX({column}) as value FROM {table} WHERE {column} IS NOT NULL");
        match engine.max_value(&probe_sql, &[]) {
            Ok(Some(raw)) => match DateTime::parse_from_rfc3339(&raw)
                .map(|d| d.with_timezone(&Utc))
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
                        .map(|n| DateTime::<Utc>::from_naive_utc_and_offset(n, Utc))
                }) {
                Ok(parsed) => {
                    let _ = self.write_metadata(table, column, parsed);
                    self.cache.lock().unwrap().insert(key, parsed);
                    Some(parsed)
                }
                Err(_) => None,
            },
            _ => None,
        }
    }

    /// Write protocol (§4.3): upsert the metadata row, then unconditionally
    /// update the cache even if the metadata write failed.
    pub fn update(&self, table: &str, column: &str, value: DateTime<Utc>) {
        if let Err(e) = self.write_metadata(table, column, value) {
            tracing::warn!(table, column, error = %e, "failed to persist watermark; cache still updated");
        }
        let key = WatermarkKey { table: table.to_string(), column: column.to_string() };
        self.cache.lock().unwrap().insert(key, value);
    }

    /// Deletes the metadata row and evicts the cache entry. Returns true iff
    /// either the cache held the key or a metadata row was deleted.
    pub fn reset(&self, table: &str, column: &str) -> Result<bool> {
        let key = WatermarkKey { table: table.to_string(), column: column.to_string() };
        let cache_deleted = self.cache.lock().unwrap().remove(&key).is_some();
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM sqlflow_transform_watermarks WHERE table_name = ?1 AND time_column = ?2",
            params![table, column],
        )?;
        Ok(cache_deleted || rows > 0)
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    pub fn cache_stats(&self) -> (usize, usize) {
        let cache = self.cache.lock().unwrap();
        (cache.len(), cache.capacity())
    }

    pub fn list_watermarks(&self) -> Result<Vec<(String, String, Option<DateTime<Utc>>)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT table_name, time_column, last_watermark FROM sqlflow_transform_watermarks",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let ts: Option<String> = row.get(2)?;
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, ts))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(t, c, ts)| {
                let parsed = ts.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc));
                (t, c, parsed)
            })
            .collect())
    }

    fn read_metadata(&self, table: &str, column: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_watermark FROM sqlflow_transform_watermarks WHERE table_name = ?1 AND time_column = ?2",
                params![table, column],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)))
    }

    fn write_metadata(&self, table: &str, column: &str, value: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sqlflow_transform_watermarks (table_name, time_column, last_watermark, last_updated)
             VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
             ON CONFLICT(table_name, time_column) DO UPDATE SET
                last_watermark = excluded.last_watermark,
                last_updated = excluded.last_updated",
            params![table, column, value.to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use chrono::TimeZone;

    #[test]
    fn update_then_get_returns_same_value() {
        let store = WatermarkStore::in_memory().unwrap();
        let engine = MockEngine::new();
        let t = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        store.update("orders", "created_at", t);
        assert_eq!(store.get(&engine, "orders", "created_at"), Some(t));
    }

    #[test]
    fn reset_evicts_cache_and_row() {
        let store = WatermarkStore::in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.update("orders", "created_at", t);
        assert!(store.reset("orders", "created_at").unwrap());
        let engine = MockEngine::new();
        assert_eq!(store.get(&engine, "orders", "created_at"), None);
    }

    #[test]
    fn falls_back_to_max_probe_when_untracked() {
        let store = WatermarkStore::in_memory().unwrap();
        let engine = MockEngine::new();
        engine.set_max_value("orders", Some("2024-05-01T00:00:00+00:00".to_string()));
        let got = store.get(&engine, "orders", "created_at");
        assert!(got.is_some());
        // Second read should now hit the cache without consulting the probe again.
        assert_eq!(store.get(&engine, "orders", "created_at"), got);
    }

    #[test]
    fn reset_on_unknown_key_returns_false() {
        let store = WatermarkStore::in_memory().unwrap();
        assert!(!store.reset("never_seen", "col").unwrap());
    }
}
