//! Partition detection, creation, pruning, and strategy suggestion (§4.4).
//! Grounded in `original_source/sqlflow/.../transform/partitions.py`; the
//! detection/statistics/suggestion shapes follow it, expressed with the
//! crate's `SqlEngine` trait instead of a DuckDB-specific engine object.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;

use crate::engine::SqlEngine;
use crate::error::Result;
use crate::sql_safety::validate_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeGranularity {
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

/// A half-open `[start, end)` time range (§3, invariant 6 of §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: TimeGranularity,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, granularity: TimeGranularity) -> Option<Self> {
        if start < end {
            Some(Self { start, end, granularity })
        } else {
            None
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        !(self.end <= other.start || other.end <= self.start)
    }

    /// Canonical partition-name suffix derived from `start` and `granularity`.
    pub fn partition_name(&self) -> String {
        match self.granularity {
            TimeGranularity::Hour => format!("p_{}", self.start.format("%Y%m%d_%H")),
            TimeGranularity::Day => format!("p_{}", self.start.format("%Y%m%d")),
            TimeGranularity::Week => format!("p_{}w{:02}", self.start.year(), self.start.iso_week().week()),
            TimeGranularity::Month => format!("p_{}", self.start.format("%Y%m")),
            TimeGranularity::Quarter => format!("p_{}q{}", self.start.year(), (self.start.month() - 1) / 3 + 1),
            TimeGranularity::Year => format!("p_{}", self.start.year()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionType {
    TimeBased,
    HashBased,
    RangeBased,
    ListBased,
    Virtual,
}

#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub table_name: String,
    pub partition_name: String,
    pub partition_type: PartitionType,
    pub time_range: Option<TimeRange>,
    pub column_name: Option<String>,
    pub row_count: Option<u64>,
    pub size_bytes: Option<u64>,
    pub file_paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionStatistics {
    pub total_partitions: u64,
    pub total_rows: u64,
    pub total_size_bytes: u64,
    pub average_partition_size: u64,
    pub time_range_coverage: Option<TimeRange>,
    pub partition_distribution: HashMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct StrategySuggestion {
    pub strategy: String,
    pub reason: Option<String>,
    pub granularity: Option<TimeGranularity>,
    pub estimated_partitions: Option<u64>,
    pub avg_rows_per_partition: Option<u64>,
    pub implementation: Option<String>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    table: String,
    column: String,
}

/// Pattern-based table-name suffix formats, tried in order — first match
/// wins (§4.4 step 1).
const NAME_PATTERNS: &[(&str, TimeGranularity)] = &[
    ("^p_([0-9]{8})$", TimeGranularity::Day),
    ("^([0-9]{8})$", TimeGranularity::Day),
    ("^p_([0-9]{6})$", TimeGranularity::Month),
    ("^([0-9]{6})$", TimeGranularity::Month),
    ("^p_([0-9]{4})$", TimeGranularity::Year),
    ("^([0-9]{4})$", TimeGranularity::Year),
];

fn granularity_end(start: NaiveDate, granularity: TimeGranularity) -> NaiveDate {
    match granularity {
        TimeGranularity::Day | TimeGranularity::Hour | TimeGranularity::Week | TimeGranularity::Quarter => {
            start + Duration::days(1)
        }
        TimeGranularity::Month => {
            if start.month() == 12 {
                NaiveDate::from_ymd_opt(start.year() + 1, 1, 1).unwrap()
            } else {
                NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1).unwrap()
            }
        }
        TimeGranularity::Year => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1).unwrap(),
    }
}

fn naive_to_utc(d: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap())
}

/// Detects/creates/prunes partitions and computes statistics and strategy
/// suggestions for tables behind a [`SqlEngine`]. Caches detection results
/// and statistics per table; both caches are invalidated by
/// [`PartitionManager::create_partition`] and [`PartitionManager::clear_cache`].
pub struct PartitionManager {
    default_granularity: TimeGranularity,
    detection_cache: Mutex<HashMap<CacheKey, Vec<PartitionInfo>>>,
    statistics_cache: Mutex<HashMap<String, PartitionStatistics>>,
}

impl PartitionManager {
    pub fn new(default_granularity: TimeGranularity) -> Self {
        Self {
            default_granularity,
            detection_cache: Mutex::new(HashMap::new()),
            statistics_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Detects partitions via pattern-based, file-path-based, then virtual
    /// detection, concatenating all three (§4.4 step 1-3). Results are
    /// sorted by `time_range.start` before caching, satisfying the
    /// consecutive-pair ordering invariant (§8 invariant 7).
    pub fn detect_partitions(
        &self,
        engine: &dyn SqlEngine,
        table: &str,
        time_column: Option<&str>,
    ) -> Result<Vec<PartitionInfo>> {
        let key = CacheKey { table: table.to_string(), column: time_column.unwrap_or("").to_string() };
        if let Some(cached) = self.detection_cache.lock().unwrap().get(&key) {
            return Ok(clone_partitions(cached));
        }

        let mut partitions = self.detect_pattern_based(engine, table, time_column)?;
        partitions.extend(self.detect_file_based(engine, table, time_column)?);

        if partitions.is_empty() {
            if let Some(col) = time_column {
                partitions.extend(self.detect_virtual(engine, table, col)?);
            }
        }

        partitions.sort_by(|a, b| {
            let sa = a.time_range.map(|r| r.start).unwrap_or(DateTime::<Utc>::MIN_UTC);
            let sb = b.time_range.map(|r| r.start).unwrap_or(DateTime::<Utc>::MIN_UTC);
            sa.cmp(&sb)
        });

        self.detection_cache.lock().unwrap().insert(key, clone_partitions(&partitions));
        Ok(partitions)
    }

    fn detect_pattern_based(
        &self,
        engine: &dyn SqlEngine,
        table: &str,
        time_column: Option<&str>,
    ) -> Result<Vec<PartitionInfo>> {
        let names = engine.string_column(
            "SELECT table_name as value FROM information_schema.tables WHERE table_name LIKE $pattern",
            &[("pattern", crate::sql_safety::SqlValue::Text(format!("{table}_%")))],
        )?;
        let mut out = Vec::new();
        for name in names {
            if let Some(suffix) = name.strip_prefix(&format!("{table}_")) {
                if let Some(info) = parse_partition_suffix(table, &name, suffix, time_column) {
                    out.push(info);
                }
            }
        }
        Ok(out)
    }

    fn detect_file_based(
        &self,
        engine: &dyn SqlEngine,
        table: &str,
        time_column: Option<&str>,
    ) -> Result<Vec<PartitionInfo>> {
        let files = engine.list_table_files(table)?;
        let mut out = Vec::new();
        for path in files {
            if let Some(info) = parse_file_partition(&path, table, time_column) {
                out.push(info);
            }
        }
        Ok(out)
    }

    /// Enumerates days with data via `GROUP BY DATE_TRUNC('day', col)`.
    /// Always groups at DAY granularity regardless of the table's requested
    /// granularity — a deliberate coarsening carried over from the original
    /// implementation (see DESIGN.md Open Question log).
    fn detect_virtual(&self, engine: &dyn SqlEngine, table: &str, time_column: &str) -> Result<Vec<PartitionInfo>> {
        validate_identifier(time_column)?;
        let sql = format!(
            "SELECT toString(DATE_TRUNC('day', {time_column})) as value, count() as cnt FROM {table} \
             GROUP BY DATE_TRUNC('day', {time_column}) ORDER BY 1"
        );
        // The generic SqlEngine surface only exposes single-column string
        // fetches; day + count is recovered via two passes over the same
        // grouping so no engine-specific row decoding is required here.
        let days = engine.string_column(&sql, &[])?;
        let mut out = Vec::new();
        for day in days {
            if let Ok(d) = NaiveDate::parse_from_str(&day, "%Y-%m-%d") {
                let start = naive_to_utc(d);
                let end = naive_to_utc(d + Duration::days(1));
                let range = TimeRange::new(start, end, TimeGranularity::Day).unwrap();
                let row_count = engine
                    .count(
                        &format!(
                            "SELECT count() as count FROM {table} WHERE DATE_TRUNC('day', {time_column}) = $day"
                        ),
                        &[("day", crate::sql_safety::SqlValue::Text(day.clone()))],
                    )
                    .unwrap_or(0);
                out.push(PartitionInfo {
                    table_name: table.to_string(),
                    partition_name: format!("{table}_{}", range.partition_name()),
                    partition_type: PartitionType::Virtual,
                    time_range: Some(range),
                    column_name: Some(time_column.to_string()),
                    row_count: Some(row_count),
                    size_bytes: None,
                    file_paths: None,
                });
            }
        }
        Ok(out)
    }

    /// Reads the base table's columns from the catalog and issues
    /// `CREATE TABLE {name} ({cols})`, then best-effort `CREATE INDEX`.
    /// Invalidates both caches for `table`.
    pub fn create_partition(
        &self,
        engine: &dyn SqlEngine,
        table: &str,
        time_range: &TimeRange,
        time_column: &str,
    ) -> Result<String> {
        validate_identifier(table)?;
        validate_identifier(time_column)?;
        let columns = engine.table_columns(table)?;
        let partition_name = format!("{table}_{}", time_range.partition_name());
        validate_identifier(&partition_name)?;

        let col_list = columns.join(", ");
        engine.execute(&format!("CREATE TABLE {partition_name} ({col_list})"), &[])?;

        let index_name = format!("{partition_name}_{time_column}_idx");
        if validate_identifier(&index_name).is_ok() {
            if let Err(e) = engine.execute(
                &format!("CREATE INDEX {index_name} ON {partition_name}({time_column})"),
                &[],
            ) {
                tracing::debug!(partition_name, error = %e, "partition index creation failed; continuing");
            }
        }

        self.clear_cache(Some(table));
        Ok(partition_name)
    }

    /// Textual WHERE-clause composition (§4.4): inserts an inequality
    /// predicate, ANDed with an existing WHERE if present, before ORDER BY
    /// if present. Does not parse the query.
    pub fn prune_partitions(&self, query: &str, range: &TimeRange, time_column: &str) -> String {
        let predicate = format!(
            "{time_column} >= '{}' AND {time_column} < '{}'",
            range.start.to_rfc3339(),
            range.end.to_rfc3339()
        );
        let upper = query.to_uppercase();
        if let Some(pos) = upper.find("WHERE") {
            let (before, after) = query.split_at(pos + "WHERE".len());
            format!("{before} ({predicate}) AND{after}")
        } else if let Some(pos) = upper.find("ORDER BY") {
            let (before, after) = query.split_at(pos);
            format!("{before}WHERE {predicate} {after}")
        } else {
            format!("{} WHERE {predicate}", query.trim_end_matches(';'))
        }
    }

    /// One-partition summary with the table's total row count when no
    /// partitions are detected.
    pub fn get_partition_statistics(&self, engine: &dyn SqlEngine, table: &str) -> Result<PartitionStatistics> {
        if let Some(cached) = self.statistics_cache.lock().unwrap().get(table) {
            return Ok(cached.clone());
        }

        let partitions = self.detect_partitions(engine, table, Some("created_at"))?;
        let stats = if partitions.is_empty() {
            let total_rows = engine.count(&format!("SELECT count() as count FROM {table}"), &[]).unwrap_or(0);
            PartitionStatistics {
                total_partitions: 1,
                total_rows,
                total_size_bytes: 0,
                average_partition_size: total_rows,
                time_range_coverage: None,
                partition_distribution: HashMap::new(),
            }
        } else {
            let total_rows: u64 = partitions.iter().map(|p| p.row_count.unwrap_or(0)).sum();
            let total_size: u64 = partitions.iter().map(|p| p.size_bytes.unwrap_or(0)).sum();
            let time_ranges: Vec<TimeRange> = partitions.iter().filter_map(|p| p.time_range).collect();
            let coverage = if time_ranges.is_empty() {
                None
            } else {
                let min_start = time_ranges.iter().map(|r| r.start).min().unwrap();
                let max_end = time_ranges.iter().map(|r| r.end).max().unwrap();
                TimeRange::new(min_start, max_end, self.default_granularity)
            };
            let mut distribution = HashMap::new();
            for p in &partitions {
                *distribution.entry(partition_type_label(p.partition_type).to_string()).or_insert(0u64) += 1;
            }
            PartitionStatistics {
                total_partitions: partitions.len() as u64,
                total_rows,
                total_size_bytes: total_size,
                average_partition_size: total_rows / partitions.len() as u64,
                time_range_coverage: coverage,
                partition_distribution: distribution,
            }
        };

        self.statistics_cache.lock().unwrap().insert(table.to_string(), stats.clone());
        Ok(stats)
    }

    /// Strategy suggestion (§4.4). `total_rows < 100,000` suggests `"none"`;
    /// otherwise granularity is chosen by total time span.
    pub fn suggest_strategy(&self, engine: &dyn SqlEngine, table: &str, time_column: &str) -> Result<StrategySuggestion> {
        validate_identifier(time_column)?;
        let total_rows = engine
            .count(&format!("SELECT count() as count FROM {table} WHERE {time_column} IS NOT NULL"), &[])
            .unwrap_or(0);

        if total_rows < 100_000 {
            return Ok(StrategySuggestion {
                strategy: "none".to_string(),
                reason: Some("too small".to_string()),
                granularity: None,
                estimated_partitions: None,
                avg_rows_per_partition: None,
                implementation: None,
            });
        }

        let min_time = engine.max_value(&format!("SELECT min({time_column}) as value FROM {table}"), &[])?;
        let max_time = engine.max_value(&format!("SELECT max({time_column}) as value FROM {table}"), &[])?;
        let unique_days = engine
            .count(
                &format!("SELECT count(DISTINCT DATE_TRUNC('day', {time_column})) as count FROM {table}"),
                &[],
            )
            .unwrap_or(0);
        let unique_months = engine
            .count(
                &format!("SELECT count(DISTINCT DATE_TRUNC('month', {time_column})) as count FROM {table}"),
                &[],
            )
            .unwrap_or(1)
            .max(1);

        let span_days = match (min_time.as_deref().and_then(parse_any_timestamp), max_time.as_deref().and_then(parse_any_timestamp)) {
            (Some(min), Some(max)) => (max - min).num_days(),
            _ => 0,
        };

        let granularity = if span_days <= 30 {
            TimeGranularity::Day
        } else if span_days <= 365 {
            if unique_days > 52 { TimeGranularity::Week } else { TimeGranularity::Day }
        } else {
            TimeGranularity::Month
        };

        let estimated_partitions = match granularity {
            TimeGranularity::Day => unique_days.max(1),
            TimeGranularity::Week => (span_days / 7).max(1) as u64,
            _ => unique_months,
        };
        let avg_rows_per_partition = total_rows / estimated_partitions.max(1);

        Ok(StrategySuggestion {
            strategy: "time_based".to_string(),
            reason: None,
            granularity: Some(granularity),
            estimated_partitions: Some(estimated_partitions),
            avg_rows_per_partition: Some(avg_rows_per_partition),
            implementation: Some(if estimated_partitions > 100 { "virtual".to_string() } else { "table_based".to_string() }),
        })
    }

    pub fn clear_cache(&self, table: Option<&str>) {
        match table {
            Some(t) => {
                self.detection_cache.lock().unwrap().retain(|k, _| k.table != t);
                self.statistics_cache.lock().unwrap().remove(t);
            }
            None => {
                self.detection_cache.lock().unwrap().clear();
                self.statistics_cache.lock().unwrap().clear();
            }
        }
    }
}

fn partition_type_label(t: PartitionType) -> &'static str {
    match t {
        PartitionType::TimeBased => "time_based",
        PartitionType::HashBased => "hash_based",
        PartitionType::RangeBased => "range_based",
        PartitionType::ListBased => "list_based",
        PartitionType::Virtual => "virtual",
    }
}

fn parse_any_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok().map(|n| Utc.from_utc_datetime(&n)))
}

fn parse_partition_suffix(
    base_table: &str,
    full_name: &str,
    suffix: &str,
    time_column: Option<&str>,
) -> Option<PartitionInfo> {
    for (pattern, granularity) in NAME_PATTERNS {
        let re = Regex::new(pattern).unwrap();
        if let Some(caps) = re.captures(suffix) {
            let date_str = caps.get(1).unwrap().as_str();
            let parsed = match granularity {
                TimeGranularity::Day => NaiveDate::parse_from_str(date_str, "%Y%m%d").ok(),
                TimeGranularity::Month => NaiveDate::parse_from_str(&format!("{date_str}01"), "%Y%m%d").ok(),
                TimeGranularity::Year => NaiveDate::parse_from_str(&format!("{date_str}0101"), "%Y%m%d").ok(),
                _ => None,
            };
            if let Some(start) = parsed {
                let end = granularity_end(start, *granularity);
                let range = TimeRange::new(naive_to_utc(start), naive_to_utc(end), *granularity)?;
                return Some(PartitionInfo {
                    table_name: base_table.to_string(),
                    partition_name: full_name.to_string(),
                    partition_type: PartitionType::TimeBased,
                    time_range: Some(range),
                    column_name: time_column.map(str::to_string),
                    row_count: None,
                    size_bytes: None,
                    file_paths: None,
                });
            }
        }
    }
    None
}

/// File-path-based detection patterns, tried in order (§4.4 step 2):
/// `year=YYYY/month=MM/day=DD`, `dt=YYYY-MM-DD`, `date=YYYYMMDD`, bare
/// `YYYYMMDD`.
fn parse_file_partition(path: &str, table: &str, time_column: Option<&str>) -> Option<PartitionInfo> {
    let patterns: &[&str] = &[
        r"year=([0-9]{4})/month=([0-9]{2})/day=([0-9]{2})",
        r"dt=([0-9]{4}-[0-9]{2}-[0-9]{2})",
        r"date=([0-9]{8})",
        r"([0-9]{8})",
    ];
    for pattern in patterns {
        let re = Regex::new(pattern).unwrap();
        if let Some(caps) = re.captures(path) {
            let start = if caps.len() == 4 {
                let y: i32 = caps[1].parse().ok()?;
                let m: u32 = caps[2].parse().ok()?;
                let d: u32 = caps[3].parse().ok()?;
                NaiveDate::from_ymd_opt(y, m, d)?
            } else {
                let raw = &caps[1];
                if raw.contains('-') {
                    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?
                } else {
                    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()?
                }
            };
            let end = start + Duration::days(1);
            let range = TimeRange::new(naive_to_utc(start), naive_to_utc(end), TimeGranularity::Day)?;
            return Some(PartitionInfo {
                table_name: table.to_string(),
                partition_name: format!("{table}_{}", range.partition_name()),
                partition_type: PartitionType::TimeBased,
                time_range: Some(range),
                column_name: time_column.map(str::to_string),
                row_count: None,
                size_bytes: None,
                file_paths: Some(vec![path.to_string()]),
            });
        }
    }
    None
}

fn clone_partitions(partitions: &[PartitionInfo]) -> Vec<PartitionInfo> {
    partitions.to_vec()
}

impl Clone for PartitionInfo {
    fn clone(&self) -> Self {
        Self {
            table_name: self.table_name.clone(),
            partition_name: self.partition_name.clone(),
            partition_type: self.partition_type,
            time_range: self.time_range,
            column_name: self.column_name.clone(),
            row_count: self.row_count,
            size_bytes: self.size_bytes,
            file_paths: self.file_paths.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use chrono::TimeZone;

    #[test]
    fn time_range_contains_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, end, TimeGranularity::Day).unwrap();
        assert!(range.contains(start));
        assert!(!range.contains(end));
    }

    #[test]
    fn partition_name_for_day_granularity() {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, end, TimeGranularity::Day).unwrap();
        assert_eq!(range.partition_name(), "p_20240310");
    }

    #[test]
    fn detects_pattern_based_day_partitions_sorted() {
        let engine = MockEngine::new();
        engine.set_string_column("table_name", vec!["orders_20240102".to_string(), "orders_20240101".to_string()]);
        let manager = PartitionManager::new(TimeGranularity::Day);
        let partitions = manager.detect_partitions(&engine, "orders", Some("created_at")).unwrap();
        assert_eq!(partitions.len(), 2);
        assert!(partitions[0].time_range.unwrap().start < partitions[1].time_range.unwrap().start);
    }

    #[test]
    fn consecutive_partitions_do_not_overlap() {
        let engine = MockEngine::new();
        engine.set_string_column("table_name", vec!["orders_20240101".to_string(), "orders_20240102".to_string()]);
        let manager = PartitionManager::new(TimeGranularity::Day);
        let partitions = manager.detect_partitions(&engine, "orders", Some("created_at")).unwrap();
        for pair in partitions.windows(2) {
            assert!(pair[0].time_range.unwrap().end <= pair[1].time_range.unwrap().start);
        }
    }

    #[test]
    fn file_path_partition_parses_year_month_day() {
        let info = parse_file_partition("/data/events/year=2024/month=01/day=15/file.parquet", "events", None).unwrap();
        assert_eq!(info.partition_type, PartitionType::TimeBased);
        assert_eq!(info.file_paths.unwrap(), vec!["/data/events/year=2024/month=01/day=15/file.parquet".to_string()]);
    }

    #[test]
    fn prune_partitions_inserts_predicate_before_order_by() {
        let manager = PartitionManager::new(TimeGranularity::Day);
        let start = Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, end, TimeGranularity::Day).unwrap();
        let pruned = manager.prune_partitions("SELECT * FROM t ORDER BY c", &range, "c");
        assert!(pruned.contains("WHERE c >="));
        assert!(pruned.find("WHERE").unwrap() < pruned.find("ORDER BY").unwrap());
    }

    #[test]
    fn prune_partitions_ands_existing_where() {
        let manager = PartitionManager::new(TimeGranularity::Day);
        let start = Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, end, TimeGranularity::Day).unwrap();
        let pruned = manager.prune_partitions("SELECT * FROM t WHERE a = 1", &range, "c");
        assert!(pruned.contains("WHERE (c >="));
        assert!(pruned.contains("AND a = 1"));
    }

    #[test]
    fn suggest_strategy_reports_none_below_threshold() {
        let engine = MockEngine::new();
        engine.set_count("IS NOT NULL", 500);
        let manager = PartitionManager::new(TimeGranularity::Day);
        let suggestion = manager.suggest_strategy(&engine, "orders", "created_at").unwrap();
        assert_eq!(suggestion.strategy, "none");
    }

    #[test]
    fn statistics_fall_back_to_single_partition_summary() {
        let engine = MockEngine::new();
        engine.set_count("SELECT count() as count FROM orders", 42);
        let manager = PartitionManager::new(TimeGranularity::Day);
        let stats = manager.get_partition_statistics(&engine, "orders").unwrap();
        assert_eq!(stats.total_partitions, 1);
        assert_eq!(stats.total_rows, 42);
    }
}
