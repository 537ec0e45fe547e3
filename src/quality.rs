//! Data quality rule engine (§4.10). Grounded in
//! `original_source/.../transform/data_quality.py`'s `DataQualityValidator`:
//! built-in rule set plus a user-rule registry, scored by severity weight
//! into a per-table [`QualityProfile`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::engine::SqlEngine;
use crate::error::Result;
use crate::sql_safety::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ValidationSeverity {
    /// Scoring weight (§4.10): INFO 0.1, WARNING 0.5, ERROR 1.0, CRITICAL 2.0.
    fn weight(self) -> f64 {
        match self {
            ValidationSeverity::Info => 0.1,
            ValidationSeverity::Warning => 0.5,
            ValidationSeverity::Error => 1.0,
            ValidationSeverity::Critical => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCategory {
    Completeness,
    Accuracy,
    Consistency,
    Freshness,
    Uniqueness,
    Validity,
    BusinessRules,
}

/// A rule's check logic: either a SQL template aliasing its measured
/// quantity as `value` (violation when `value > threshold`, default
/// threshold 0) or a native predicate over the engine.
pub enum RuleCheck {
    Sql(String),
    Predicate(Box<dyn Fn(&dyn SqlEngine, &str) -> Result<bool> + Send + Sync>),
}

pub struct ValidationRule {
    pub name: String,
    pub category: ValidationCategory,
    pub severity: ValidationSeverity,
    pub description: String,
    pub check: RuleCheck,
    pub threshold: Option<f64>,
    pub column: Option<String>,
    pub key_columns: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub rule_name: String,
    pub category: ValidationCategory,
    pub severity: ValidationSeverity,
    pub passed: bool,
    pub message: String,
    pub value: Option<f64>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct QualityProfile {
    pub table_name: String,
    pub profile_date: DateTime<Utc>,
    pub row_count: u64,
    pub validation_results: Vec<ValidationResult>,
    pub overall_score: f64,
}

impl QualityProfile {
    pub fn critical_issues(&self) -> Vec<&ValidationResult> {
        self.validation_results.iter().filter(|r| r.severity == ValidationSeverity::Critical && !r.passed).collect()
    }

    pub fn error_issues(&self) -> Vec<&ValidationResult> {
        self.validation_results.iter().filter(|r| r.severity == ValidationSeverity::Error && !r.passed).collect()
    }
}

fn null_check_rule(column: &str) -> ValidationRule {
    ValidationRule {
        name: "null_check".to_string(),
        category: ValidationCategory::Completeness,
        severity: ValidationSeverity::Warning,
        description: "checks for excessive null values".to_string(),
        check: RuleCheck::Sql(
            "-- rule:null_check\nSELECT CAST((SUM(CASE WHEN {column} IS NULL THEN 1 ELSE 0 END) * 100.0 / NULLIF(COUNT(*), 0)) AS VARCHAR) AS value FROM {table}"
                .to_string(),
        ),
        threshold: Some(10.0),
        column: Some(column.to_string()),
        key_columns: Vec::new(),
        enabled: true,
    }
}

fn duplicate_check_rule(key_columns: &[String]) -> ValidationRule {
    ValidationRule {
        name: "duplicate_check".to_string(),
        category: ValidationCategory::Uniqueness,
        severity: ValidationSeverity::Error,
        description: "checks for duplicate key values".to_string(),
        check: RuleCheck::Sql(
            "-- rule:duplicate_check\nSELECT CAST((COUNT(*) - COUNT(DISTINCT {key_columns})) AS VARCHAR) AS value FROM {table}".to_string(),
        ),
        threshold: Some(0.0),
        column: None,
        key_columns: key_columns.to_vec(),
        enabled: true,
    }
}

fn freshness_rule(time_column: &str) -> ValidationRule {
    ValidationRule {
        name: "data_freshness".to_string(),
        category: ValidationCategory::Freshness,
        severity: ValidationSeverity::Warning,
        description: "checks data is not stale".to_string(),
        check: RuleCheck::Sql(
            "-- rule:data_freshness\nSELECT CAST((EXTRACT(EPOCH FROM (CURRENT_TIMESTAMP - MAX({column}))) / 3600) AS VARCHAR) AS value FROM {table}"
                .to_string(),
        ),
        threshold: Some(24.0),
        column: Some(time_column.to_string()),
        key_columns: Vec::new(),
        enabled: true,
    }
}

fn negative_values_rule(column: &str) -> ValidationRule {
    ValidationRule {
        name: "negative_values".to_string(),
        category: ValidationCategory::Validity,
        severity: ValidationSeverity::Error,
        description: "checks for unexpected negative values".to_string(),
        check: RuleCheck::Sql(
            "-- rule:negative_values\nSELECT CAST(COUNT(*) AS VARCHAR) AS value FROM {table} WHERE {column} < 0".to_string(),
        ),
        threshold: Some(0.0),
        column: Some(column.to_string()),
        key_columns: Vec::new(),
        enabled: true,
    }
}

fn referential_integrity_rule(foreign_key: &str, reference_table: &str, primary_key: &str) -> ValidationRule {
    ValidationRule {
        name: "referential_integrity".to_string(),
        category: ValidationCategory::BusinessRules,
        severity: ValidationSeverity::Error,
        description: "checks foreign-key references resolve".to_string(),
        check: RuleCheck::Sql(format!(
            "-- rule:referential_integrity\nSELECT CAST(COUNT(*) AS VARCHAR) AS value FROM {{table}} t LEFT JOIN {reference_table} r ON t.{foreign_key} = r.{primary_key} WHERE t.{foreign_key} IS NOT NULL AND r.{primary_key} IS NULL"
        )),
        threshold: Some(0.0),
        column: None,
        key_columns: Vec::new(),
        enabled: true,
    }
}

fn render_template(template: &str, table: &str, rule: &ValidationRule) -> String {
    let mut sql = template.replace("{table}", table);
    if let Some(column) = &rule.column {
        sql = sql.replace("{column}", column);
    }
    if !rule.key_columns.is_empty() {
        sql = sql.replace("{key_columns}", &rule.key_columns.join(", "));
    }
    sql
}

/// Runs built-in and user-registered rules against a live engine and
/// produces per-table [`QualityProfile`]s, caching the most recent one.
pub struct DataQualityValidator {
    custom_rules: Mutex<Vec<ValidationRule>>,
    profile_cache: Mutex<HashMap<String, QualityProfile>>,
}

impl Default for DataQualityValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters steering which built-in rules run for a table (§4.10); every
/// field is optional because the built-ins only apply when the orchestrator
/// (C11) knows the relevant column.
#[derive(Default)]
pub struct ValidationScope<'a> {
    pub watched_column: Option<&'a str>,
    pub key_columns: &'a [String],
    pub time_column: Option<&'a str>,
    pub foreign_key: Option<(&'a str, &'a str, &'a str)>,
}

impl DataQualityValidator {
    pub fn new() -> Self {
        Self { custom_rules: Mutex::new(Vec::new()), profile_cache: Mutex::new(HashMap::new()) }
    }

    pub fn add_custom_rule(&self, rule: ValidationRule) {
        let mut rules = self.custom_rules.lock().unwrap();
        rules.retain(|r| r.name != rule.name);
        rules.push(rule);
    }

    pub fn remove_custom_rule(&self, rule_name: &str) {
        self.custom_rules.lock().unwrap().retain(|r| r.name != rule_name);
    }

    /// Validates `table` against the built-in rule set parameterized by
    /// `scope`, plus any registered custom rules.
    pub fn validate_table(&self, engine: &dyn SqlEngine, table_name: &str, scope: &ValidationScope<'_>) -> Result<QualityProfile> {
        let mut rules = Vec::new();
        if let Some(column) = scope.watched_column {
            rules.push(null_check_rule(column));
            rules.push(negative_values_rule(column));
        }
        if !scope.key_columns.is_empty() {
            rules.push(duplicate_check_rule(scope.key_columns));
        }
        if let Some(time_column) = scope.time_column {
            rules.push(freshness_rule(time_column));
        }
        if let Some((fk, reference_table, pk)) = scope.foreign_key {
            rules.push(referential_integrity_rule(fk, reference_table, pk));
        }

        let row_count = engine.count(&format!("SELECT count() as count FROM {table_name}"), &[])?;

        let mut validation_results: Vec<ValidationResult> =
            rules.iter().filter(|r| r.enabled).map(|rule| execute_rule(engine, table_name, rule)).collect();

        for rule in self.custom_rules.lock().unwrap().iter().filter(|r| r.enabled) {
            validation_results.push(execute_rule(engine, table_name, rule));
        }

        let overall_score = score_results(&validation_results);

        let profile = QualityProfile {
            table_name: table_name.to_string(),
            profile_date: Utc::now(),
            row_count,
            validation_results,
            overall_score,
        };

        self.profile_cache.lock().unwrap().insert(table_name.to_string(), profile.clone());
        Ok(profile)
    }

    pub fn cached_profile(&self, table_name: &str) -> Option<QualityProfile> {
        self.profile_cache.lock().unwrap().get(table_name).cloned()
    }
}

fn execute_rule(engine: &dyn SqlEngine, table_name: &str, rule: &ValidationRule) -> ValidationResult {
    let start = Instant::now();
    let (passed, value, message) = match &rule.check {
        RuleCheck::Sql(template) => {
            let sql = render_template(template, table_name, rule);
            match engine.max_value(&sql, &[("table", SqlValue::Text(table_name.to_string()))]) {
                Ok(Some(raw)) => match raw.parse::<f64>() {
                    Ok(value) => {
                        let threshold = rule.threshold.unwrap_or(0.0);
                        let passed = value <= threshold;
                        let message = if passed {
                            format!("{} passed", rule.name)
                        } else {
                            format!("{} failed: observed {value} exceeds threshold {threshold}", rule.name)
                        };
                        (passed, Some(value), message)
                    }
                    Err(_) => (false, None, format!("{} returned a non-numeric result", rule.name)),
                },
                Ok(None) => (true, None, format!("{} passed - no rows", rule.name)),
                Err(err) => (false, None, format!("{} execution failed: {err}", rule.name)),
            }
        }
        RuleCheck::Predicate(predicate) => match predicate(engine, table_name) {
            Ok(passed) => (passed, None, format!("{} {}", rule.name, if passed { "passed" } else { "failed" })),
            Err(err) => (false, None, format!("{} execution failed: {err}", rule.name)),
        },
    };

    ValidationResult {
        rule_name: rule.name.clone(),
        category: rule.category,
        severity: rule.severity,
        passed,
        message,
        value,
        execution_time_ms: start.elapsed().as_millis() as u64,
    }
}

/// §4.10: weights failed rules by severity, normalized to `[0, 1]` by the
/// total possible weight across executed rules; an empty rule set scores 1.0.
fn score_results(results: &[ValidationResult]) -> f64 {
    if results.is_empty() {
        return 1.0;
    }
    let total_weight: f64 = results.iter().map(|r| r.severity.weight()).sum();
    let failed_weight: f64 = results.iter().filter(|r| !r.passed).map(|r| r.severity.weight()).sum();
    if total_weight == 0.0 {
        1.0
    } else {
        (1.0 - failed_weight / total_weight).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    #[test]
    fn clean_table_scores_one() {
        let engine = MockEngine::new();
        engine.set_max_value("rule:null_check", Some("0".to_string()));
        engine.set_max_value("rule:negative_values", Some("0".to_string()));
        engine.set_count("count", 100);
        let validator = DataQualityValidator::new();
        let scope = ValidationScope { watched_column: Some("amount"), ..Default::default() };
        let profile = validator.validate_table(&engine, "orders", &scope).unwrap();
        assert_eq!(profile.overall_score, 1.0);
        assert!(profile.critical_issues().is_empty());
    }

    #[test]
    fn breached_error_rule_lowers_score() {
        let engine = MockEngine::new();
        engine.set_max_value("rule:negative_values", Some("5".to_string()));
        engine.set_max_value("rule:null_check", Some("0".to_string()));
        engine.set_count("count", 100);
        let validator = DataQualityValidator::new();
        let scope = ValidationScope { watched_column: Some("amount"), ..Default::default() };
        let profile = validator.validate_table(&engine, "orders", &scope).unwrap();
        assert!(profile.overall_score < 1.0);
        assert_eq!(profile.error_issues().len(), 1);
    }

    #[test]
    fn custom_rule_participates_in_scoring() {
        let engine = MockEngine::new();
        engine.set_count("count", 10);
        let validator = DataQualityValidator::new();
        validator.add_custom_rule(ValidationRule {
            name: "always_fail".to_string(),
            category: ValidationCategory::BusinessRules,
            severity: ValidationSeverity::Critical,
            description: "test rule".to_string(),
            check: RuleCheck::Predicate(Box::new(|_engine, _table| Ok(false))),
            threshold: None,
            column: None,
            key_columns: Vec::new(),
            enabled: true,
        });
        let profile = validator.validate_table(&engine, "orders", &ValidationScope::default()).unwrap();
        assert!(profile.validation_results.iter().any(|r| r.rule_name == "always_fail" && !r.passed));
    }
}
