//! SQL identifier validation, dialect-aware quoting, and parameterized
//! query assembly. Nothing downstream of this module should interpolate a
//! dynamic identifier or value into SQL text without going through it.

use std::fmt;

use crate::error::{Result, TransformError};

/// Forbidden substrings, checked case-insensitively against the raw
/// identifier text (not just the keyword list below).
const FORBIDDEN_SUBSTRINGS: &[&str] = &[";", "--", "/*", "*/", "'", "\"", "\\", "(", ")"];

/// Identifiers that are exactly (case-insensitively) one of these are
/// rejected outright, regardless of otherwise matching the identifier
/// pattern.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "COMMIT", "ROLLBACK", "EXEC", "EXECUTE",
];

/// Dangerous system-procedure prefixes, checked as substrings.
const FORBIDDEN_PREFIXES: &[&str] = &["xp_", "sp_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Generic,
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    fn quote_char(self) -> (char, char) {
        match self {
            Dialect::MySql => ('`', '`'),
            Dialect::Generic | Dialect::Postgres | Dialect::Sqlite => ('"', '"'),
        }
    }
}

/// Returns `Ok(())` iff `identifier` satisfies the full validation contract:
/// matches `[A-Za-z_][A-Za-z0-9_]*`, contains none of the forbidden
/// substrings, is not (case-insensitively) a forbidden keyword, and does not
/// contain `xp_`/`sp_`.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(TransformError::Identifier {
            identifier: identifier.to_string(),
            reason: "identifier is empty".into(),
        });
    }

    let mut chars = identifier.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(TransformError::Identifier {
            identifier: identifier.to_string(),
            reason: "must start with a letter or underscore".into(),
        });
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(TransformError::Identifier {
            identifier: identifier.to_string(),
            reason: "contains characters outside [A-Za-z0-9_]".into(),
        });
    }

    let upper = identifier.to_uppercase();
    for forbidden in FORBIDDEN_SUBSTRINGS {
        if identifier.contains(forbidden) {
            return Err(TransformError::Identifier {
                identifier: identifier.to_string(),
                reason: format!("contains forbidden substring `{forbidden}`"),
            });
        }
    }
    for prefix in FORBIDDEN_PREFIXES {
        if upper.contains(&prefix.to_uppercase()) {
            return Err(TransformError::Identifier {
                identifier: identifier.to_string(),
                reason: format!("contains forbidden prefix `{prefix}`"),
            });
        }
    }
    if FORBIDDEN_KEYWORDS.iter().any(|kw| upper == *kw) {
        return Err(TransformError::Identifier {
            identifier: identifier.to_string(),
            reason: format!("`{identifier}` is a reserved/dangerous keyword"),
        });
    }

    Ok(())
}

pub fn is_valid_identifier(identifier: &str) -> bool {
    validate_identifier(identifier).is_ok()
}

/// Safe SQL formatter: validates before quoting, never interpolates values.
#[derive(Debug, Clone, Copy)]
pub struct SqlFormatter {
    dialect: Dialect,
}

impl SqlFormatter {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn quote_identifier(&self, identifier: &str) -> Result<String> {
        validate_identifier(identifier)?;
        let (open, close) = self.dialect.quote_char();
        Ok(format!("{open}{identifier}{close}"))
    }

    pub fn quote_schema_table(&self, table: &str, schema: Option<&str>) -> Result<String> {
        let quoted_table = self.quote_identifier(table)?;
        match schema {
            Some(schema) => {
                let quoted_schema = self.quote_identifier(schema)?;
                Ok(format!("{quoted_schema}.{quoted_table}"))
            }
            None => Ok(quoted_table),
        }
    }

    pub fn format_column_list(&self, columns: &[String]) -> Result<String> {
        if columns.is_empty() {
            return Ok("*".to_string());
        }
        let quoted: Result<Vec<String>> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        Ok(quoted?.join(", "))
    }
}

/// A closed set of comparison operators accepted by WHERE-condition builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Like,
    ILike,
    In,
    NotIn,
    Is,
    IsNot,
}

impl ComparisonOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Lte),
            ">=" => Some(Self::Gte),
            "LIKE" => Some(Self::Like),
            "ILIKE" => Some(Self::ILike),
            "IN" => Some(Self::In),
            "NOT IN" => Some(Self::NotIn),
            "IS" => Some(Self::Is),
            "IS NOT" => Some(Self::IsNot),
            _ => None,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
        };
        write!(f, "{s}")
    }
}

/// A scalar value bound to a placeholder. Never formatted into SQL text
/// directly — always passed alongside the statement to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Accumulates named placeholders (`$name`) and their bound values so a
/// statement and its parameter map travel together.
#[derive(Debug, Default, Clone)]
pub struct ParameterizedQueryBuilder {
    params: Vec<(String, SqlValue)>,
}

impl ParameterizedQueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a placeholder named `$name`, recording `value` under it.
    /// Returns the placeholder text to splice into the SQL fragment.
    pub fn bind(&mut self, name: &str, value: SqlValue) -> String {
        self.params.push((name.to_string(), value));
        format!("${name}")
    }

    pub fn params(&self) -> &[(String, SqlValue)] {
        &self.params
    }

    pub fn into_params(self) -> Vec<(String, SqlValue)> {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(is_valid_identifier("orders"));
        assert!(is_valid_identifier("_internal_table"));
        assert!(is_valid_identifier("col1"));
    }

    #[test]
    fn rejects_injection_punctuation() {
        for bad in ["orders; DROP TABLE x", "a--comment", "a/*c*/", "o'brien", "a(b)"] {
            assert!(!is_valid_identifier(bad), "expected rejection of {bad}");
        }
    }

    #[test]
    fn rejects_bare_keywords() {
        assert!(!is_valid_identifier("DROP"));
        assert!(!is_valid_identifier("delete"));
    }

    #[test]
    fn rejects_system_proc_prefixes() {
        assert!(!is_valid_identifier("xp_cmdshell"));
        assert!(!is_valid_identifier("sp_configure"));
    }

    #[test]
    fn quoting_is_dialect_aware() {
        let pg = SqlFormatter::new(Dialect::Postgres);
        assert_eq!(pg.quote_identifier("orders").unwrap(), "\"orders\"");
        let my = SqlFormatter::new(Dialect::MySql);
        assert_eq!(my.quote_identifier("orders").unwrap(), "`orders`");
    }

    #[test]
    fn quote_rejects_invalid_identifier() {
        let fmt = SqlFormatter::new(Dialect::Generic);
        assert!(fmt.quote_identifier("bad; name").is_err());
    }

    #[test]
    fn parameterized_builder_binds_and_records() {
        let mut b = ParameterizedQueryBuilder::new();
        let ph = b.bind("start_date", SqlValue::Text("2024-03-07".into()));
        assert_eq!(ph, "$start_date");
        assert_eq!(b.params().len(), 1);
    }

    #[test]
    fn comparison_op_parses_closed_set() {
        assert_eq!(ComparisonOp::parse("="), Some(ComparisonOp::Eq));
        assert_eq!(ComparisonOp::parse("NOT IN"), Some(ComparisonOp::NotIn));
        assert_eq!(ComparisonOp::parse("UNION"), None);
    }
}
