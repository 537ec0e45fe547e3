//! The `TransformStep` value produced upstream by the SQL parser (out of
//! scope for this crate) and the write-mode tag it carries.

use crate::error::{Result, TransformError};
use crate::sql_safety::validate_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    Replace,
    Append,
    Merge,
    Incremental,
}

impl WriteMode {
    pub fn parse(mode: &str) -> Option<Self> {
        match mode.to_uppercase().as_str() {
            "REPLACE" => Some(Self::Replace),
            "APPEND" => Some(Self::Append),
            "MERGE" => Some(Self::Merge),
            "INCREMENTAL" => Some(Self::Incremental),
            _ => None,
        }
    }
}

/// Immutable input to the orchestrator (§3). `table_name` and every entry of
/// `merge_keys` must satisfy identifier validation.
#[derive(Debug, Clone)]
pub struct TransformStep {
    pub table_name: String,
    pub sql_query: String,
    pub mode: WriteMode,
    pub merge_keys: Vec<String>,
    pub time_column: Option<String>,
    pub lookback: Option<String>,
}

impl TransformStep {
    pub fn new(table_name: impl Into<String>, sql_query: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            table_name: table_name.into(),
            sql_query: sql_query.into(),
            mode,
            merge_keys: Vec::new(),
            time_column: None,
            lookback: None,
        }
    }

    pub fn with_merge_keys(mut self, keys: Vec<String>) -> Self {
        self.merge_keys = keys;
        self
    }

    pub fn with_time_column(mut self, col: impl Into<String>) -> Self {
        self.time_column = Some(col.into());
        self
    }

    pub fn with_lookback(mut self, lookback: impl Into<String>) -> Self {
        self.lookback = Some(lookback.into());
        self
    }

    /// Validates `table_name` and every `merge_keys` entry (§4.1). Called by
    /// the orchestrator before any SQL is generated.
    ///
    /// Does not reject an empty `merge_keys` on MERGE: that requirement only
    /// applies once the target table exists (§3), which isn't known without
    /// an engine. `write_modes::generate_merge` enforces it at that point.
    pub fn validate_identifiers(&self) -> Result<()> {
        validate_identifier(&self.table_name)?;
        for key in &self.merge_keys {
            validate_identifier(key)?;
        }
        if self.mode == WriteMode::Incremental && self.time_column.is_none() {
            return Err(TransformError::Identifier {
                identifier: self.table_name.clone(),
                reason: "INCREMENTAL mode requires a time_column".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_mode_parses_case_insensitively() {
        assert_eq!(WriteMode::parse("replace"), Some(WriteMode::Replace));
        assert_eq!(WriteMode::parse("INCREMENTAL"), Some(WriteMode::Incremental));
        assert_eq!(WriteMode::parse("bogus"), None);
    }

    #[test]
    fn merge_with_no_keys_passes_identifier_validation() {
        // Whether MERGE requires merge_keys depends on target-table existence
        // (§3), which validate_identifiers can't see; write_modes::generate_merge
        // enforces it once an engine is available.
        let step = TransformStep::new("t", "SELECT 1", WriteMode::Merge);
        assert!(step.validate_identifiers().is_ok());
    }

    #[test]
    fn incremental_requires_time_column() {
        let step = TransformStep::new("t", "SELECT 1", WriteMode::Incremental);
        assert!(step.validate_identifiers().is_err());
        let step = step.with_time_column("created_at");
        assert!(step.validate_identifiers().is_ok());
    }

    #[test]
    fn rejects_invalid_table_name() {
        let step = TransformStep::new("bad; name", "SELECT 1", WriteMode::Replace);
        assert!(step.validate_identifiers().is_err());
    }
}
