//! Error taxonomy for the transform engine, shared by every component.

use std::collections::HashMap;

/// Stable, enum-like error kind carried alongside every [`TransformError`].
///
/// Kept distinct from the variant itself so callers can match on a flat
/// code (e.g. when serializing to a dashboard) without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Identifier,
    TableBusy,
    SchemaValidation,
    MergeKeyValidation,
    Transaction,
    StepExecution,
    StepTimeout,
    Connection,
    DataValidation,
    Security,
}

/// The single error type returned by every fallible operation in this crate.
///
/// One variant per row of the error taxonomy. `context` carries the salient
/// fields named in the policy column; secret-shaped values (see
/// [`crate::observability::logging::is_sensitive_field`]) are elided before
/// being placed in a context map.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("invalid identifier `{identifier}`: {reason}")]
    Identifier { identifier: String, reason: String },

    #[error("table `{table}` is already being transformed by another operation")]
    TableBusy { table: String },

    #[error("schema validation failed for `{table}`: {reason}")]
    SchemaValidation {
        table: String,
        reason: String,
        source_schema: Vec<String>,
        target_schema: Vec<String>,
    },

    #[error("merge key validation failed for `{table}`: {reason}")]
    MergeKeyValidation {
        table: String,
        reason: String,
        keys: Vec<String>,
    },

    #[error("transaction {op} failed for `{table}`: {reason}")]
    Transaction {
        table: String,
        op: &'static str,
        reason: String,
    },

    #[error("step execution failed for `{table}` ({step_type}): {reason}")]
    StepExecution {
        table: String,
        step_type: String,
        statement: String,
        reason: String,
    },

    #[error("step on `{table}` exceeded its {timeout_ms}ms budget")]
    StepTimeout { table: String, timeout_ms: u64 },

    #[error("engine connection error: {reason}")]
    Connection { reason: String },

    #[error("data validation failed for `{table}`: {reason}")]
    DataValidation { table: String, reason: String },

    #[error("security check failed: {reason}")]
    Security { reason: String },
}

impl TransformError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TransformError::Identifier { .. } => ErrorCode::Identifier,
            TransformError::TableBusy { .. } => ErrorCode::TableBusy,
            TransformError::SchemaValidation { .. } => ErrorCode::SchemaValidation,
            TransformError::MergeKeyValidation { .. } => ErrorCode::MergeKeyValidation,
            TransformError::Transaction { .. } => ErrorCode::Transaction,
            TransformError::StepExecution { .. } => ErrorCode::StepExecution,
            TransformError::StepTimeout { .. } => ErrorCode::StepTimeout,
            TransformError::Connection { .. } => ErrorCode::Connection,
            TransformError::DataValidation { .. } => ErrorCode::DataValidation,
            TransformError::Security { .. } => ErrorCode::Security,
        }
    }

    /// Matches the "Recoverable?" column of the error taxonomy table.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            TransformError::TableBusy { .. }
                | TransformError::Transaction { .. }
                | TransformError::StepExecution { .. }
                | TransformError::StepTimeout { .. }
                | TransformError::Connection { .. }
                | TransformError::DataValidation { .. }
        )
    }

    /// Suggested actions surfaced to callers/operators, per error kind.
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            TransformError::Identifier { .. } => {
                vec!["rename the offending identifier", "check for embedded SQL syntax"]
            }
            TransformError::TableBusy { .. } => vec!["retry after the in-flight transform completes"],
            TransformError::SchemaValidation { .. } => {
                vec!["align source and target schemas", "use REPLACE mode if a reset is acceptable"]
            }
            TransformError::MergeKeyValidation { .. } => {
                vec!["verify merge_keys exist in both source and target", "check key column types"]
            }
            TransformError::Transaction { .. } => vec!["inspect engine logs for the rolled-back transaction"],
            TransformError::StepExecution { .. } => vec!["inspect the failing statement", "check engine-side logs"],
            TransformError::StepTimeout { .. } => vec!["increase the step timeout", "reduce the time window size"],
            TransformError::Connection { .. } => vec!["check engine connectivity and credentials"],
            TransformError::DataValidation { .. } => vec!["review QualityProfile for failing rules"],
            TransformError::Security { .. } => vec!["treat as a security incident; do not retry automatically"],
        }
    }

    /// A context map with salient fields, secrets elided. Used for logging
    /// and for attaching structured error context to observability exports.
    pub fn context(&self) -> HashMap<String, String> {
        let mut ctx = HashMap::new();
        match self {
            TransformError::Identifier { identifier, reason } => {
                ctx.insert("identifier".into(), identifier.clone());
                ctx.insert("reason".into(), reason.clone());
            }
            TransformError::TableBusy { table } => {
                ctx.insert("table".into(), table.clone());
            }
            TransformError::SchemaValidation { table, reason, .. } => {
                ctx.insert("table".into(), table.clone());
                ctx.insert("reason".into(), reason.clone());
            }
            TransformError::MergeKeyValidation { table, reason, keys } => {
                ctx.insert("table".into(), table.clone());
                ctx.insert("reason".into(), reason.clone());
                ctx.insert("keys".into(), keys.join(","));
            }
            TransformError::Transaction { table, op, reason } => {
                ctx.insert("table".into(), table.clone());
                ctx.insert("op".into(), (*op).to_string());
                ctx.insert("reason".into(), reason.clone());
            }
            TransformError::StepExecution { table, step_type, reason, .. } => {
                ctx.insert("table".into(), table.clone());
                ctx.insert("step_type".into(), step_type.clone());
                ctx.insert("reason".into(), reason.clone());
            }
            TransformError::StepTimeout { table, timeout_ms } => {
                ctx.insert("table".into(), table.clone());
                ctx.insert("timeout_ms".into(), timeout_ms.to_string());
            }
            TransformError::Connection { reason } => {
                ctx.insert("reason".into(), reason.clone());
            }
            TransformError::DataValidation { table, reason } => {
                ctx.insert("table".into(), table.clone());
                ctx.insert("reason".into(), reason.clone());
            }
            TransformError::Security { reason } => {
                ctx.insert("reason".into(), reason.clone());
            }
        }
        ctx
    }
}

impl From<rusqlite::Error> for TransformError {
    fn from(e: rusqlite::Error) -> Self {
        TransformError::Connection { reason: e.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;
