//! Structured, correlation-tagged logging with PII redaction (§4.6).
//! Grounded in `original_source/.../transform/logging_tracing.py`'s
//! `PIIDetector` and `StructuredLogger`.

use std::collections::{HashMap, VecDeque};
use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use super::tracing_spans::SpanContext;

thread_local! {
    static CORRELATION_ID: std::cell::RefCell<Option<String>> = const { std::cell::RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub correlation_id: String,
    pub operation_type: String,
    pub operation_id: Option<String>,
    pub span_id: Option<String>,
    pub trace_id: Option<String>,
    pub structured_data: HashMap<String, Value>,
    pub sanitized: bool,
}

/// Fixed PII regex patterns plus a sensitive-field-name set (§4.6).
struct PiiPatterns {
    email: Regex,
    ssn: Regex,
    phone: Regex,
    credit_card: Regex,
    ip_address: Regex,
    password: Regex,
    api_key: Regex,
}

static PATTERNS: LazyLock<PiiPatterns> = LazyLock::new(|| PiiPatterns {
    email: Regex::new(r"(?i)\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
    ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
    phone: Regex::new(r"\b\d{3}-\d{3}-\d{4}\b|\(\d{3}\)\s?\d{3}-\d{4}\b").unwrap(),
    credit_card: Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").unwrap(),
    ip_address: Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap(),
    password: Regex::new(r#"(?i)password["']?\s*[:=]\s*["']?([^"'\s]+)"#).unwrap(),
    api_key: Regex::new(r#"(?i)(?:api[_-]?key|token)["']?\s*[:=]\s*["']?([a-zA-Z0-9_-]{20,})"#).unwrap(),
});

const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "key",
    "api_key",
    "private_key",
    "access_token",
    "refresh_token",
    "auth_token",
    "session_id",
    "cookie",
    "authorization",
    "credentials",
];

pub fn is_sensitive_field(name: &str) -> bool {
    let lower = name.to_lowercase();
    SENSITIVE_FIELDS.iter().any(|s| lower.contains(s))
}

/// Scans `text` for recognized PII kinds. Returns a list of kind names, one
/// per pattern that matched (not per occurrence).
pub fn detect_pii(text: &str) -> Vec<&'static str> {
    let mut found = Vec::new();
    if PATTERNS.email.is_match(text) {
        found.push("email");
    }
    if PATTERNS.ssn.is_match(text) {
        found.push("ssn");
    }
    if PATTERNS.phone.is_match(text) {
        found.push("phone");
    }
    if PATTERNS.credit_card.is_match(text) {
        found.push("credit_card");
    }
    if PATTERNS.ip_address.is_match(text) {
        found.push("ip_address");
    }
    if PATTERNS.password.is_match(text) {
        found.push("password");
    }
    if PATTERNS.api_key.is_match(text) {
        found.push("api_key");
    }
    found
}

/// Redacts every recognized PII kind in `text`. Key-value patterns
/// (password, api_key) replace only the captured value; the rest replace
/// the whole match with a kind-tagged marker.
pub fn sanitize_text(text: &str) -> String {
    let mut out = text.to_string();
    out = PATTERNS.password.replace_all(&out, |caps: &regex::Captures| {
        caps[0].replace(&caps[1], "***REDACTED***")
    }).into_owned();
    out = PATTERNS.api_key.replace_all(&out, |caps: &regex::Captures| {
        caps[0].replace(&caps[1], "***REDACTED***")
    }).into_owned();
    out = PATTERNS.email.replace_all(&out, "***EMAIL_REDACTED***").into_owned();
    out = PATTERNS.ssn.replace_all(&out, "***SSN_REDACTED***").into_owned();
    out = PATTERNS.phone.replace_all(&out, "***PHONE_REDACTED***").into_owned();
    out = PATTERNS.credit_card.replace_all(&out, "***CREDIT_CARD_REDACTED***").into_owned();
    out = PATTERNS.ip_address.replace_all(&out, "***IP_ADDRESS_REDACTED***").into_owned();
    out
}

/// Sanitizes a structured field map: sensitive-named keys are fully
/// redacted; string values are scanned for PII; nested objects recurse.
pub fn sanitize_structured(data: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut out = HashMap::with_capacity(data.len());
    for (key, value) in data {
        if is_sensitive_field(key) {
            out.insert(key.clone(), Value::String("***REDACTED***".to_string()));
            continue;
        }
        out.insert(key.clone(), sanitize_value(value));
    }
    out
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(s)),
        Value::Object(map) => {
            let mut new_map = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive_field(k) {
                    new_map.insert(k.clone(), Value::String("***REDACTED***".to_string()));
                } else {
                    new_map.insert(k.clone(), sanitize_value(v));
                }
            }
            Value::Object(new_map)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

/// Correlation-tagged structured logger with a bounded FIFO buffer (§4.6).
pub struct StructuredLogger {
    pii_detection_enabled: bool,
    entries: Mutex<VecDeque<LogEntry>>,
    max_entries: usize,
}

impl StructuredLogger {
    pub fn new(pii_detection_enabled: bool, max_entries: usize) -> Self {
        Self { pii_detection_enabled, entries: Mutex::new(VecDeque::new()), max_entries }
    }

    pub fn with_defaults() -> Self {
        Self::new(true, 10_000)
    }

    /// Returns the thread-local correlation id, creating one if absent.
    pub fn current_correlation_id(&self) -> String {
        CORRELATION_ID.with(|c| {
            let mut current = c.borrow_mut();
            if let Some(id) = current.as_ref() {
                return id.clone();
            }
            let id = uuid::Uuid::new_v4().to_string();
            *current = Some(id.clone());
            id
        })
    }

    pub fn set_correlation_id(&self, id: impl Into<String>) {
        CORRELATION_ID.with(|c| *c.borrow_mut() = Some(id.into()));
    }

    pub fn clear_correlation_id(&self) {
        CORRELATION_ID.with(|c| *c.borrow_mut() = None);
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        operation_type: &str,
        operation_id: Option<String>,
        span: Option<&SpanContext>,
        structured_data: HashMap<String, Value>,
    ) -> LogEntry {
        let correlation_id = self.current_correlation_id();
        let (message, structured_data, sanitized) = if self.pii_detection_enabled {
            (sanitize_text(message), sanitize_structured(&structured_data), true)
        } else {
            (message.to_string(), structured_data, false)
        };

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            correlation_id,
            operation_type: operation_type.to_string(),
            operation_id,
            span_id: span.map(|s| s.span_id.clone()),
            trace_id: span.map(|s| s.trace_id.clone()),
            structured_data,
            sanitized,
        };

        let mut entries = self.entries.lock().unwrap();
        entries.push_back(entry.clone());
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        entry
    }

    pub fn info(&self, message: &str, operation_type: &str, structured_data: HashMap<String, Value>) -> LogEntry {
        self.log(LogLevel::Info, message, operation_type, None, None, structured_data)
    }

    pub fn warn(&self, message: &str, operation_type: &str, structured_data: HashMap<String, Value>) -> LogEntry {
        self.log(LogLevel::Warn, message, operation_type, None, None, structured_data)
    }

    pub fn error(&self, message: &str, operation_type: &str, structured_data: HashMap<String, Value>) -> LogEntry {
        self.log(LogLevel::Error, message, operation_type, None, None, structured_data)
    }

    pub fn query(&self, trace_id: Option<&str>, correlation_id: Option<&str>, since: Option<DateTime<Utc>>) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| trace_id.is_none_or(|t| e.trace_id.as_deref() == Some(t)))
            .filter(|e| correlation_id.is_none_or(|c| e.correlation_id == c))
            .filter(|e| since.is_none_or(|s| e.timestamp >= s))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_redacted_from_message() {
        let logger = StructuredLogger::with_defaults();
        let entry = logger.info("User email is alice@example.com", "test", HashMap::new());
        assert!(!entry.message.contains("alice@example.com"));
        assert!(entry.sanitized);
    }

    #[test]
    fn sensitive_field_name_is_fully_redacted() {
        let logger = StructuredLogger::with_defaults();
        let mut data = HashMap::new();
        data.insert("api_key".to_string(), Value::String("abcd1234efgh5678ijkl".to_string()));
        let entry = logger.info("ok", "test", data);
        assert_eq!(entry.structured_data.get("api_key"), Some(&Value::String("***REDACTED***".to_string())));
    }

    #[test]
    fn disabling_pii_detection_skips_sanitization() {
        let logger = StructuredLogger::new(false, 100);
        let entry = logger.info("contact bob@example.com", "test", HashMap::new());
        assert!(entry.message.contains("bob@example.com"));
        assert!(!entry.sanitized);
    }

    #[test]
    fn correlation_id_is_stable_within_thread_until_cleared() {
        let logger = StructuredLogger::with_defaults();
        let id1 = logger.current_correlation_id();
        let id2 = logger.current_correlation_id();
        assert_eq!(id1, id2);
        logger.clear_correlation_id();
        let id3 = logger.current_correlation_id();
        assert_ne!(id1, id3);
    }

    #[test]
    fn detect_pii_reports_kinds_present() {
        let kinds = detect_pii("call 555-123-4567 or email a@b.com");
        assert!(kinds.contains(&"phone"));
        assert!(kinds.contains(&"email"));
    }
}
