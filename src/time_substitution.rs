//! Secure time-macro substitution: replaces `@start_date`/`@end_date`/
//! `@start_dt`/`@end_dt` with named placeholders and returns the parameter
//! values alongside, so the caller never interpolates a timestamp into SQL
//! text.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::sql_safety::SqlValue;

const MACROS: &[(&str, &str)] = &[
    ("@start_date", "$start_date"),
    ("@end_date", "$end_date"),
    ("@start_dt", "$start_dt"),
    ("@end_dt", "$end_dt"),
];

/// Replaces recognized time macros in `sql` with their placeholder form and
/// returns the substituted SQL plus a parameter map. All four entries are
/// always populated, whether or not their macro appears in `sql`.
pub fn substitute_time_macros(
    sql: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (String, HashMap<String, SqlValue>) {
    let mut params = HashMap::new();
    params.insert("start_date".to_string(), SqlValue::Text(start.format("%Y-%m-%d").to_string()));
    params.insert("end_date".to_string(), SqlValue::Text(end.format("%Y-%m-%d").to_string()));
    params.insert("start_dt".to_string(), SqlValue::Text(start.to_rfc3339()));
    params.insert("end_dt".to_string(), SqlValue::Text(end.to_rfc3339()));

    let mut result = sql.to_string();
    for (macro_text, placeholder) in MACROS {
        if result.contains(macro_text) {
            result = result.replace(macro_text, placeholder);
        }
    }

    (result, params)
}

/// Generic `${name}` / `${name|default}` / `$name` substitution for
/// configuration and template layers. This is never used at the SQL
/// text-to-engine boundary (see [`substitute_time_macros`] for that) — it
/// exists for resolving pipeline-level templates before a `TransformStep`
/// reaches this crate's orchestrator, e.g. `${env|dev}` in a config value.
pub fn substitute_template_variables(template: &str, values: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(close) = template[i + 2..].find('}') {
                let inner = &template[i + 2..i + 2 + close];
                let (name, default) = match inner.split_once('|') {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner, None),
                };
                match values.get(name).cloned().or_else(|| default.map(str::to_string)) {
                    Some(v) => result.push_str(&v),
                    None => result.push_str(&template[i..i + 2 + close + 1]),
                }
                i += 2 + close + 1;
                continue;
            }
        } else if bytes[i] == b'$' {
            let rest = &template[i + 1..];
            let name_len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if name_len > 0 {
                let name = &rest[..name_len];
                if let Some(v) = values.get(name) {
                    result.push_str(v);
                    i += 1 + name_len;
                    continue;
                }
            }
        }
        result.push(bytes[i] as char);
        i += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn substitutes_all_four_macros() {
        let start = Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let sql = "SELECT * FROM t WHERE c >= @start_date AND c <= @end_date";
        let (out, params) = substitute_time_macros(sql, start, end);
        assert_eq!(out, "SELECT * FROM t WHERE c >= $start_date AND c <= $end_date");
        assert_eq!(params.get("start_date"), Some(&SqlValue::Text("2024-03-07".into())));
        assert_eq!(params.get("end_date"), Some(&SqlValue::Text("2024-03-10".into())));
        assert!(params.contains_key("start_dt"));
        assert!(params.contains_key("end_dt"));
    }

    #[test]
    fn params_populated_even_when_macro_absent() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let (out, params) = substitute_time_macros("SELECT 1", start, end);
        assert_eq!(out, "SELECT 1");
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn template_substitution_with_default() {
        let mut values = HashMap::new();
        values.insert("env".to_string(), "prod".to_string());
        assert_eq!(substitute_template_variables("${env|dev}", &values), "prod");
        assert_eq!(substitute_template_variables("${missing|dev}", &values), "dev");
        assert_eq!(substitute_template_variables("$env-x", &values), "prod-x");
    }
}
