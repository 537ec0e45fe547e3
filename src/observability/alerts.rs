//! Threshold alerting with cooldown and auto-resolution (§4.6). Grounded in
//! `monitoring.py`'s `AlertManager`.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::metrics::MetricsCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Ne,
}

impl Operator {
    fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Lt => value < threshold,
            Operator::Gte => value >= threshold,
            Operator::Lte => value <= threshold,
            Operator::Eq => (value - threshold).abs() < f64::EPSILON,
            Operator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdRule {
    pub metric_name: String,
    pub threshold_value: f64,
    pub operator: Operator,
    pub severity: Severity,
    pub message_template: String,
    pub cooldown_seconds: i64,
    pub labels_filter: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub name: String,
    pub message: String,
    pub severity: Severity,
    pub metric_name: String,
    pub current_value: f64,
    pub threshold_value: f64,
    pub labels: HashMap<String, String>,
    pub first_triggered_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Active alerts and cooldowns are keyed by `(metric_name, operator,
/// threshold, sorted labels)` (§4.6).
fn alert_key(rule: &ThresholdRule) -> String {
    let mut labels: Vec<(&String, &String)> = rule.labels_filter.iter().collect();
    labels.sort();
    let labels_str = labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
    format!("{}:{:?}:{}:{}", rule.metric_name, rule.operator, rule.threshold_value, labels_str)
}

pub struct AlertManager<'a> {
    metrics: &'a MetricsCollector,
    rules: Mutex<Vec<ThresholdRule>>,
    active: Mutex<HashMap<String, Alert>>,
    history: Mutex<Vec<Alert>>,
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
    callbacks: Mutex<Vec<Box<dyn Fn(&Alert) + Send + Sync>>>,
}

impl<'a> AlertManager<'a> {
    pub fn new(metrics: &'a MetricsCollector) -> Self {
        Self {
            metrics,
            rules: Mutex::new(Vec::new()),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            cooldowns: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn add_threshold_rule(&self, rule: ThresholdRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn add_alert_callback(&self, callback: impl Fn(&Alert) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().push(Box::new(callback));
    }

    /// Evaluates every registered rule (§4.6): fetches the current value
    /// with `labels_filter`, skipping if absent; on breach, respects
    /// cooldown before firing; on non-breach, resolves any active alert
    /// for the same key.
    pub fn check_thresholds(&self) -> Vec<Alert> {
        let rules = self.rules.lock().unwrap().clone();
        let mut fired = Vec::new();
        for rule in &rules {
            let Some(value) = self.metrics.latest_value(&rule.metric_name, &rule.labels_filter) else {
                continue;
            };
            let key = alert_key(rule);
            let breached = rule.operator.evaluate(value, rule.threshold_value);

            if breached {
                if let Some(alert) = self.fire(rule, &key, value) {
                    fired.push(alert);
                }
            } else {
                self.resolve(&key);
            }
        }
        fired
    }

    fn fire(&self, rule: &ThresholdRule, key: &str, value: f64) -> Option<Alert> {
        let now = Utc::now();
        if let Some(cooldown_start) = self.cooldowns.lock().unwrap().get(key) {
            if now < *cooldown_start + chrono::Duration::seconds(rule.cooldown_seconds) {
                return None;
            }
        }

        let alert = Alert {
            name: key.to_string(),
            message: rule
                .message_template
                .replace("{value}", &value.to_string())
                .replace("{threshold}", &rule.threshold_value.to_string()),
            severity: rule.severity,
            metric_name: rule.metric_name.clone(),
            current_value: value,
            threshold_value: rule.threshold_value,
            labels: rule.labels_filter.clone(),
            first_triggered_at: now,
            resolved: false,
            resolved_at: None,
        };

        self.active.lock().unwrap().insert(key.to_string(), alert.clone());
        self.history.lock().unwrap().push(alert.clone());
        self.cooldowns.lock().unwrap().insert(key.to_string(), now);

        for cb in self.callbacks.lock().unwrap().iter() {
            cb(&alert);
        }

        Some(alert)
    }

    fn resolve(&self, key: &str) {
        let mut active = self.active.lock().unwrap();
        if let Some(mut alert) = active.remove(key) {
            alert.resolved = true;
            alert.resolved_at = Some(Utc::now());
            self.history.lock().unwrap().push(alert);
        }
    }

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.active.lock().unwrap().values().cloned().collect()
    }

    pub fn history(&self) -> Vec<Alert> {
        self.history.lock().unwrap().clone()
    }

    pub fn summary_by_severity(&self) -> HashMap<&'static str, usize> {
        let active = self.active.lock().unwrap();
        let mut out = HashMap::new();
        for sev in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            let count = active.values().filter(|a| a.severity == sev).count();
            out.insert(severity_label(sev), count);
        }
        out
    }
}

fn severity_label(s: Severity) -> &'static str {
    match s {
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> ThresholdRule {
        ThresholdRule {
            metric_name: "cpu_percent".to_string(),
            threshold_value: 80.0,
            operator: Operator::Gt,
            severity: Severity::Medium,
            message_template: "cpu at {value}".to_string(),
            cooldown_seconds: 300,
            labels_filter: HashMap::new(),
        }
    }

    #[test]
    fn fires_when_breached_and_resolves_when_clear() {
        let metrics = MetricsCollector::with_defaults();
        let manager = AlertManager::new(&metrics);
        manager.add_threshold_rule(rule());

        metrics.gauge("cpu_percent", 95.0, HashMap::new());
        let fired = manager.check_thresholds();
        assert_eq!(fired.len(), 1);
        assert_eq!(manager.get_active_alerts().len(), 1);

        metrics.gauge("cpu_percent", 10.0, HashMap::new());
        manager.check_thresholds();
        assert!(manager.get_active_alerts().is_empty());
    }

    #[test]
    fn respects_cooldown() {
        let metrics = MetricsCollector::with_defaults();
        let manager = AlertManager::new(&metrics);
        manager.add_threshold_rule(rule());

        metrics.gauge("cpu_percent", 95.0, HashMap::new());
        let first = manager.check_thresholds();
        assert_eq!(first.len(), 1);

        metrics.gauge("cpu_percent", 96.0, HashMap::new());
        let second = manager.check_thresholds();
        assert!(second.is_empty(), "cooldown should suppress a second immediate fire");
    }

    #[test]
    fn missing_metric_is_skipped() {
        let metrics = MetricsCollector::with_defaults();
        let manager = AlertManager::new(&metrics);
        manager.add_threshold_rule(rule());
        assert!(manager.check_thresholds().is_empty());
    }
}
