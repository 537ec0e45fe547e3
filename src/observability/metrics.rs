//! Labeled time-series metrics collector (§4.6). Grounded in
//! `original_source/.../transform/monitoring.py`'s `MetricsCollector`: a
//! per-series bounded FIFO with lazy, time-based eviction.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Timer,
}

#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub metric_type: MetricType,
    pub timestamp: DateTime<Utc>,
    pub labels: HashMap<String, String>,
    pub unit: Option<String>,
}

struct Series {
    points: std::collections::VecDeque<MetricPoint>,
}

/// Concurrent mapping from series name to a bounded FIFO of points.
/// Eviction runs lazily on write, at most once per `cleanup_interval`
/// (§4.6), rather than on every insert.
pub struct MetricsCollector {
    series: Mutex<HashMap<String, Series>>,
    retention: Duration,
    max_points_per_metric: usize,
    cleanup_interval: Duration,
    last_cleanup: Mutex<Instant>,
}

impl MetricsCollector {
    pub fn new(retention: Duration, max_points_per_metric: usize, cleanup_interval: Duration) -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
            retention,
            max_points_per_metric,
            cleanup_interval,
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(24 * 3600), 10_000, Duration::from_secs(300))
    }

    pub fn record(
        &self,
        name: &str,
        value: f64,
        metric_type: MetricType,
        labels: HashMap<String, String>,
        unit: Option<String>,
    ) {
        self.maybe_cleanup();
        let point = MetricPoint { name: name.to_string(), value, metric_type, timestamp: Utc::now(), labels, unit };
        let mut series = self.series.lock().unwrap();
        let entry = series.entry(name.to_string()).or_insert_with(|| Series { points: Default::default() });
        entry.points.push_back(point);
        while entry.points.len() > self.max_points_per_metric {
            entry.points.pop_front();
        }
    }

    pub fn counter(&self, name: &str, value: f64, labels: HashMap<String, String>) {
        self.record(name, value, MetricType::Counter, labels, None)
    }

    pub fn gauge(&self, name: &str, value: f64, labels: HashMap<String, String>) {
        self.record(name, value, MetricType::Gauge, labels, None)
    }

    pub fn timer(&self, name: &str, seconds: f64, labels: HashMap<String, String>) {
        self.record(name, seconds, MetricType::Timer, labels, Some("s".to_string()))
    }

    fn maybe_cleanup(&self) {
        let mut last = self.last_cleanup.lock().unwrap();
        if last.elapsed() < self.cleanup_interval {
            return;
        }
        *last = Instant::now();
        let cutoff = Utc::now() - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        let mut series = self.series.lock().unwrap();
        for s in series.values_mut() {
            while let Some(front) = s.points.front() {
                if front.timestamp < cutoff {
                    s.points.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Latest point matching all provided label keys exactly, if any.
    pub fn latest_value(&self, name: &str, label_filter: &HashMap<String, String>) -> Option<f64> {
        let series = self.series.lock().unwrap();
        series.get(name).and_then(|s| {
            s.points
                .iter()
                .rev()
                .find(|p| label_filter.iter().all(|(k, v)| p.labels.get(k) == Some(v)))
                .map(|p| p.value)
        })
    }

    /// Ordered history filtered by exact-match labels.
    pub fn history(&self, name: &str, label_filter: &HashMap<String, String>) -> Vec<MetricPoint> {
        let series = self.series.lock().unwrap();
        series
            .get(name)
            .map(|s| {
                s.points
                    .iter()
                    .filter(|p| label_filter.iter().all(|(k, v)| p.labels.get(k) == Some(v)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn series_names(&self) -> Vec<String> {
        self.series.lock().unwrap().keys().cloned().collect()
    }

    pub fn summary(&self) -> HashMap<String, usize> {
        self.series.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.points.len())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_value_filters_by_labels() {
        let collector = MetricsCollector::with_defaults();
        let mut labels_a = HashMap::new();
        labels_a.insert("table".to_string(), "orders".to_string());
        collector.gauge("rows", 10.0, labels_a.clone());
        collector.gauge("rows", 20.0, labels_a.clone());
        let mut labels_b = HashMap::new();
        labels_b.insert("table".to_string(), "customers".to_string());
        collector.gauge("rows", 99.0, labels_b);

        assert_eq!(collector.latest_value("rows", &labels_a), Some(20.0));
    }

    #[test]
    fn series_is_bounded_fifo() {
        let collector = MetricsCollector::new(Duration::from_secs(3600), 3, Duration::from_secs(1));
        for i in 0..5 {
            collector.counter("hits", i as f64, HashMap::new());
        }
        let history = collector.history("hits", &HashMap::new());
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].value, 2.0);
    }

    #[test]
    fn missing_series_returns_none() {
        let collector = MetricsCollector::with_defaults();
        assert_eq!(collector.latest_value("nope", &HashMap::new()), None);
    }
}
