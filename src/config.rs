//! Engine configuration (§6.5), loaded the way the teacher's `WideConfig`
//! loaded `wide.toml`: optional TOML file, falling back to defaults when
//! absent, with `dotenvy`-sourced environment overrides for secrets.

use std::path::Path;

use serde::Deserialize;

use crate::partition::TimeGranularity;

fn default_retention_hours() -> u32 {
    24
}

fn default_max_points_per_metric() -> usize {
    10_000
}

fn default_monitoring_interval_s() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

fn default_export_interval_s() -> u64 {
    60
}

fn default_export_path() -> String {
    "./observability_exports".to_string()
}

fn default_bulk_operation_threshold() -> u64 {
    10_000
}

fn default_memory_limit_mb() -> u32 {
    2_048
}

/// `default_granularity`'s enumerated values (§6.5), deserialized
/// case-insensitively and converted into [`TimeGranularity`] for direct use
/// by C4's partition manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfiguredGranularity {
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Default for ConfiguredGranularity {
    fn default() -> Self {
        Self::Day
    }
}

impl From<ConfiguredGranularity> for TimeGranularity {
    fn from(g: ConfiguredGranularity) -> Self {
        match g {
            ConfiguredGranularity::Hour => TimeGranularity::Hour,
            ConfiguredGranularity::Day => TimeGranularity::Day,
            ConfiguredGranularity::Week => TimeGranularity::Week,
            ConfiguredGranularity::Month => TimeGranularity::Month,
            ConfiguredGranularity::Quarter => TimeGranularity::Quarter,
            ConfiguredGranularity::Year => TimeGranularity::Year,
        }
    }
}

fn default_granularity() -> ConfiguredGranularity {
    ConfiguredGranularity::Day
}

/// The full enumerated configuration surface (§6.5).
#[derive(Debug, Clone, Deserialize)]
pub struct TransformEngineConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    #[serde(default = "default_max_points_per_metric")]
    pub max_points_per_metric: usize,
    #[serde(default = "default_monitoring_interval_s")]
    pub monitoring_interval_s: f64,
    #[serde(default = "default_true")]
    pub auto_start_monitoring: bool,
    #[serde(default)]
    pub export_enabled: bool,
    #[serde(default = "default_export_interval_s")]
    pub export_interval_s: u64,
    #[serde(default = "default_export_path")]
    pub export_path: String,
    #[serde(default = "default_true")]
    pub enable_pii_detection: bool,
    #[serde(default = "default_true")]
    pub enable_monitoring: bool,
    #[serde(default = "default_true")]
    pub enable_observability: bool,
    #[serde(default = "default_bulk_operation_threshold")]
    pub bulk_operation_threshold: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
    #[serde(default = "default_granularity")]
    pub default_granularity: ConfiguredGranularity,
}

impl Default for TransformEngineConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            max_points_per_metric: default_max_points_per_metric(),
            monitoring_interval_s: default_monitoring_interval_s(),
            auto_start_monitoring: true,
            export_enabled: false,
            export_interval_s: default_export_interval_s(),
            export_path: default_export_path(),
            enable_pii_detection: true,
            enable_monitoring: true,
            enable_observability: true,
            bulk_operation_threshold: default_bulk_operation_threshold(),
            memory_limit_mb: default_memory_limit_mb(),
            default_granularity: default_granularity(),
        }
    }
}

impl TransformEngineConfig {
    /// Loads config from a TOML file, falling back to defaults if the file
    /// doesn't exist. Also loads a sibling `.env` (if present) via `dotenvy`
    /// so engine credentials never need to live in the TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: TransformEngineConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn monitoring_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.monitoring_interval_s.max(0.0))
    }

    pub fn export_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.export_interval_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_enumeration() {
        let cfg = TransformEngineConfig::default();
        assert_eq!(cfg.retention_hours, 24);
        assert_eq!(cfg.max_points_per_metric, 10_000);
        assert_eq!(cfg.monitoring_interval_s, 10.0);
        assert!(cfg.auto_start_monitoring);
        assert!(!cfg.export_enabled);
        assert_eq!(cfg.export_interval_s, 60);
        assert!(cfg.enable_pii_detection);
        assert!(cfg.enable_monitoring);
        assert!(cfg.enable_observability);
        assert_eq!(cfg.bulk_operation_threshold, 10_000);
        assert_eq!(cfg.memory_limit_mb, 2_048);
        assert_eq!(cfg.default_granularity, ConfiguredGranularity::Day);
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let cfg = TransformEngineConfig::load("/nonexistent/path/transform_engine.toml").unwrap();
        assert_eq!(cfg.retention_hours, 24);
    }

    #[test]
    fn parses_overrides_from_toml() {
        let toml = "retention_hours = 48\nenable_monitoring = false\ndefault_granularity = \"WEEK\"\n";
        let cfg: TransformEngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.retention_hours, 48);
        assert!(!cfg.enable_monitoring);
        assert_eq!(cfg.default_granularity, ConfiguredGranularity::Week);
    }
}
