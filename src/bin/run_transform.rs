//! Demo CLI harness wiring a live [`ClickHouseEngine`] to a
//! [`TransformOrchestrator`], env-var-bootstrapped the way this crate's
//! binaries are structured elsewhere in the corpus.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use transform_engine::config::TransformEngineConfig;
use transform_engine::engine::ClickHouseEngine;
use transform_engine::model::{TransformStep, WriteMode};
use transform_engine::observability::ObservabilityManager;
use transform_engine::orchestrator::TransformOrchestrator;
use transform_engine::watermark::WatermarkStore;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("transform_engine=info")))
        .init();

    let config = TransformEngineConfig::load(
        std::env::var("TRANSFORM_ENGINE_CONFIG").unwrap_or_else(|_| "./transform_engine.toml".to_string()),
    )?;

    let clickhouse_url = std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db = std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "default".to_string());
    let clickhouse_user = std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    let engine = ClickHouseEngine::new(&clickhouse_url, &clickhouse_db, &clickhouse_user, &clickhouse_password)?;

    let watermark_db_path = std::env::var("TRANSFORM_WATERMARK_DB").unwrap_or_else(|_| "./transform_watermarks.db".to_string());
    let watermarks = WatermarkStore::open(&watermark_db_path)?;

    let observability = ObservabilityManager::new(
        config.enable_pii_detection,
        config.enable_monitoring,
        Duration::from_secs_f64(config.monitoring_interval_s),
    );

    let orchestrator = TransformOrchestrator::new(observability, watermarks);

    let table = std::env::var("TRANSFORM_TARGET_TABLE").unwrap_or_else(|_| "events_daily".to_string());
    let query = std::env::var("TRANSFORM_SOURCE_QUERY").unwrap_or_else(|_| format!("SELECT * FROM {table}_staging"));
    let mode = std::env::var("TRANSFORM_WRITE_MODE")
        .ok()
        .and_then(|m| WriteMode::parse(&m))
        .unwrap_or(WriteMode::Append);

    let step = TransformStep::new(table, query, mode);

    tracing::info!(table = %step.table_name, mode = ?step.mode, "running transform step");
    let result = orchestrator.execute(&engine, &step)?;
    tracing::info!(
        rows_inserted = result.rows_inserted,
        execution_time_ms = result.execution_time_ms,
        data_quality_score = result.data_quality_score,
        "transform step completed"
    );

    Ok(())
}
