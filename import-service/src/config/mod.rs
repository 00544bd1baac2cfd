//! Configuration module for import-service.

use crate::engine::ConflictPolicy;
use crate::services::refund::DEFAULT_LOOKBACK_DAYS;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Heuristic thresholds of the reconciliation engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub conflict_policy: ConflictPolicy,
    /// Score from which a refund match is linked automatically.
    pub refund_high_confidence: f64,
    /// How many days a refund may trail the purchase it refunds.
    pub refund_lookback_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            refund_high_confidence: 0.85,
            refund_lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl ImportConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = EngineConfig::default();

        let refund_high_confidence: f64 =
            parsed_env("REFUND_HIGH_CONFIDENCE").unwrap_or(defaults.refund_high_confidence);
        if !(0.0..=1.0).contains(&refund_high_confidence) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFUND_HIGH_CONFIDENCE must be between 0 and 1"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "import-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parsed_env("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                min_connections: parsed_env("DATABASE_MIN_CONNECTIONS").unwrap_or(2),
            },
            engine: EngineConfig {
                conflict_policy: ConflictPolicy {
                    relative_bps: parsed_env("CONFLICT_RELATIVE_BPS")
                        .unwrap_or(defaults.conflict_policy.relative_bps),
                    absolute_minor_units: parsed_env("CONFLICT_ABSOLUTE_MINOR_UNITS")
                        .unwrap_or(defaults.conflict_policy.absolute_minor_units),
                },
                refund_high_confidence,
                refund_lookback_days: parsed_env("REFUND_LOOKBACK_DAYS")
                    .unwrap_or(defaults.refund_lookback_days),
            },
        })
    }
}
