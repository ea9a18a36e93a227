//! Deployment configuration: TOML file plus `FUSION_`-prefixed environment
//! overrides. Algorithm-level tuning (filter thresholds, tier curves,
//! arbitration constants) lives next to the components that use it and
//! carries code defaults; this file covers the knobs that differ between
//! environments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::Timeframe;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Markets analyzed each cycle.
    pub symbols: Vec<String>,
    /// Primary candle interval, e.g. "1h".
    pub timeframe: String,
    /// Candles fetched per market per cycle.
    pub candle_limit: usize,
    /// Active feature/model version (1, 2 or 3).
    pub model_version: u32,

    pub market_data: MarketDataCfg,
    pub onchain: OnchainCfg,
    pub model: ModelCfg,
    pub llm: LlmCfg,
    pub publisher: PublisherCfg,
    pub orchestrator: OrchestratorCfg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataCfg {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnchainCfg {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Paths to the pre-trained classifier artifact and its feature manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCfg {
    pub artifact_path: String,
    pub manifest_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmCfg {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherCfg {
    pub redis_url: String,
    pub approved_channel: String,
    pub rejected_channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorCfg {
    pub cycle_interval_secs: u64,
    pub pass_deadline_secs: u64,
    pub market_deadline_secs: u64,
    pub max_concurrent_markets: usize,
    pub reference_fetch_pool: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
                "BNBUSDT".to_string(),
            ],
            timeframe: "1h".to_string(),
            candle_limit: 200,
            model_version: 3,
            market_data: MarketDataCfg::default(),
            onchain: OnchainCfg::default(),
            model: ModelCfg::default(),
            llm: LlmCfg::default(),
            publisher: PublisherCfg::default(),
            orchestrator: OrchestratorCfg::default(),
        }
    }
}

impl Default for MarketDataCfg {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for OnchainCfg {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for ModelCfg {
    fn default() -> Self {
        Self {
            artifact_path: "models/classifier.json".to_string(),
            manifest_path: "models/feature_manifest.json".to_string(),
        }
    }
}

impl Default for LlmCfg {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for PublisherCfg {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            approved_channel: "signals.approved".to_string(),
            rejected_channel: "signals.rejected".to_string(),
        }
    }
}

impl Default for OrchestratorCfg {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 300,
            pass_deadline_secs: 120,
            market_deadline_secs: 30,
            max_concurrent_markets: 4,
            reference_fetch_pool: 4,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `FUSION_`-prefixed environment overrides (`FUSION_LLM__MODEL`, ...).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let cfg = builder
            .add_source(config::Environment::with_prefix("FUSION").separator("__"))
            .build()
            .context("failed to build configuration")?;

        // Empty sources deserialize into the serde defaults.
        let app: AppConfig = cfg
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        Ok(app)
    }

    /// Parse the configured primary timeframe.
    pub fn timeframe(&self) -> Result<Timeframe> {
        match self.timeframe.as_str() {
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => anyhow::bail!("unsupported timeframe: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.model_version, 3);
        assert_eq!(cfg.orchestrator.max_concurrent_markets, 4);
        assert_eq!(cfg.publisher.approved_channel, "signals.approved");
        assert!(cfg.timeframe().is_ok());
    }

    #[test]
    fn test_unknown_timeframe_rejected() {
        let cfg = AppConfig {
            timeframe: "7m".to_string(),
            ..AppConfig::default()
        };
        assert!(cfg.timeframe().is_err());
    }
}
