//! On-chain analytics provider. Errors from this source are informational
//! only: callers treat any failure as "no signal" and award a zero bonus.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use common::OnchainSummary;

/// Source of on-chain activity summaries for a base asset ("BTC", not
/// "BTCUSDT").
#[async_trait]
pub trait OnchainProvider: Send + Sync {
    async fn get_summary(&self, base_symbol: &str) -> Result<OnchainSummary>;
}

/// Generic JSON summary endpoint: `GET {base_url}/v1/summary/{asset}`.
pub struct HttpOnchainClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpOnchainClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build onchain http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OnchainProvider for HttpOnchainClient {
    async fn get_summary(&self, base_symbol: &str) -> Result<OnchainSummary> {
        let url = format!("{}/v1/summary/{}", self.base_url, base_symbol);
        debug!("Fetching onchain summary for {}", base_symbol);

        let summary = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("onchain request failed for {}", base_symbol))?
            .error_for_status()
            .with_context(|| format!("onchain request rejected for {}", base_symbol))?
            .json::<OnchainSummary>()
            .await
            .with_context(|| format!("onchain response for {} is not valid", base_symbol))?;

        Ok(summary)
    }
}

/// Provider that is always down. Used in tests to exercise the degradation
/// path and as wiring when no on-chain source is configured.
pub struct NullOnchainProvider;

#[async_trait]
impl OnchainProvider for NullOnchainProvider {
    async fn get_summary(&self, base_symbol: &str) -> Result<OnchainSummary> {
        Err(anyhow!("onchain provider not configured ({})", base_symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_provider_always_errors() {
        let provider = NullOnchainProvider;
        assert!(provider.get_summary("BTC").await.is_err());
    }

    #[test]
    fn test_summary_deserializes() {
        let json = r#"{
            "large_transfers_count": 73,
            "exchange_netflow": -2500.0,
            "smart_money_flow": 1800.0,
            "active_addresses_growth": 6.4
        }"#;
        let summary: OnchainSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.large_transfers_count, 73);
        assert!(summary.exchange_netflow < 0.0);
    }
}
