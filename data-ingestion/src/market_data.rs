//! Candle-history provider: trait seam plus a Binance-style kline HTTP
//! client and a canned in-memory implementation for tests.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use common::{Candle, Timeframe};

/// Source of historical candles.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch up to `limit` candles, oldest first. `start`/`end` bound the
    /// window when given; providers must support limits of at least 1000.
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

/// Binance-style `/api/v3/klines` client. The endpoint returns an array of
/// arrays with prices encoded as strings.
pub struct KlineClient {
    http: reqwest::Client,
    base_url: String,
}

impl KlineClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build kline http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn parse_klines(raw: &Value) -> Result<Vec<Candle>> {
        let rows = raw
            .as_array()
            .ok_or_else(|| anyhow!("kline response is not an array"))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(Self::parse_row(row)?);
        }
        Ok(candles)
    }

    fn parse_row(row: &Value) -> Result<Candle> {
        let fields = row
            .as_array()
            .ok_or_else(|| anyhow!("kline row is not an array"))?;
        if fields.len() < 6 {
            return Err(anyhow!("kline row has {} fields, expected >= 6", fields.len()));
        }

        let open_time_ms = fields[0]
            .as_i64()
            .ok_or_else(|| anyhow!("kline open_time is not an integer"))?;
        let open_time = Utc
            .timestamp_millis_opt(open_time_ms)
            .single()
            .ok_or_else(|| anyhow!("kline open_time out of range: {}", open_time_ms))?;

        Ok(Candle {
            open_time,
            open: parse_price(&fields[1], "open")?,
            high: parse_price(&fields[2], "high")?,
            low: parse_price(&fields[3], "low")?,
            close: parse_price(&fields[4], "close")?,
            volume: parse_price(&fields[5], "volume")?,
        })
    }
}

/// Kline prices arrive as JSON strings ("42100.50"); tolerate bare numbers
/// too since some mirrors re-encode them.
fn parse_price(value: &Value, field: &str) -> Result<f64> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("kline {} is not numeric: {}", field, s)),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow!("kline {} is not representable as f64", field)),
        other => Err(anyhow!("kline {} has unexpected type: {}", field, other)),
    }
}

#[async_trait]
impl MarketDataProvider for KlineClient {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let mut query: Vec<(&str, String)> = vec![
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(start) = start {
            query.push(("startTime", start.timestamp_millis().to_string()));
        }
        if let Some(end) = end {
            query.push(("endTime", end.timestamp_millis().to_string()));
        }

        debug!("Fetching {} klines for {} @ {}", limit, symbol, timeframe.as_str());

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("kline request failed for {}", symbol))?
            .error_for_status()
            .with_context(|| format!("kline request rejected for {}", symbol))?;

        let raw: Value = response
            .json()
            .await
            .with_context(|| format!("kline response for {} is not JSON", symbol))?;

        Self::parse_klines(&raw)
    }
}

/// Canned candle windows keyed by (symbol, timeframe), for tests and
/// offline wiring.
#[derive(Default)]
pub struct StaticMarketData {
    windows: HashMap<(String, Timeframe), Vec<Candle>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.windows.insert((symbol.to_string(), timeframe), candles);
    }
}

#[async_trait]
impl MarketDataProvider for StaticMarketData {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let window = self
            .windows
            .get(&(symbol.to_string(), timeframe))
            .ok_or_else(|| anyhow!("no canned data for {} @ {}", symbol, timeframe.as_str()))?;
        let skip = window.len().saturating_sub(limit);
        Ok(window[skip..].to_vec())
    }
}
