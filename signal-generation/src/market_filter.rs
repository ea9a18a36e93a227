// Market filter: scores each symbol's trend and on-chain activity and
// returns the qualifying candidates for the cycle, best first.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use common::{Candle, OnchainSummary, Timeframe};
use data_ingestion::{MarketDataProvider, OnchainProvider};

use crate::indicators::{self, PiecewiseLinear};

/// Tuning for trend and on-chain scoring.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Moving-average period for the trend gate.
    pub ma_period: usize,
    /// Points awarded when the last close is above the moving average.
    pub ma_points: f64,
    /// Recent-volume window compared against the prior window.
    pub volume_recent: usize,
    /// Required ratio of recent mean volume over prior mean volume.
    pub volume_ratio: f64,
    pub volume_points: f64,
    /// Momentum lookback in candles.
    pub momentum_period: usize,
    /// Momentum percent at which the momentum award saturates.
    pub momentum_full_scale_pct: f64,
    pub momentum_max_points: f64,
    /// Candidates below this trend score are discarded.
    pub min_trend_score: f64,

    /// On-chain signal thresholds; each crossed signal awards `onchain_points`.
    pub large_transfers_min: u32,
    /// Net exchange outflow (negative netflow) at or beyond this magnitude.
    pub exchange_outflow_min: f64,
    pub smart_money_flow_min: f64,
    pub address_growth_min_pct: f64,
    pub onchain_points: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ma_period: 20,
            ma_points: 40.0,
            volume_recent: 5,
            volume_ratio: 1.2,
            volume_points: 30.0,
            momentum_period: 5,
            momentum_full_scale_pct: 10.0,
            momentum_max_points: 30.0,
            min_trend_score: 60.0,
            large_transfers_min: 50,
            exchange_outflow_min: 1000.0,
            smart_money_flow_min: 1000.0,
            address_growth_min_pct: 5.0,
            onchain_points: 25.0,
        }
    }
}

/// A market that cleared the trend gate this cycle. Consumed by the entry
/// planner and discarded.
#[derive(Debug, Clone)]
pub struct MarketCandidate {
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub trend_score: f64,
    /// Zero when the on-chain provider was degraded.
    pub onchain_score: f64,
    pub onchain_signals: OnchainSummary,
}

impl MarketCandidate {
    pub fn total_score(&self) -> f64 {
        self.trend_score + self.onchain_score
    }
}

pub struct MarketFilter {
    config: FilterConfig,
    market_data: Arc<dyn MarketDataProvider>,
    onchain: Arc<dyn OnchainProvider>,
    momentum_curve: PiecewiseLinear,
}

impl MarketFilter {
    pub fn new(
        config: FilterConfig,
        market_data: Arc<dyn MarketDataProvider>,
        onchain: Arc<dyn OnchainProvider>,
    ) -> Self {
        let momentum_curve = PiecewiseLinear::new(vec![
            (0.0, 0.0),
            (config.momentum_full_scale_pct, config.momentum_max_points),
        ]);
        Self {
            config,
            market_data,
            onchain,
            momentum_curve,
        }
    }

    /// Score every symbol and return the qualifying candidates, highest
    /// total score first. A failed candle fetch skips that symbol; a failed
    /// on-chain lookup degrades its bonus to zero.
    pub async fn filter(
        &self,
        symbols: &[String],
        timeframe: Timeframe,
        candle_limit: usize,
    ) -> Vec<MarketCandidate> {
        let mut candidates = Vec::new();

        for symbol in symbols {
            let candles = match self
                .market_data
                .get_candles(symbol, timeframe, None, None, candle_limit)
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("Skipping {}: candle fetch failed: {:#}", symbol, e);
                    continue;
                }
            };

            let trend_score = match self.trend_score(&candles) {
                Some(score) => score,
                None => {
                    debug!("Skipping {}: window too short for trend scoring", symbol);
                    continue;
                }
            };

            if trend_score < self.config.min_trend_score {
                debug!(
                    "Skipping {}: trend score {:.1} below minimum {:.1}",
                    symbol, trend_score, self.config.min_trend_score
                );
                continue;
            }

            let (onchain_score, onchain_signals) = self.onchain_score(symbol).await;

            debug!(
                "{}: trend {:.1}, onchain {:.1}",
                symbol, trend_score, onchain_score
            );
            candidates.push(MarketCandidate {
                symbol: symbol.clone(),
                candles,
                trend_score,
                onchain_score,
                onchain_signals,
            });
        }

        candidates.sort_by(|a, b| {
            b.total_score()
                .partial_cmp(&a.total_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    /// Three boolean-gated awards: MA position, volume pickup, momentum.
    /// None when the window cannot support the longest lookback.
    pub fn trend_score(&self, candles: &[Candle]) -> Option<f64> {
        let cfg = &self.config;
        let ma = indicators::sma(candles, cfg.ma_period)?;
        let last_close = candles.last()?.close;

        let mut score = 0.0;
        if last_close > ma {
            score += cfg.ma_points;
        }

        if candles.len() > cfg.volume_recent {
            let split = candles.len() - cfg.volume_recent;
            let recent: f64 =
                candles[split..].iter().map(|c| c.volume).sum::<f64>() / cfg.volume_recent as f64;
            let prior: f64 =
                candles[..split].iter().map(|c| c.volume).sum::<f64>() / split as f64;
            if prior > 0.0 && recent > prior * cfg.volume_ratio {
                score += cfg.volume_points;
            }
        }

        if let Some(momentum) = indicators::momentum_pct(candles, cfg.momentum_period) {
            score += self.momentum_curve.eval(momentum);
        }

        Some(score)
    }

    /// Bonus points per on-chain signal crossing its threshold. Provider
    /// failure is logged and scored as zero; it never blocks the candidate.
    async fn onchain_score(&self, symbol: &str) -> (f64, OnchainSummary) {
        let base = base_asset(symbol);
        match self.onchain.get_summary(base).await {
            Ok(summary) => (self.score_summary(&summary), summary),
            Err(e) => {
                warn!("Onchain degraded for {}: {:#}", base, e);
                (0.0, OnchainSummary::default())
            }
        }
    }

    fn score_summary(&self, summary: &OnchainSummary) -> f64 {
        let cfg = &self.config;
        let mut score = 0.0;
        if summary.large_transfers_count >= cfg.large_transfers_min {
            score += cfg.onchain_points;
        }
        if summary.exchange_netflow <= -cfg.exchange_outflow_min {
            score += cfg.onchain_points;
        }
        if summary.smart_money_flow >= cfg.smart_money_flow_min {
            score += cfg.onchain_points;
        }
        if summary.active_addresses_growth >= cfg.address_growth_min_pct {
            score += cfg.onchain_points;
        }
        score
    }
}

/// "BTCUSDT" -> "BTC". Quote suffixes we trade against.
pub fn base_asset(symbol: &str) -> &str {
    for quote in ["USDT", "USDC", "BUSD", "USD"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return base;
            }
        }
    }
    symbol
}
