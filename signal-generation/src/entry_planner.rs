// Entry planner: turns a qualifying candidate into a priced proposal.
// Entry gate is "pullback confirmed, not yet extended": price at or above
// the support MA but within a bounded band over it. Exits are ATR-sized
// with a fixed-percent fallback when the window is too short for ATR.

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::SignalType;

use crate::indicators::{self, PiecewiseLinear};
use crate::market_filter::MarketCandidate;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Support moving-average period.
    pub support_ma_period: usize,
    /// Entry band: close / support MA must fall within [min, max].
    pub entry_band_min: f64,
    pub entry_band_max: f64,

    pub atr_period: usize,
    pub atr_stop_multiplier: f64,
    pub atr_target_multiplier: f64,
    /// Stop is never above support * (1 - tolerance).
    pub support_tolerance: f64,
    /// Fallback exits when ATR is infeasible.
    pub fallback_stop_pct: f64,
    pub fallback_target_pct: f64,

    /// Position-weight tiers: score breakpoints and the weight range of
    /// each tier, interpolated linearly inside a tier.
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub low_weight_min: f64,
    pub low_weight_max: f64,
    pub med_weight_max: f64,
    pub high_weight_max: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            support_ma_period: 20,
            entry_band_min: 1.00,
            entry_band_max: 1.10,
            atr_period: 14,
            atr_stop_multiplier: 1.5,
            atr_target_multiplier: 2.5,
            support_tolerance: 0.02,
            fallback_stop_pct: 0.05,
            fallback_target_pct: 0.10,
            medium_threshold: 70.0,
            high_threshold: 85.0,
            low_weight_min: 0.10,
            low_weight_max: 0.30,
            med_weight_max: 0.60,
            high_weight_max: 1.00,
        }
    }
}

/// Priced trade proposal for one candidate. Ephemeral; all fields are
/// copied onto the decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub symbol: String,
    pub signal_type: SignalType,
    pub entry_price: f64,
    pub stop_loss_price: f64,
    pub profit_target_price: f64,
    /// entry - stop, always positive.
    pub risk_unit: f64,
    pub reward_risk_ratio: f64,
    pub suggested_position_weight: f64,
    pub rule_score: f64,
}

pub struct EntryPlanner {
    config: PlannerConfig,
    weight_curve: PiecewiseLinear,
}

impl EntryPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        // The tier table is continuous at each boundary, so a single
        // polyline reproduces the three-tier interpolation exactly.
        let weight_curve = PiecewiseLinear::new(vec![
            (0.0, config.low_weight_min),
            (config.medium_threshold, config.low_weight_max),
            (config.high_threshold, config.med_weight_max),
            (100.0, config.high_weight_max),
        ]);
        Self {
            config,
            weight_curve,
        }
    }

    /// Pure function of the candidate: same input, same proposal.
    pub fn plan(&self, candidate: &MarketCandidate) -> Option<TradeProposal> {
        let cfg = &self.config;
        let candles = &candidate.candles;

        let support = indicators::sma(candles, cfg.support_ma_period)?;
        let entry = candles.last()?.close;
        if support <= 0.0 {
            return None;
        }

        let ratio = entry / support;
        if ratio < cfg.entry_band_min || ratio > cfg.entry_band_max {
            debug!(
                "{}: no entry, price/MA ratio {:.4} outside [{:.2}, {:.2}]",
                candidate.symbol, ratio, cfg.entry_band_min, cfg.entry_band_max
            );
            return None;
        }

        let (stop, target) = match indicators::atr(candles, cfg.atr_period) {
            Some(atr) => {
                let stop = (support * (1.0 - cfg.support_tolerance))
                    .min(entry - atr * cfg.atr_stop_multiplier);
                let target = entry + atr * cfg.atr_target_multiplier;
                (stop, target)
            }
            None => {
                debug!(
                    "{}: ATR infeasible, using fixed-percent exits",
                    candidate.symbol
                );
                (
                    entry * (1.0 - cfg.fallback_stop_pct),
                    entry * (1.0 + cfg.fallback_target_pct),
                )
            }
        };

        let risk_unit = entry - stop;
        if !(stop < entry && entry < target) || risk_unit <= 0.0 {
            debug!("{}: degenerate exit levels, no proposal", candidate.symbol);
            return None;
        }

        let rule_score = candidate.total_score();
        Some(TradeProposal {
            symbol: candidate.symbol.clone(),
            signal_type: SignalType::PullbackBuy,
            entry_price: entry,
            stop_loss_price: stop,
            profit_target_price: target,
            risk_unit,
            reward_risk_ratio: (target - entry) / risk_unit,
            suggested_position_weight: self.position_weight(rule_score),
            rule_score,
        })
    }

    /// Three-tier piecewise-linear map from rule score to position weight.
    pub fn position_weight(&self, rule_score: f64) -> f64 {
        self.weight_curve.eval(rule_score.clamp(0.0, 100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::candles_from_closes;
    use common::OnchainSummary;

    fn candidate(closes: &[f64], trend: f64) -> MarketCandidate {
        MarketCandidate {
            symbol: "BTCUSDT".to_string(),
            candles: candles_from_closes(closes),
            trend_score: trend,
            onchain_score: 0.0,
            onchain_signals: OnchainSummary::default(),
        }
    }

    /// Gentle drift up, last close just above the 20-period MA.
    fn pullback_closes() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.2).collect();
        let last = *closes.last().unwrap();
        closes.push(last * 1.01);
        closes
    }

    #[test]
    fn test_plan_produces_valid_levels() {
        let planner = EntryPlanner::new(PlannerConfig::default());
        let proposal = planner.plan(&candidate(&pullback_closes(), 75.0)).unwrap();

        assert!(proposal.stop_loss_price < proposal.entry_price);
        assert!(proposal.entry_price < proposal.profit_target_price);
        assert!(proposal.risk_unit > 0.0);
        let rr = (proposal.profit_target_price - proposal.entry_price) / proposal.risk_unit;
        assert!((proposal.reward_risk_ratio - rr).abs() < 1e-12);
        assert_eq!(proposal.signal_type, SignalType::PullbackBuy);
        assert_eq!(proposal.rule_score, 75.0);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let planner = EntryPlanner::new(PlannerConfig::default());
        let c = candidate(&pullback_closes(), 82.0);
        assert_eq!(planner.plan(&c), planner.plan(&c));
    }

    #[test]
    fn test_extended_price_rejected() {
        // Last close 25% above the MA: past the band, no entry.
        let mut closes = vec![100.0; 40];
        closes.push(125.0);
        let planner = EntryPlanner::new(PlannerConfig::default());
        assert!(planner.plan(&candidate(&closes, 80.0)).is_none());
    }

    #[test]
    fn test_below_support_rejected() {
        let mut closes = vec![100.0; 40];
        closes.push(95.0);
        let planner = EntryPlanner::new(PlannerConfig::default());
        assert!(planner.plan(&candidate(&closes, 80.0)).is_none());
    }

    #[test]
    fn test_atr_fallback_with_short_window() {
        // 20 candles carry the support MA but not ATR(14) + 1... use a
        // window long enough for the MA and exactly too short for ATR.
        let closes = vec![100.0; 14];
        let config = PlannerConfig {
            support_ma_period: 10,
            ..PlannerConfig::default()
        };
        let planner = EntryPlanner::new(config.clone());
        let proposal = planner.plan(&candidate(&closes, 70.0)).unwrap();

        assert!((proposal.stop_loss_price - 100.0 * (1.0 - config.fallback_stop_pct)).abs() < 1e-9);
        assert!(
            (proposal.profit_target_price - 100.0 * (1.0 + config.fallback_target_pct)).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_weight_curve_tiers() {
        let planner = EntryPlanner::new(PlannerConfig::default());
        assert!((planner.position_weight(0.0) - 0.10).abs() < 1e-12);
        assert!((planner.position_weight(70.0) - 0.30).abs() < 1e-12);
        assert!((planner.position_weight(85.0) - 0.60).abs() < 1e-12);
        assert!((planner.position_weight(100.0) - 1.00).abs() < 1e-12);
        // Mid-tier interpolation.
        assert!((planner.position_weight(35.0) - 0.20).abs() < 1e-12);
        assert!((planner.position_weight(77.5) - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_weight_curve_monotone_and_clamped() {
        let planner = EntryPlanner::new(PlannerConfig::default());
        let mut prev = 0.0;
        for i in 0..=100 {
            let w = planner.position_weight(i as f64);
            assert!(w >= prev);
            assert!((0.10..=1.0).contains(&w));
            prev = w;
        }
        assert_eq!(planner.position_weight(-5.0), planner.position_weight(0.0));
        assert_eq!(planner.position_weight(140.0), planner.position_weight(100.0));
    }
}
