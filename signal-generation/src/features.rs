//! Multi-version feature engineering. Pure and I/O-free: candle windows in,
//! a fixed-width named feature vector out. Slot order is the contract with
//! the classifier manifest, so names and ordering are version-stable.
//!
//! Degradation: any indicator or reference window that cannot be computed
//! fills its slots with the neutral value 0.0 (breadth defaults to 0.5);
//! only insufficient primary data yields an empty vector, which signals
//! "cannot score" to callers.

use std::collections::HashMap;
use tracing::debug;

use common::Candle;

use crate::indicators;

/// Active model / feature-set version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVersion {
    /// 13 single-timeframe features.
    V1,
    /// 19 = v1 + 6 higher-timeframe features.
    V2,
    /// 30 = v2 + 11 cross-asset features.
    V3,
}

impl ModelVersion {
    pub fn from_u32(v: u32) -> Option<ModelVersion> {
        match v {
            1 => Some(ModelVersion::V1),
            2 => Some(ModelVersion::V2),
            3 => Some(ModelVersion::V3),
            _ => None,
        }
    }

    pub fn feature_count(&self) -> usize {
        match self {
            ModelVersion::V1 => 13,
            ModelVersion::V2 => 19,
            ModelVersion::V3 => 30,
        }
    }
}

/// Ordered mapping of named numeric features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    values: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn push(&mut self, name: &str, value: f64) {
        self.values.push((name.to_string(), value));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn names(&self) -> Vec<&str> {
        self.values.iter().map(|(n, _)| n.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// Fewer primary candles than this yields an empty vector.
    pub min_primary_candles: usize,
    /// Designated lead asset for cross-market features.
    pub lead_symbol: String,
    pub second_lead_symbol: String,
    /// Reference basket for breadth and average-return features.
    pub basket: Vec<String>,
    pub correlation_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_primary_candles: 50,
            lead_symbol: "BTCUSDT".to_string(),
            second_lead_symbol: "ETHUSDT".to_string(),
            basket: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "BNBUSDT".to_string(),
                "SOLUSDT".to_string(),
                "XRPUSDT".to_string(),
                "ADAUSDT".to_string(),
                "DOGEUSDT".to_string(),
                "AVAXUSDT".to_string(),
            ],
            correlation_window: 24,
        }
    }
}

/// Engineered features plus the reference symbols that had to be degraded
/// to neutral. Callers log the latter.
#[derive(Debug, Clone)]
pub struct EngineeredFeatures {
    pub vector: FeatureVector,
    pub degraded_references: Vec<String>,
}

pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// All reference symbols v3 features may need, for the caller's
    /// fan-out fetch. Deduplicated, lead assets first.
    pub fn reference_symbols(&self) -> Vec<String> {
        let mut symbols = vec![
            self.config.lead_symbol.clone(),
            self.config.second_lead_symbol.clone(),
        ];
        for s in &self.config.basket {
            if !symbols.contains(s) {
                symbols.push(s.clone());
            }
        }
        symbols
    }

    /// Compute the feature vector for `version`.
    ///
    /// `higher` is the coarser-timeframe window (v2+); `references` maps
    /// reference symbols to their windows (v3). Both may be missing or
    /// short; affected slots fill with 0.0.
    pub fn compute(
        &self,
        version: ModelVersion,
        primary: &[Candle],
        higher: Option<&[Candle]>,
        references: &HashMap<String, Vec<Candle>>,
    ) -> EngineeredFeatures {
        if primary.len() < self.config.min_primary_candles {
            debug!(
                "Only {} primary candles (< {}), returning empty feature set",
                primary.len(),
                self.config.min_primary_candles
            );
            return EngineeredFeatures {
                vector: FeatureVector::default(),
                degraded_references: Vec::new(),
            };
        }

        let mut vector = FeatureVector::default();
        let mut degraded = Vec::new();

        self.push_v1(&mut vector, primary);
        if version == ModelVersion::V2 || version == ModelVersion::V3 {
            self.push_v2(&mut vector, higher);
        }
        if version == ModelVersion::V3 {
            self.push_v3(&mut vector, primary, references, &mut degraded);
        }

        debug_assert_eq!(vector.len(), version.feature_count());
        EngineeredFeatures {
            vector,
            degraded_references: degraded,
        }
    }

    fn push_v1(&self, v: &mut FeatureVector, primary: &[Candle]) {
        v.push("rsi_14", indicators::rsi(primary, 14).unwrap_or(0.0));

        let (macd, signal, hist) = indicators::macd(primary).unwrap_or((0.0, 0.0, 0.0));
        v.push("macd", macd);
        v.push("macd_signal", signal);
        v.push("macd_hist", hist);

        v.push("sma_20", indicators::sma(primary, 20).unwrap_or(0.0));
        v.push("sma_50", indicators::sma(primary, 50).unwrap_or(0.0));

        let (upper, middle, lower) =
            indicators::bollinger(primary, 20, 2.0).unwrap_or((0.0, 0.0, 0.0));
        v.push("bb_upper", upper);
        v.push("bb_middle", middle);
        v.push("bb_lower", lower);

        v.push("atr_14", indicators::atr(primary, 14).unwrap_or(0.0));
        v.push("volume", primary.last().map(|c| c.volume).unwrap_or(0.0));
        v.push("volume_sma_20", indicators::volume_sma(primary, 20).unwrap_or(0.0));
        v.push(
            "price_change_pct",
            indicators::momentum_pct(primary, 1).unwrap_or(0.0),
        );
    }

    fn push_v2(&self, v: &mut FeatureVector, higher: Option<&[Candle]>) {
        let htf = higher.unwrap_or(&[]);
        v.push("htf_rsi_14", indicators::rsi(htf, 14).unwrap_or(0.0));

        let (macd, signal, _) = indicators::macd(htf).unwrap_or((0.0, 0.0, 0.0));
        v.push("htf_macd", macd);
        v.push("htf_macd_signal", signal);

        v.push("htf_sma_20", indicators::sma(htf, 20).unwrap_or(0.0));
        v.push("htf_volume_sma_20", indicators::volume_sma(htf, 20).unwrap_or(0.0));
        v.push("htf_atr_14", indicators::atr(htf, 14).unwrap_or(0.0));
    }

    fn push_v3(
        &self,
        v: &mut FeatureVector,
        primary: &[Candle],
        references: &HashMap<String, Vec<Candle>>,
        degraded: &mut Vec<String>,
    ) {
        let cfg = &self.config;
        let min_len = cfg.correlation_window + 1;

        let usable = |symbol: &str| -> Option<&[Candle]> {
            references
                .get(symbol)
                .filter(|w| w.len() >= min_len)
                .map(|w| w.as_slice())
        };

        let lead = usable(&cfg.lead_symbol);
        if lead.is_none() {
            degraded.push(cfg.lead_symbol.clone());
        }
        let lead2 = usable(&cfg.second_lead_symbol);
        if lead2.is_none() {
            degraded.push(cfg.second_lead_symbol.clone());
        }

        for horizon in [1usize, 2, 4, 24] {
            let value = lead.and_then(|w| lagged_return(w, horizon)).unwrap_or(0.0);
            v.push(&format!("lead_return_{}", horizon), value);
        }
        let trend_up = lead
            .map(|w| {
                let last = w[w.len() - 1].close;
                match indicators::sma(w, 5) {
                    Some(ma) if last > ma => 1.0,
                    _ => 0.0,
                }
            })
            .unwrap_or(0.0);
        v.push("lead_trend_up", trend_up);

        for horizon in [1usize, 2] {
            let value = lead2.and_then(|w| lagged_return(w, horizon)).unwrap_or(0.0);
            v.push(&format!("lead2_return_{}", horizon), value);
        }

        // Market-wide features need a quorum of basket assets.
        let mut basket_returns = Vec::new();
        for symbol in &cfg.basket {
            match references.get(symbol).and_then(|w| lagged_return(w, 1)) {
                Some(r) => basket_returns.push(r),
                None => {
                    if !degraded.contains(symbol) {
                        degraded.push(symbol.clone());
                    }
                }
            }
        }
        let (avg_return, breadth) = if basket_returns.len() >= 3 {
            let avg = basket_returns.iter().sum::<f64>() / basket_returns.len() as f64;
            let positive = basket_returns.iter().filter(|r| **r > 0.0).count();
            (avg, positive as f64 / basket_returns.len() as f64)
        } else {
            (0.0, 0.5)
        };
        v.push("market_avg_return", avg_return);
        v.push("market_breadth", breadth);

        let lead_lead2_corr = match (lead, lead2) {
            (Some(a), Some(b)) => {
                indicators::return_correlation(a, b, cfg.correlation_window).unwrap_or(0.0)
            }
            _ => 0.0,
        };
        v.push("lead_lead2_corr_24", lead_lead2_corr);

        let lead_target_corr = lead
            .and_then(|a| indicators::return_correlation(a, primary, cfg.correlation_window))
            .unwrap_or(0.0);
        v.push("lead_target_corr_24", lead_target_corr);
    }
}

/// Fractional return over `horizon` candles.
fn lagged_return(candles: &[Candle], horizon: usize) -> Option<f64> {
    if candles.len() < horizon + 1 {
        return None;
    }
    let last = candles[candles.len() - 1].close;
    let base = candles[candles.len() - 1 - horizon].close;
    if base == 0.0 {
        return None;
    }
    Some(last / base - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::candles_from_closes;

    fn primary_window() -> Vec<Candle> {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1).collect();
        candles_from_closes(&closes)
    }

    fn engineer() -> FeatureEngineer {
        FeatureEngineer::new(FeatureConfig::default())
    }

    #[test]
    fn test_v1_has_13_features() {
        let out = engineer().compute(ModelVersion::V1, &primary_window(), None, &HashMap::new());
        assert_eq!(out.vector.len(), 13);
        assert!(out.vector.get("rsi_14").unwrap() > 0.0);
        assert!(out.vector.get("sma_50").unwrap() > 0.0);
        assert!(out.degraded_references.is_empty());
    }

    #[test]
    fn test_v2_missing_higher_timeframe_fills_neutral() {
        let out = engineer().compute(ModelVersion::V2, &primary_window(), None, &HashMap::new());
        assert_eq!(out.vector.len(), 19);
        assert_eq!(out.vector.get("htf_rsi_14"), Some(0.0));
        assert_eq!(out.vector.get("htf_atr_14"), Some(0.0));
        // v1 slots unaffected.
        assert!(out.vector.get("atr_14").unwrap() > 0.0);
    }

    #[test]
    fn test_v3_empty_references_all_neutral_except_breadth() {
        let eng = engineer();
        let primary = primary_window();
        let v2 = eng.compute(ModelVersion::V2, &primary, None, &HashMap::new());
        let v3 = eng.compute(ModelVersion::V3, &primary, None, &HashMap::new());

        assert_eq!(v3.vector.len(), 30);
        for (name, value) in v3.vector.iter().skip(19) {
            if name == "market_breadth" {
                assert_eq!(value, 0.5, "breadth should default to neutral 0.5");
            } else {
                assert_eq!(value, 0.0, "{} should be neutral", name);
            }
        }
        // The v2 prefix is unchanged by the degraded cross-asset block.
        for (a, b) in v2.vector.iter().zip(v3.vector.iter().take(19)) {
            assert_eq!(a, b);
        }
        // Every reference symbol is reported for the caller to log.
        assert!(v3
            .degraded_references
            .contains(&"BTCUSDT".to_string()));
        assert!(v3.degraded_references.len() >= 8);
    }

    #[test]
    fn test_v3_with_references_populates_cross_features() {
        let eng = engineer();
        let primary = primary_window();

        let mut refs = HashMap::new();
        let lead_closes: Vec<f64> = (0..40).map(|i| 100.0 * 1.002f64.powi(i)).collect();
        for symbol in eng.reference_symbols() {
            refs.insert(symbol, candles_from_closes(&lead_closes));
        }

        let out = eng.compute(ModelVersion::V3, &primary, None, &refs);
        assert!(out.degraded_references.is_empty());
        assert!(out.vector.get("lead_return_1").unwrap() > 0.0);
        assert_eq!(out.vector.get("lead_trend_up"), Some(1.0));
        assert_eq!(out.vector.get("market_breadth"), Some(1.0));
        // Identical lead windows correlate perfectly.
        assert!((out.vector.get("lead_lead2_corr_24").unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_quorum_of_two_is_not_enough() {
        let eng = engineer();
        let primary = primary_window();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();

        let mut refs = HashMap::new();
        refs.insert("BTCUSDT".to_string(), candles_from_closes(&closes));
        refs.insert("ETHUSDT".to_string(), candles_from_closes(&closes));

        let out = eng.compute(ModelVersion::V3, &primary, None, &refs);
        assert_eq!(out.vector.get("market_breadth"), Some(0.5));
        assert_eq!(out.vector.get("market_avg_return"), Some(0.0));
        // Lead features still populate from the two usable windows.
        assert!(out.vector.get("lead_return_1").unwrap() > 0.0);
    }

    #[test]
    fn test_insufficient_primary_data_returns_empty() {
        let closes = vec![100.0; 49];
        let out = engineer().compute(
            ModelVersion::V3,
            &candles_from_closes(&closes),
            None,
            &HashMap::new(),
        );
        assert!(out.vector.is_empty());
    }

    #[test]
    fn test_slot_order_is_stable() {
        let out = engineer().compute(ModelVersion::V3, &primary_window(), None, &HashMap::new());
        let names = out.vector.names();
        assert_eq!(names[0], "rsi_14");
        assert_eq!(names[12], "price_change_pct");
        assert_eq!(names[13], "htf_rsi_14");
        assert_eq!(names[19], "lead_return_1");
        assert_eq!(names[29], "lead_target_corr_24");
    }
}
