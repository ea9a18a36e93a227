//! Core domain types shared across the pipeline crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One OHLCV record for a fixed time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle interval supported by the market-data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Interval string understood by the kline endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// The next-coarser timeframe, used for higher-timeframe features.
    /// D1 is the coarsest we deal in and maps to itself.
    pub fn coarser(&self) -> Timeframe {
        match self {
            Timeframe::M15 => Timeframe::H1,
            Timeframe::H1 => Timeframe::H4,
            Timeframe::H4 => Timeframe::D1,
            Timeframe::D1 => Timeframe::D1,
        }
    }
}

/// Summary of on-chain activity signals for one base asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnchainSummary {
    pub large_transfers_count: u32,
    /// Net token flow into exchanges; negative means net outflow.
    pub exchange_netflow: f64,
    pub smart_money_flow: f64,
    /// Active-address growth in percent over the lookback window.
    pub active_addresses_growth: f64,
}

/// Entry signal type emitted by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    PullbackBuy,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::PullbackBuy => "PULLBACK_BUY",
        }
    }
}

/// Sentiment label produced by the language-model judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentimentLabel {
    Bullish,
    Bearish,
    Neutral,
}

impl SentimentLabel {
    /// Coerce a free-form label to a known variant; anything unrecognized
    /// is treated as neutral.
    pub fn from_label(raw: &str) -> SentimentLabel {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BULLISH" | "POSITIVE" | "BUY" => SentimentLabel::Bullish,
            "BEARISH" | "NEGATIVE" | "SELL" => SentimentLabel::Bearish,
            _ => SentimentLabel::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Bullish => "BULLISH",
            SentimentLabel::Bearish => "BEARISH",
            SentimentLabel::Neutral => "NEUTRAL",
        }
    }
}

/// Final verdict of the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Approved,
    Rejected,
}

/// The persisted unit of record for one market's analysis pass.
///
/// Created once per analyzed market per cycle, enriched during the single
/// pass (scores, verdict), then never touched again after publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub symbol: String,
    pub created_at: DateTime<Utc>,
    pub signal_type: SignalType,

    pub entry_price: f64,
    pub stop_loss_price: f64,
    pub profit_target_price: f64,
    pub risk_unit: f64,
    pub reward_risk_ratio: f64,
    pub suggested_position_weight: f64,

    pub onchain_signals: OnchainSummary,

    pub rule_score: f64,
    pub statistical_score: Option<f64>,
    pub sentiment_label: Option<SentimentLabel>,
    pub sentiment_score: Option<f64>,

    pub final_decision: Option<DecisionOutcome>,
    pub final_score: Option<f64>,
    pub ml_unavailable: bool,
    pub explanation: String,
    pub rejection_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_coarser_mapping() {
        assert_eq!(Timeframe::M15.coarser(), Timeframe::H1);
        assert_eq!(Timeframe::H1.coarser(), Timeframe::H4);
        assert_eq!(Timeframe::H4.coarser(), Timeframe::D1);
        assert_eq!(Timeframe::D1.coarser(), Timeframe::D1);
    }

    #[test]
    fn test_sentiment_label_coercion() {
        assert_eq!(SentimentLabel::from_label("bullish"), SentimentLabel::Bullish);
        assert_eq!(SentimentLabel::from_label(" BEARISH "), SentimentLabel::Bearish);
        assert_eq!(SentimentLabel::from_label("sideways"), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_label(""), SentimentLabel::Neutral);
    }

    #[test]
    fn test_label_serde_screaming_case() {
        let json = serde_json::to_string(&SentimentLabel::Bullish).unwrap();
        assert_eq!(json, "\"BULLISH\"");
        let back: SentimentLabel = serde_json::from_str("\"NEUTRAL\"").unwrap();
        assert_eq!(back, SentimentLabel::Neutral);
    }
}
