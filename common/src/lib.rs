//! Shared domain types and configuration for the decision-fusion pipeline.

pub mod config;
pub mod types;

pub use config::AppConfig;
pub use types::{
    Candle, Decision, DecisionOutcome, OnchainSummary, SentimentLabel, SignalType, Timeframe,
};
