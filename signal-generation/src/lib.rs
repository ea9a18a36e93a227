//! Deterministic half of the pipeline: market filtering, entry/exit
//! pricing and feature engineering. Everything here is either pure or
//! degrades per source; nothing in this crate aborts a cycle.

pub mod entry_planner;
pub mod features;
pub mod indicators;
pub mod market_filter;

pub use entry_planner::{EntryPlanner, PlannerConfig, TradeProposal};
pub use features::{
    EngineeredFeatures, FeatureConfig, FeatureEngineer, FeatureVector, ModelVersion,
};
pub use market_filter::{FilterConfig, MarketCandidate, MarketFilter};
