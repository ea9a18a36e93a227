//! External data providers consumed by the pipeline: candle history and
//! on-chain analytics. Both are trait seams; the HTTP implementations here
//! are thin and every caller is expected to degrade on error rather than
//! abort (candle failure skips the market, on-chain failure zeroes the
//! bonus score).

pub mod market_data;
pub mod onchain;

pub use market_data::{KlineClient, MarketDataProvider, StaticMarketData};
pub use onchain::{HttpOnchainClient, NullOnchainProvider, OnchainProvider};
