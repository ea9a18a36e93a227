//! Orchestrator: one periodic pass over the configured markets.
//!
//! Per pass: filter -> plan -> engineer features -> score (both judges) ->
//! arbitrate -> persist -> publish. Markets run with bounded concurrency
//! and an individual deadline; one slow or failing market is logged and
//! skipped, never its siblings. The v3 reference fetch fans out per
//! reference symbol and fans back in with wait-all semantics, degrading
//! failed slots to neutral.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::{Candle, Decision, DecisionOutcome, Timeframe};
use data_ingestion::MarketDataProvider;
use scoring_adapters::{MarketContext, SentimentScorer, StatisticalScorer};
use signal_generation::{
    indicators, EntryPlanner, FeatureEngineer, MarketCandidate, MarketFilter, ModelVersion,
    TradeProposal,
};

use crate::arbiter::DecisionArbiter;
use crate::publisher::EventPublisher;
use crate::storage::DecisionStore;
use crate::weights::WeightsCache;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub candle_limit: usize,
    pub model_version: ModelVersion,
    pub cycle_interval: Duration,
    pub pass_deadline: Duration,
    pub market_deadline: Duration,
    pub max_concurrent_markets: usize,
    pub reference_fetch_pool: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            timeframe: Timeframe::H1,
            candle_limit: 200,
            model_version: ModelVersion::V3,
            cycle_interval: Duration::from_secs(300),
            pass_deadline: Duration::from_secs(120),
            market_deadline: Duration::from_secs(30),
            max_concurrent_markets: 4,
            reference_fetch_pool: 4,
        }
    }
}

/// All pipeline stages behind one shareable handle; tasks clone the Arc.
pub struct Pipeline {
    pub market_data: Arc<dyn MarketDataProvider>,
    pub filter: MarketFilter,
    pub planner: EntryPlanner,
    pub engineer: FeatureEngineer,
    pub statistical: Arc<StatisticalScorer>,
    pub sentiment: SentimentScorer,
    pub arbiter: DecisionArbiter,
    pub weights: WeightsCache,
    pub store: Arc<dyn DecisionStore>,
    pub publisher: EventPublisher,
}

impl Pipeline {
    /// Analyze one qualifying candidate end to end. Returns None when the
    /// planner finds no entry. Judge failures degrade inside their
    /// adapters; only storage failures propagate.
    pub async fn analyze_market(
        &self,
        candidate: &MarketCandidate,
        config: &OrchestratorConfig,
    ) -> Result<Option<Decision>> {
        let proposal = match self.planner.plan(candidate) {
            Some(proposal) => proposal,
            None => {
                debug!("{}: no entry setup this cycle", candidate.symbol);
                return Ok(None);
            }
        };

        let higher = self.fetch_higher_timeframe(candidate, config).await;
        let references = if config.model_version == ModelVersion::V3 {
            self.fetch_references(config).await
        } else {
            HashMap::new()
        };

        let engineered = self.engineer.compute(
            config.model_version,
            &candidate.candles,
            higher.as_deref(),
            &references,
        );
        if !engineered.degraded_references.is_empty() {
            warn!(
                "{}: reference features degraded to neutral for {:?}",
                candidate.symbol, engineered.degraded_references
            );
        }

        let statistical_score = self.statistical.score(&engineered.vector);
        if statistical_score.is_none() {
            debug!("{}: statistical judge abstained", candidate.symbol);
        }

        let sentiment = self
            .sentiment
            .analyze(&market_context(candidate, &proposal, &engineered.vector))
            .await;

        let verdict = match self.weights.get().await {
            Ok(weights) => self.arbiter.arbitrate(
                proposal.rule_score,
                statistical_score,
                sentiment.label,
                sentiment.confidence,
                &weights,
            ),
            Err(e) => {
                error!("Active weights unavailable: {:#}", e);
                self.arbiter.config_failure(&format!("weights unavailable: {}", e))
            }
        };

        let decision = Decision {
            id: Uuid::new_v4(),
            symbol: candidate.symbol.clone(),
            created_at: Utc::now(),
            signal_type: proposal.signal_type,
            entry_price: proposal.entry_price,
            stop_loss_price: proposal.stop_loss_price,
            profit_target_price: proposal.profit_target_price,
            risk_unit: proposal.risk_unit,
            reward_risk_ratio: proposal.reward_risk_ratio,
            suggested_position_weight: proposal.suggested_position_weight,
            onchain_signals: candidate.onchain_signals.clone(),
            rule_score: proposal.rule_score,
            statistical_score,
            sentiment_label: Some(sentiment.label),
            sentiment_score: Some(verdict.sentiment_score),
            final_decision: Some(verdict.outcome),
            final_score: Some(verdict.final_score),
            ml_unavailable: verdict.ml_unavailable,
            explanation: format!("{} | sentiment: {}", verdict.explanation, sentiment.explanation),
            rejection_reason: verdict.rejection_reason.map(|r| r.to_string()),
        };

        self.store
            .store(&decision)
            .await
            .with_context(|| format!("failed to persist decision for {}", candidate.symbol))?;

        // Best-effort; the persisted decision stands even if this fails.
        let published = self.publisher.publish(&decision).await;
        info!(
            "{}: {:?} (final {:.2}, published: {})",
            decision.symbol,
            verdict.outcome,
            verdict.final_score,
            published
        );

        Ok(Some(decision))
    }

    async fn fetch_higher_timeframe(
        &self,
        candidate: &MarketCandidate,
        config: &OrchestratorConfig,
    ) -> Option<Vec<Candle>> {
        if config.model_version == ModelVersion::V1 {
            return None;
        }
        let coarser = config.timeframe.coarser();
        match self
            .market_data
            .get_candles(&candidate.symbol, coarser, None, None, config.candle_limit)
            .await
        {
            Ok(candles) => Some(candles),
            Err(e) => {
                warn!(
                    "{}: higher-timeframe fetch failed, features degrade: {:#}",
                    candidate.symbol, e
                );
                None
            }
        }
    }

    /// Fan out one fetch per reference symbol, bounded by the configured
    /// pool, and wait for all of them. Failures degrade that symbol's
    /// features; they never cancel the siblings.
    async fn fetch_references(&self, config: &OrchestratorConfig) -> HashMap<String, Vec<Candle>> {
        let semaphore = Arc::new(Semaphore::new(config.reference_fetch_pool.max(1)));
        let mut tasks = JoinSet::new();

        for symbol in self.engineer.reference_symbols() {
            let market_data = self.market_data.clone();
            let semaphore = semaphore.clone();
            let timeframe = config.timeframe;
            let limit = config.candle_limit;
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let result = market_data
                    .get_candles(&symbol, timeframe, None, None, limit)
                    .await;
                (symbol, result)
            });
        }

        let mut references = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, Ok(candles))) => {
                    references.insert(symbol, candles);
                }
                Ok((symbol, Err(e))) => {
                    warn!("Reference fetch failed for {}: {:#}", symbol, e);
                }
                Err(e) => {
                    warn!("Reference fetch task failed: {}", e);
                }
            }
        }
        references
    }
}

fn market_context(
    candidate: &MarketCandidate,
    proposal: &TradeProposal,
    features: &signal_generation::FeatureVector,
) -> MarketContext {
    let candles = &candidate.candles;
    MarketContext {
        symbol: candidate.symbol.clone(),
        last_price: candles.last().map(|c| c.close).unwrap_or(0.0),
        price_change_24h_pct: indicators::momentum_pct(candles, 24).unwrap_or(0.0),
        rsi_14: features
            .get("rsi_14")
            .or_else(|| indicators::rsi(candles, 14))
            .unwrap_or(50.0),
        macd_hist: features.get("macd_hist").unwrap_or(0.0),
        trend_score: candidate.trend_score,
        signal_type: proposal.signal_type,
        entry_price: proposal.entry_price,
        stop_loss_price: proposal.stop_loss_price,
        profit_target_price: proposal.profit_target_price,
        reward_risk_ratio: proposal.reward_risk_ratio,
    }
}

pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<Pipeline>, config: OrchestratorConfig) -> Self {
        Self { pipeline, config }
    }

    /// Run forever on the configured interval. Each pass gets an overall
    /// deadline; an overrun is logged and the next tick starts fresh.
    pub async fn run(&self) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.cycle_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "Orchestrator started: {} markets every {:?}",
            self.config.symbols.len(),
            self.config.cycle_interval
        );

        loop {
            interval.tick().await;
            match timeout(self.config.pass_deadline, self.run_cycle()).await {
                Ok(outcomes) => {
                    let (approved, rejected) = outcomes;
                    info!("Cycle complete: {} approved, {} rejected", approved, rejected);
                }
                Err(_) => {
                    error!("Cycle exceeded deadline {:?}, abandoned", self.config.pass_deadline);
                }
            }
        }
    }

    /// One full pass. Returns (approved, rejected) counts.
    pub async fn run_cycle(&self) -> (usize, usize) {
        let candidates = self
            .pipeline
            .filter
            .filter(&self.config.symbols, self.config.timeframe, self.config.candle_limit)
            .await;
        info!("{} candidates qualified this cycle", candidates.len());

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_markets.max(1)));
        let mut tasks = JoinSet::new();

        for candidate in candidates {
            let pipeline = self.pipeline.clone();
            let config = self.config.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let symbol = candidate.symbol.clone();
                match timeout(
                    config.market_deadline,
                    pipeline.analyze_market(&candidate, &config),
                )
                .await
                {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(e)) => {
                        error!("{}: analysis failed: {:#}", symbol, e);
                        None
                    }
                    Err(_) => {
                        warn!("{}: exceeded market deadline, skipped", symbol);
                        None
                    }
                }
            });
        }

        let mut approved = 0;
        let mut rejected = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(decision)) => match decision.final_decision {
                    Some(DecisionOutcome::Approved) => approved += 1,
                    _ => rejected += 1,
                },
                Ok(None) => {}
                Err(e) => error!("Market task panicked: {}", e),
            }
        }
        (approved, rejected)
    }
}
