use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber;

use data_ingestion::{HttpOnchainClient, KlineClient};
use decision_engine::{
    ArbitrationWeights, DecisionArbiter, EventPublisher, InMemoryDecisionStore,
    InMemoryWeightsStore, Orchestrator, OrchestratorConfig, Pipeline, PublisherConfig,
    RedisEventSink, WeightsCache,
};
use scoring_adapters::{
    LlmClientConfig, OpenAiCompatClient, SentimentConfig, SentimentScorer, StatisticalScorer,
};
use signal_generation::{
    EntryPlanner, FeatureConfig, FeatureEngineer, FilterConfig, MarketFilter, ModelVersion,
    PlannerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("🚀 Starting Decision Fusion Service");

    let config = common::AppConfig::load(std::env::args().nth(1).as_deref())?;
    let timeframe = config.timeframe()?;
    let model_version = ModelVersion::from_u32(config.model_version)
        .ok_or_else(|| anyhow::anyhow!("unknown model version {}", config.model_version))?;

    let market_data = Arc::new(KlineClient::new(
        &config.market_data.base_url,
        Duration::from_secs(config.market_data.timeout_secs),
    )?);
    let onchain = Arc::new(HttpOnchainClient::new(
        &config.onchain.base_url,
        Duration::from_secs(config.onchain.timeout_secs),
    )?);

    let statistical = Arc::new(StatisticalScorer::load(
        Path::new(&config.model.artifact_path),
        Path::new(&config.model.manifest_path),
    ));
    if !statistical.is_ready() {
        warn!("Statistical judge not ready, its weight will be redistributed");
    }

    let llm = OpenAiCompatClient::new(LlmClientConfig {
        base_url: config.llm.base_url.clone(),
        api_key: config.llm.api_key.clone(),
        model: config.llm.model.clone(),
        timeout: Duration::from_secs(config.llm.timeout_secs),
        ..LlmClientConfig::default()
    })
    .map_err(|e| anyhow::anyhow!("llm client init failed: {}", e))?;
    let sentiment = SentimentScorer::new(Arc::new(llm), SentimentConfig::default());

    let sink = Arc::new(RedisEventSink::connect(&config.publisher.redis_url).await?);
    let publisher = EventPublisher::new(
        sink,
        PublisherConfig {
            approved_channel: config.publisher.approved_channel.clone(),
            rejected_channel: config.publisher.rejected_channel.clone(),
            ..PublisherConfig::default()
        },
    );

    // TODO: back the weights store with Redis once the tuning service
    // starts writing versioned weight sets there.
    let weights = WeightsCache::new(Arc::new(InMemoryWeightsStore::new(
        ArbitrationWeights::default(),
    )));

    let pipeline = Arc::new(Pipeline {
        market_data: market_data.clone(),
        filter: MarketFilter::new(FilterConfig::default(), market_data, onchain),
        planner: EntryPlanner::new(PlannerConfig::default()),
        engineer: FeatureEngineer::new(FeatureConfig::default()),
        statistical,
        sentiment,
        arbiter: DecisionArbiter::default(),
        weights,
        store: Arc::new(InMemoryDecisionStore::new()),
        publisher,
    });

    let orchestrator = Orchestrator::new(
        pipeline,
        OrchestratorConfig {
            symbols: config.symbols.clone(),
            timeframe,
            candle_limit: config.candle_limit,
            model_version,
            cycle_interval: Duration::from_secs(config.orchestrator.cycle_interval_secs),
            pass_deadline: Duration::from_secs(config.orchestrator.pass_deadline_secs),
            market_deadline: Duration::from_secs(config.orchestrator.market_deadline_secs),
            max_concurrent_markets: config.orchestrator.max_concurrent_markets,
            reference_fetch_pool: config.orchestrator.reference_fetch_pool,
        },
    );

    tokio::select! {
        result = orchestrator.run() => {
            result?
        }
        _ = tokio::signal::ctrl_c() => {
            info!("👋 Shutting down gracefully...");
        }
    }

    Ok(())
}
