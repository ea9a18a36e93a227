//! Sentiment judge: prompts a language model with market context and
//! normalizes the reply. This judge never abstains and never blocks the
//! pipeline; every failure path degrades to NEUTRAL at confidence 50 with
//! the failure named in the explanation.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use common::{SentimentLabel, SignalType};
use lru::LruCache;

use crate::llm::LlmProvider;
use crate::parsing;

/// Market context handed to the prompt builder.
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_24h_pct: f64,
    pub rsi_14: f64,
    pub macd_hist: f64,
    pub trend_score: f64,
    pub signal_type: SignalType,
    pub entry_price: f64,
    pub stop_loss_price: f64,
    pub profit_target_price: f64,
    pub reward_risk_ratio: f64,
}

/// The judge's opinion. Always a value, never an absence.
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentOpinion {
    pub label: SentimentLabel,
    /// 0-100.
    pub confidence: f64,
    pub explanation: String,
    /// Set when the opinion is a degradation, naming the failure class.
    pub degraded: bool,
}

impl SentimentOpinion {
    fn degraded(reason: &str) -> Self {
        Self {
            label: SentimentLabel::Neutral,
            confidence: 50.0,
            explanation: format!("Sentiment unavailable: {}", reason),
            degraded: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentimentConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 512,
        }
    }
}

struct CacheEntry {
    opinion: SentimentOpinion,
    stored_at: Instant,
}

pub struct SentimentScorer {
    provider: Arc<dyn LlmProvider>,
    config: SentimentConfig,
    cache: Mutex<LruCache<String, CacheEntry>>,
    calls: AtomicU64,
}

impl SentimentScorer {
    pub fn new(provider: Arc<dyn LlmProvider>, config: SentimentConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.cache_capacity.max(1)).expect("capacity is at least 1");
        Self {
            provider,
            config,
            cache: Mutex::new(LruCache::new(capacity)),
            calls: AtomicU64::new(0),
        }
    }

    /// Advisory count of actual provider calls (cache hits excluded).
    pub fn provider_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Analyze market sentiment. Total function: degrades, never errors.
    pub async fn analyze(&self, ctx: &MarketContext) -> SentimentOpinion {
        let key = cache_key(ctx);

        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.stored_at.elapsed() < self.config.cache_ttl {
                    debug!("Sentiment cache hit for {}", ctx.symbol);
                    return entry.opinion.clone();
                }
                cache.pop(&key);
            }
        }

        let opinion = self.analyze_uncached(ctx).await;

        // Degraded opinions are not cached; the next cycle should retry
        // the provider instead of replaying the failure for the TTL.
        if !opinion.degraded {
            let mut cache = self.cache.lock().await;
            cache.put(
                key,
                CacheEntry {
                    opinion: opinion.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
        opinion
    }

    async fn analyze_uncached(&self, ctx: &MarketContext) -> SentimentOpinion {
        let prompt = build_prompt(ctx);

        let mut last_error = String::new();
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let delay = self.config.backoff_base * 2u32.pow(attempt - 1);
                debug!(
                    "Retrying sentiment for {} (attempt {}) after {:?}",
                    ctx.symbol,
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.provider.complete(&prompt).await {
                Ok(text) => {
                    return match parsing::parse_sentiment(&text) {
                        Some(parsed) => SentimentOpinion {
                            label: parsed.label,
                            confidence: parsed.confidence,
                            explanation: parsed.explanation,
                            degraded: false,
                        },
                        None => {
                            warn!("Unparseable sentiment response for {}", ctx.symbol);
                            SentimentOpinion::degraded("unparseable model response")
                        }
                    };
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Transient sentiment failure for {} (attempt {}): {}",
                        ctx.symbol,
                        attempt + 1,
                        e
                    );
                    last_error = e.to_string();
                }
                Err(e) => {
                    // Quota and provider-reported failures are final.
                    warn!("Sentiment provider failure for {}: {}", ctx.symbol, e);
                    return SentimentOpinion::degraded(&e.to_string());
                }
            }
        }

        SentimentOpinion::degraded(&format!(
            "retries exhausted after {} attempts: {}",
            self.config.max_attempts, last_error
        ))
    }
}

fn cache_key(ctx: &MarketContext) -> String {
    format!(
        "{}|{:.4}|{}",
        ctx.symbol,
        ctx.last_price,
        ctx.signal_type.as_str()
    )
}

fn build_prompt(ctx: &MarketContext) -> String {
    format!(
        "Analyze the short-term sentiment for {symbol}.\n\
         \n\
         Market snapshot:\n\
         - Last price: {price:.4}\n\
         - 24h change: {change:+.2}%\n\
         - RSI(14): {rsi:.1}\n\
         - MACD histogram: {macd:.4}\n\
         - Rule-based trend score: {trend:.0}/100\n\
         \n\
         Proposed trade ({signal}):\n\
         - Entry {entry:.4}, stop {stop:.4}, target {target:.4}\n\
         - Reward:risk {rr:.2}\n\
         \n\
         Respond with a JSON object only:\n\
         {{\"sentiment\": \"BULLISH\"|\"BEARISH\"|\"NEUTRAL\", \
         \"confidence\": 0-100, \"explanation\": \"one or two sentences\"}}",
        symbol = ctx.symbol,
        price = ctx.last_price,
        change = ctx.price_change_24h_pct,
        rsi = ctx.rsi_14,
        macd = ctx.macd_hist,
        trend = ctx.trend_score,
        signal = ctx.signal_type.as_str(),
        entry = ctx.entry_price,
        stop = ctx.stop_loss_price,
        target = ctx.profit_target_price,
        rr = ctx.reward_risk_ratio,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn context() -> MarketContext {
        MarketContext {
            symbol: "BTCUSDT".to_string(),
            last_price: 43250.5,
            price_change_24h_pct: 2.4,
            rsi_14: 58.0,
            macd_hist: 12.5,
            trend_score: 75.0,
            signal_type: SignalType::PullbackBuy,
            entry_price: 43250.5,
            stop_loss_price: 42000.0,
            profit_target_price: 45500.0,
            reward_risk_ratio: 1.8,
        }
    }

    /// Provider that plays a fixed script of results.
    struct ScriptedProvider {
        script: Mutex<Vec<Result<String, LlmError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.script
                .lock()
                .await
                .pop()
                .unwrap_or(Err(LlmError::Provider("script exhausted".to_string())))
        }
    }

    fn fast_config() -> SentimentConfig {
        SentimentConfig {
            backoff_base: Duration::from_millis(1),
            ..SentimentConfig::default()
        }
    }

    fn bullish_json() -> String {
        r#"{"sentiment": "BULLISH", "confidence": 70, "explanation": "momentum intact"}"#
            .to_string()
    }

    #[tokio::test]
    async fn test_happy_path() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(bullish_json())]));
        let scorer = SentimentScorer::new(provider, fast_config());
        let opinion = scorer.analyze(&context()).await;
        assert_eq!(opinion.label, SentimentLabel::Bullish);
        assert_eq!(opinion.confidence, 70.0);
        assert!(!opinion.degraded);
    }

    #[tokio::test]
    async fn test_timeout_then_success_retries() {
        // Script pops from the back: timeout first, then success.
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(bullish_json()),
            Err(LlmError::Timeout),
        ]));
        let scorer = SentimentScorer::new(provider.clone(), fast_config());
        let opinion = scorer.analyze(&context()).await;
        assert_eq!(opinion.label, SentimentLabel::Bullish);
        assert_eq!(provider.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_quota_error_fails_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(bullish_json()), // would succeed on retry, must not be reached
            Err(LlmError::Quota),
        ]));
        let scorer = SentimentScorer::new(provider.clone(), fast_config());
        let opinion = scorer.analyze(&context()).await;
        assert_eq!(opinion.label, SentimentLabel::Neutral);
        assert_eq!(opinion.confidence, 50.0);
        assert!(opinion.degraded);
        assert!(opinion.explanation.contains("quota"));
        assert_eq!(provider.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::Timeout),
            Err(LlmError::Timeout),
            Err(LlmError::Timeout),
        ]));
        let scorer = SentimentScorer::new(provider.clone(), fast_config());
        let opinion = scorer.analyze(&context()).await;
        assert!(opinion.degraded);
        assert_eq!(opinion.label, SentimentLabel::Neutral);
        assert!(opinion.explanation.contains("retries exhausted"));
        assert_eq!(provider.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_unparseable_response_degrades_without_retry() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            "I cannot analyze this market.".to_string()
        )]));
        let scorer = SentimentScorer::new(provider, fast_config());
        let opinion = scorer.analyze(&context()).await;
        assert!(opinion.degraded);
        assert!(opinion.explanation.contains("unparseable"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::Quota), // would degrade if the cache missed
            Ok(bullish_json()),
        ]));
        let scorer = SentimentScorer::new(provider.clone(), fast_config());

        let first = scorer.analyze(&context()).await;
        let second = scorer.analyze(&context()).await;
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::Relaxed), 1);
        assert_eq!(scorer.provider_calls(), 1);
    }

    #[tokio::test]
    async fn test_degraded_result_not_cached() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(bullish_json()),
            Err(LlmError::Quota),
        ]));
        let scorer = SentimentScorer::new(provider.clone(), fast_config());

        let first = scorer.analyze(&context()).await;
        assert!(first.degraded);
        let second = scorer.analyze(&context()).await;
        assert!(!second.degraded);
        assert_eq!(provider.calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_prompt_contains_context() {
        let prompt = build_prompt(&context());
        assert!(prompt.contains("BTCUSDT"));
        assert!(prompt.contains("PULLBACK_BUY"));
        assert!(prompt.contains("43250.5"));
        assert!(prompt.contains("\"sentiment\""));
    }

    #[test]
    fn test_cache_key_changes_with_price() {
        let ctx = context();
        let mut moved = context();
        moved.last_price += 1.0;
        assert_ne!(cache_key(&ctx), cache_key(&moved));
    }
}
