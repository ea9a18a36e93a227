//! Outbound event publication: versioned payload, per-outcome channel
//! routing and bounded retry. Publication is best-effort; the decision is
//! already persisted and a failed publish never rolls it back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use common::{Decision, DecisionOutcome, OnchainSummary, SentimentLabel, SignalType};

pub const SCHEMA_VERSION: &str = "1.0";

/// Versioned wire payload. Field names are a contract with downstream
/// consumers; treat every change as a schema version bump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub decision_id: Uuid,
    pub market: String,
    pub signal_type: SignalType,
    pub entry_price: f64,
    pub stop_loss_price: f64,
    pub profit_target_price: f64,
    pub risk_unit: f64,
    pub suggested_position_weight: f64,
    pub reward_risk_ratio: f64,
    pub onchain_signals: OnchainSummary,
    pub rule_score: f64,
    pub statistical_score: Option<f64>,
    pub sentiment_label: Option<SentimentLabel>,
    pub final_decision: Option<DecisionOutcome>,
    pub explanation: String,
    pub rejection_reason: Option<String>,
}

impl DecisionEvent {
    pub fn from_decision(decision: &Decision) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            decision_id: decision.id,
            market: decision.symbol.clone(),
            signal_type: decision.signal_type,
            entry_price: decision.entry_price,
            stop_loss_price: decision.stop_loss_price,
            profit_target_price: decision.profit_target_price,
            risk_unit: decision.risk_unit,
            suggested_position_weight: decision.suggested_position_weight,
            reward_risk_ratio: decision.reward_risk_ratio,
            onchain_signals: decision.onchain_signals.clone(),
            rule_score: decision.rule_score,
            statistical_score: decision.statistical_score,
            sentiment_label: decision.sentiment_label,
            final_decision: decision.final_decision,
            explanation: decision.explanation.clone(),
            rejection_reason: decision.rejection_reason.clone(),
        }
    }
}

/// Transport seam for the pub/sub broker.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}

/// Redis pub/sub sink; one PUBLISH per event.
pub struct RedisEventSink {
    connection: redis::aio::ConnectionManager,
}

impl RedisEventSink {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let connection = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl EventSink for RedisEventSink {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<i64>(&mut connection)
            .await
            .with_context(|| format!("redis publish to {} failed", channel))?;
        Ok(())
    }
}

/// Captures published events for tests and dry runs.
#[derive(Default)]
pub struct InMemoryEventSink {
    pub published: Mutex<Vec<(String, String)>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.published
            .lock()
            .await
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub approved_channel: String,
    pub rejected_channel: String,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            approved_channel: "signals.approved".to_string(),
            rejected_channel: "signals.rejected".to_string(),
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
        }
    }
}

pub struct EventPublisher {
    sink: std::sync::Arc<dyn EventSink>,
    config: PublisherConfig,
}

impl EventPublisher {
    pub fn new(sink: std::sync::Arc<dyn EventSink>, config: PublisherConfig) -> Self {
        Self { sink, config }
    }

    /// Serialize and route the decision. Returns false when every attempt
    /// failed; the caller keeps the persisted decision either way.
    pub async fn publish(&self, decision: &Decision) -> bool {
        let event = DecisionEvent::from_decision(decision);
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize decision {}: {}", decision.id, e);
                return false;
            }
        };

        // Routing is purely by outcome. A decision without a verdict
        // should not reach us post-arbitration; route it to the approved
        // channel for backward compatibility and flag it.
        let channel = match decision.final_decision {
            Some(DecisionOutcome::Approved) => &self.config.approved_channel,
            Some(DecisionOutcome::Rejected) => &self.config.rejected_channel,
            None => {
                warn!(
                    "Decision {} has no final verdict, routing to approved channel",
                    decision.id
                );
                &self.config.approved_channel
            }
        };

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let delay = self.config.backoff_base * 2u32.pow(attempt - 1);
                debug!(
                    "Retrying publish of {} (attempt {}) after {:?}",
                    decision.id,
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            match self.sink.publish(channel, &payload).await {
                Ok(()) => {
                    debug!("Published decision {} to {}", decision.id, channel);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Publish attempt {} for {} failed: {:#}",
                        attempt + 1,
                        decision.id,
                        e
                    );
                }
            }
        }

        error!(
            "Publish of decision {} to {} failed after {} attempts",
            decision.id, channel, self.config.max_attempts
        );
        false
    }
}
