// Decision persistence boundary. The real store lives in another service;
// this seam covers what the pipeline needs: write once, query back.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use common::Decision;

#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Persist a finished decision. Decisions are immutable; storing the
    /// same id twice overwrites with identical content.
    async fn store(&self, decision: &Decision) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Decision>>;

    async fn get_by_symbol(&self, symbol: &str) -> Result<Vec<Decision>>;

    /// Most recent decisions, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Decision>>;
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryDecisionStore {
    decisions: RwLock<HashMap<Uuid, Decision>>,
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn store(&self, decision: &Decision) -> Result<()> {
        self.decisions
            .write()
            .await
            .insert(decision.id, decision.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Decision>> {
        Ok(self.decisions.read().await.get(&id).cloned())
    }

    async fn get_by_symbol(&self, symbol: &str) -> Result<Vec<Decision>> {
        Ok(self
            .decisions
            .read()
            .await
            .values()
            .filter(|d| d.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Decision>> {
        let mut all: Vec<Decision> = self.decisions.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::{OnchainSummary, SignalType};

    fn decision(symbol: &str, age_minutes: i64) -> Decision {
        Decision {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            created_at: Utc::now() - Duration::minutes(age_minutes),
            signal_type: SignalType::PullbackBuy,
            entry_price: 100.0,
            stop_loss_price: 95.0,
            profit_target_price: 110.0,
            risk_unit: 5.0,
            reward_risk_ratio: 2.0,
            suggested_position_weight: 0.3,
            onchain_signals: OnchainSummary::default(),
            rule_score: 70.0,
            statistical_score: None,
            sentiment_label: None,
            sentiment_score: None,
            final_decision: None,
            final_score: None,
            ml_unavailable: false,
            explanation: String::new(),
            rejection_reason: None,
        }
    }

    #[tokio::test]
    async fn test_store_and_query() {
        let store = InMemoryDecisionStore::new();
        let d1 = decision("BTCUSDT", 10);
        let d2 = decision("ETHUSDT", 5);
        store.store(&d1).await.unwrap();
        store.store(&d2).await.unwrap();

        assert_eq!(store.get(d1.id).await.unwrap().unwrap().symbol, "BTCUSDT");
        assert_eq!(store.get_by_symbol("ETHUSDT").await.unwrap().len(), 1);

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, d2.id);
    }
}
