//! Versioned arbitration weights with an explicit snapshot cache.
//!
//! The arbiter reads an immutable snapshot loaded once; a fresh load only
//! happens on explicit invalidation, never implicitly. This keeps the
//! cached value independent of any storage session underneath.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-4;

/// One versioned weight configuration; exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationWeights {
    pub version: u64,
    pub rule_weight: f64,
    pub ml_weight: f64,
    pub llm_weight: f64,
    pub min_approval_score: f64,
    /// Reserved for a future adaptive thresholder; carried, not read.
    pub adaptive_threshold_enabled: bool,
}

impl Default for ArbitrationWeights {
    fn default() -> Self {
        Self {
            version: 1,
            rule_weight: 0.4,
            ml_weight: 0.3,
            llm_weight: 0.3,
            min_approval_score: 70.0,
            adaptive_threshold_enabled: false,
        }
    }
}

impl ArbitrationWeights {
    /// Weights must be finite, non-negative and sum to 1 within tolerance;
    /// the threshold must be a finite score.
    pub fn validate(&self) -> Result<()> {
        let parts = [self.rule_weight, self.ml_weight, self.llm_weight];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(anyhow!("weights must be finite and non-negative"));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(anyhow!("weights sum to {}, expected 1.0", sum));
        }
        if !self.min_approval_score.is_finite() {
            return Err(anyhow!("min_approval_score must be finite"));
        }
        Ok(())
    }
}

/// Storage boundary for the active weights row.
#[async_trait]
pub trait WeightsStore: Send + Sync {
    async fn fetch_active(&self) -> Result<ArbitrationWeights>;
}

/// In-memory store; also the test double. `set_active` bumps the row the
/// next explicit reload will see.
pub struct InMemoryWeightsStore {
    active: RwLock<ArbitrationWeights>,
}

impl InMemoryWeightsStore {
    pub fn new(weights: ArbitrationWeights) -> Self {
        Self {
            active: RwLock::new(weights),
        }
    }

    pub async fn set_active(&self, weights: ArbitrationWeights) {
        *self.active.write().await = weights;
    }
}

#[async_trait]
impl WeightsStore for InMemoryWeightsStore {
    async fn fetch_active(&self) -> Result<ArbitrationWeights> {
        Ok(self.active.read().await.clone())
    }
}

/// Caller-invalidated snapshot cache over a [`WeightsStore`].
pub struct WeightsCache {
    store: Arc<dyn WeightsStore>,
    snapshot: RwLock<Option<Arc<ArbitrationWeights>>>,
}

impl WeightsCache {
    pub fn new(store: Arc<dyn WeightsStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(None),
        }
    }

    /// Current snapshot, loading it on first use. Subsequent calls return
    /// the cached value until [`invalidate`](Self::invalidate).
    pub async fn get(&self) -> Result<Arc<ArbitrationWeights>> {
        if let Some(snapshot) = self.snapshot.read().await.as_ref() {
            return Ok(snapshot.clone());
        }

        let mut slot = self.snapshot.write().await;
        // Another task may have loaded while we waited for the write lock.
        if let Some(snapshot) = slot.as_ref() {
            return Ok(snapshot.clone());
        }
        let weights = Arc::new(self.store.fetch_active().await?);
        info!(
            "Loaded arbitration weights v{} (rule {:.2} / ml {:.2} / llm {:.2}, threshold {:.1})",
            weights.version,
            weights.rule_weight,
            weights.ml_weight,
            weights.llm_weight,
            weights.min_approval_score
        );
        *slot = Some(weights.clone());
        Ok(weights)
    }

    /// Drop the snapshot; the next `get` reloads from the store.
    pub async fn invalidate(&self) {
        info!("Arbitration weights cache invalidated");
        *self.snapshot.write().await = None;
    }
}
