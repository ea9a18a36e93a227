//! Statistical judge: a pre-trained binary classifier loaded from disk.
//!
//! Load failure is swallowed at construction; the adapter just reports
//! not-ready and every later score() returns None. A dead model must never
//! take the pipeline down with it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use signal_generation::FeatureVector;

/// Serialized classifier artifact: a standardized logistic regression over
/// the manifest's features, probability of the bullish class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    pub model_type: String,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Optional per-feature standardization learned at training time.
    #[serde(default)]
    pub means: Option<Vec<f64>>,
    #[serde(default)]
    pub scales: Option<Vec<f64>>,
}

pub struct StatisticalScorer {
    model: Option<ClassifierArtifact>,
    /// Feature names in training order; scoring reorders inputs to match.
    manifest: Vec<String>,
    calls: AtomicU64,
}

impl StatisticalScorer {
    /// Load the artifact and manifest. Any failure leaves the scorer
    /// not-ready rather than erroring.
    pub fn load(artifact_path: &Path, manifest_path: &Path) -> Self {
        let manifest = match Self::read_manifest(manifest_path) {
            Ok(names) => names,
            Err(e) => {
                warn!(
                    "Statistical scorer disabled: manifest {} unusable: {:#}",
                    manifest_path.display(),
                    e
                );
                return Self::not_ready();
            }
        };

        let model = match Self::read_artifact(artifact_path, manifest.len()) {
            Ok(model) => model,
            Err(e) => {
                warn!(
                    "Statistical scorer disabled: artifact {} unusable: {:#}",
                    artifact_path.display(),
                    e
                );
                return Self::not_ready();
            }
        };

        info!(
            "Loaded {} classifier with {} features",
            model.model_type,
            manifest.len()
        );
        Self {
            model: Some(model),
            manifest,
            calls: AtomicU64::new(0),
        }
    }

    fn not_ready() -> Self {
        Self {
            model: None,
            manifest: Vec::new(),
            calls: AtomicU64::new(0),
        }
    }

    fn read_manifest(path: &Path) -> anyhow::Result<Vec<String>> {
        let raw = std::fs::read_to_string(path)?;
        let names: Vec<String> = serde_json::from_str(&raw)?;
        if names.is_empty() {
            anyhow::bail!("manifest is empty");
        }
        Ok(names)
    }

    fn read_artifact(path: &Path, expected: usize) -> anyhow::Result<ClassifierArtifact> {
        let raw = std::fs::read_to_string(path)?;
        let model: ClassifierArtifact = serde_json::from_str(&raw)?;
        if model.coefficients.len() != expected {
            anyhow::bail!(
                "artifact has {} coefficients but manifest lists {} features",
                model.coefficients.len(),
                expected
            );
        }
        for opt in [&model.means, &model.scales] {
            if let Some(v) = opt {
                if v.len() != expected {
                    anyhow::bail!("standardization vectors do not match manifest width");
                }
            }
        }
        Ok(model)
    }

    /// Build directly from parts. Used by tests and offline tooling.
    pub fn from_parts(model: ClassifierArtifact, manifest: Vec<String>) -> Self {
        Self {
            model: Some(model),
            manifest,
            calls: AtomicU64::new(0),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    /// Advisory call counter.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Probability of the bullish class as a 0-100 score, or None when the
    /// model is unavailable or the features are empty.
    pub fn score(&self, features: &FeatureVector) -> Option<f64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let model = self.model.as_ref()?;
        if features.is_empty() {
            return None;
        }

        // Reorder to the manifest; absent features fill with neutral 0.0.
        let mut logit = model.intercept;
        for (i, name) in self.manifest.iter().enumerate() {
            let raw = match features.get(name) {
                Some(value) => value,
                None => {
                    warn!("Feature {} missing from input, filling 0.0", name);
                    0.0
                }
            };
            let mut x = raw;
            if let Some(means) = &model.means {
                x -= means[i];
            }
            if let Some(scales) = &model.scales {
                if scales[i] != 0.0 {
                    x /= scales[i];
                }
            }
            logit += model.coefficients[i] * x;
        }

        let probability = 1.0 / (1.0 + (-logit).exp());
        Some(probability * 100.0)
    }
}
