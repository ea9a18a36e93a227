//! Decision arbiter: fuses the rule, statistical and sentiment opinions
//! into one APPROVE/REJECT verdict.
//!
//! Fail closed: any configuration or input problem maps to a rejection
//! with a recorded category instead of an error escaping the arbiter.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use common::{DecisionOutcome, SentimentLabel};

use crate::weights::ArbitrationWeights;

/// Tunables for sentiment-to-score conversion and weight redistribution.
/// The base/multiplier constants mirror the trained configuration and are
/// deliberately plain knobs, not derived values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    pub bullish_base: f64,
    pub neutral_base: f64,
    pub bearish_base: f64,
    pub confidence_multiplier: f64,
    /// Share of an absent statistical judge's weight that moves to the
    /// rule score; the remainder moves to sentiment.
    pub ml_redistribution_to_rule: f64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            bullish_base: 90.0,
            neutral_base: 50.0,
            bearish_base: 10.0,
            confidence_multiplier: 0.2,
            ml_redistribution_to_rule: 0.6,
        }
    }
}

/// Why a decision was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// Final score fell short of the approval threshold.
    BelowThreshold { final_score: f64, threshold: f64 },
    /// Active weights were missing or invalid.
    ConfigError(String),
    /// Non-finite or otherwise impossible inputs.
    SystemError(String),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::BelowThreshold {
                final_score,
                threshold,
            } => write!(
                f,
                "final score {:.2} below approval threshold {}",
                final_score, threshold
            ),
            RejectionReason::ConfigError(msg) => write!(f, "CONFIG_ERROR: {}", msg),
            RejectionReason::SystemError(msg) => write!(f, "SYSTEM_ERROR: {}", msg),
        }
    }
}

/// Outcome of one arbitration call.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub outcome: DecisionOutcome,
    pub final_score: f64,
    pub sentiment_score: f64,
    /// True when the statistical judge was absent and its weight was
    /// redistributed.
    pub ml_unavailable: bool,
    pub explanation: String,
    pub rejection_reason: Option<RejectionReason>,
}

pub struct DecisionArbiter {
    config: ArbiterConfig,
}

impl DecisionArbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self { config }
    }

    /// Rejected verdict for configuration problems detected before
    /// arbitration could start, such as missing active weights.
    pub fn config_failure(&self, msg: &str) -> Verdict {
        self.fail_closed(RejectionReason::ConfigError(msg.to_string()))
    }

    /// Fuse the three opinions under `weights`. Total function: every
    /// failure mode returns a rejected verdict, never an error.
    pub fn arbitrate(
        &self,
        rule_score: f64,
        statistical_score: Option<f64>,
        sentiment_label: SentimentLabel,
        sentiment_confidence: f64,
        weights: &ArbitrationWeights,
    ) -> Verdict {
        if let Err(e) = weights.validate() {
            return self.fail_closed(RejectionReason::ConfigError(e.to_string()));
        }

        let sentiment_score = self.sentiment_to_score(sentiment_label, sentiment_confidence);

        let inputs = [
            rule_score,
            statistical_score.unwrap_or(0.0),
            sentiment_confidence,
            sentiment_score,
        ];
        if inputs.iter().any(|v| !v.is_finite()) {
            return self.fail_closed(RejectionReason::SystemError(
                "non-finite score input".to_string(),
            ));
        }

        // Redistribute an absent statistical judge's share so the weights
        // in play always sum to 1.
        let (rule_w, ml_w, llm_w, ml_unavailable) = match statistical_score {
            Some(_) => (weights.rule_weight, weights.ml_weight, weights.llm_weight, false),
            None => {
                let to_rule = weights.ml_weight * self.config.ml_redistribution_to_rule;
                let to_llm = weights.ml_weight - to_rule;
                (
                    weights.rule_weight + to_rule,
                    0.0,
                    weights.llm_weight + to_llm,
                    true,
                )
            }
        };

        let final_score = rule_score * rule_w
            + statistical_score.unwrap_or(0.0) * ml_w
            + sentiment_score * llm_w;

        let mut explanation = format!(
            "rule {:.2} x {:.3} + sentiment {:.2} ({} @ {:.0}) x {:.3}",
            rule_score,
            rule_w,
            sentiment_score,
            sentiment_label.as_str(),
            sentiment_confidence,
            llm_w,
        );
        match statistical_score {
            Some(ml) => {
                explanation.push_str(&format!(" + ml {:.2} x {:.3}", ml, ml_w));
            }
            None => {
                explanation.push_str(" (ml unavailable, weight redistributed)");
            }
        }
        explanation.push_str(&format!(
            " = {:.2} vs threshold {} (weights v{})",
            final_score, weights.min_approval_score, weights.version
        ));

        debug!("Arbitration: {}", explanation);

        if final_score >= weights.min_approval_score {
            Verdict {
                outcome: DecisionOutcome::Approved,
                final_score,
                sentiment_score,
                ml_unavailable,
                explanation,
                rejection_reason: None,
            }
        } else {
            let reason = RejectionReason::BelowThreshold {
                final_score,
                threshold: weights.min_approval_score,
            };
            Verdict {
                outcome: DecisionOutcome::Rejected,
                final_score,
                sentiment_score,
                ml_unavailable,
                explanation,
                rejection_reason: Some(reason),
            }
        }
    }

    /// Label base adjusted by confidence distance from the midpoint,
    /// clamped to the score range.
    pub fn sentiment_to_score(&self, label: SentimentLabel, confidence: f64) -> f64 {
        let base = match label {
            SentimentLabel::Bullish => self.config.bullish_base,
            SentimentLabel::Neutral => self.config.neutral_base,
            SentimentLabel::Bearish => self.config.bearish_base,
        };
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 100.0)
        } else {
            50.0
        };
        (base + (confidence - 50.0) * self.config.confidence_multiplier).clamp(0.0, 100.0)
    }

    fn fail_closed(&self, reason: RejectionReason) -> Verdict {
        Verdict {
            outcome: DecisionOutcome::Rejected,
            final_score: 0.0,
            sentiment_score: 0.0,
            ml_unavailable: false,
            explanation: format!("arbitration failed closed: {}", reason),
            rejection_reason: Some(reason),
        }
    }
}

impl Default for DecisionArbiter {
    fn default() -> Self {
        Self::new(ArbiterConfig::default())
    }
}
