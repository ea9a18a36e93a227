//! The two pluggable judges: a statistical classifier over engineered
//! features and a language-model sentiment analyst. Both are built to
//! degrade in place (the classifier abstains, the sentiment judge returns
//! a neutral verdict) so a dead judge can never stall a cycle.

pub mod llm;
pub mod parsing;
pub mod sentiment;
pub mod statistical;

pub use llm::{LlmClientConfig, LlmError, LlmProvider, OpenAiCompatClient};
pub use sentiment::{MarketContext, SentimentConfig, SentimentOpinion, SentimentScorer};
pub use statistical::{ClassifierArtifact, StatisticalScorer};
