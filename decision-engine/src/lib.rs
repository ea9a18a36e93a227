//! Decision fusion service: arbitrates the rule, statistical and
//! sentiment opinions for each candidate market, persists the verdict
//! and announces it on the event bus.

pub mod arbiter;
pub mod orchestrator;
pub mod publisher;
pub mod storage;
pub mod weights;

pub use arbiter::{ArbiterConfig, DecisionArbiter, RejectionReason, Verdict};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Pipeline};
pub use publisher::{
    DecisionEvent, EventPublisher, EventSink, InMemoryEventSink, PublisherConfig, RedisEventSink,
    SCHEMA_VERSION,
};
pub use storage::{DecisionStore, InMemoryDecisionStore};
pub use weights::{ArbitrationWeights, InMemoryWeightsStore, WeightsCache, WeightsStore};
