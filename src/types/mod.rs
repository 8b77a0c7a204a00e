//! Type definitions shared across the orchestrator

pub mod agent;
pub mod escalation;
pub mod features;
pub mod transaction;
pub mod verdict;

pub use agent::{AgentId, AgentResult, AgentStatus, Attribution};
pub use escalation::{EscalationRecord, EscalationState, Transition, TransitionCause};
pub use features::{FeatureBundle, FeatureName, FeatureValue, FEATURE_VOCABULARY_VERSION};
pub use transaction::{DeviceMetadata, MediaRef, TransactionContext};
pub use verdict::{BandThresholds, FusionMethod, RiskBand, RiskVerdict};
