//! Fraud Risk Orchestrator Library
//!
//! Coordinates independent scoring agents (transaction monitoring and
//! deepfake detection) over a shared evidence bundle, fuses their opinions
//! into one auditable risk verdict, and drives a replay-safe escalation
//! workflow per transaction.

pub mod agents;
pub mod config;
pub mod consumer;
pub mod error;
pub mod escalation;
pub mod evidence;
pub mod explanation;
pub mod fusion;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod producer;
pub mod types;

pub use config::AppConfig;
pub use consumer::TransactionConsumer;
pub use error::{EscalationError, EvaluationError, EvidenceError};
pub use escalation::{EscalationStateMachine, InMemoryEscalationStore, ReviewAction};
pub use evidence::{EvidenceCollector, InMemoryHistorySource};
pub use fusion::RiskFusionEngine;
pub use orchestrator::{Evaluation, RiskOrchestrator};
pub use producer::{DecisionProducer, DecisionRecord};
pub use types::{
    transaction::TransactionContext,
    verdict::{RiskBand, RiskVerdict},
};
