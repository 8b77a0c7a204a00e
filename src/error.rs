//! Error types surfaced to callers of the orchestrator.
//!
//! Agent-level failures never appear here: they are absorbed into
//! [`AgentResult`](crate::types::AgentResult) statuses and only affect the
//! verdict through the fusion penalty.

use thiserror::Error;

use crate::types::{EscalationState, RiskVerdict};

/// Errors from the evidence source
#[derive(Debug, Error)]
pub enum EvidenceError {
    /// The history source could not be reached at all
    #[error("evidence source unavailable: {reason}")]
    Unavailable { reason: String },

    /// Derivation left a vocabulary feature without a value
    #[error("feature {feature} was not derived")]
    IncompleteBundle { feature: String },
}

/// Errors from the escalation state machine and its store
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EscalationError {
    /// An automatic transition was attempted out of a state that rejects them
    #[error("transaction {transaction_id} is {state}; automatic transitions are rejected")]
    TerminalStateViolation {
        transaction_id: String,
        state: EscalationState,
    },

    /// The record changed since the caller read it
    #[error("stale version for transaction {transaction_id}: expected {expected:?}, found {found:?}")]
    StaleVersionConflict {
        transaction_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// A reviewer action is not allowed from the current state
    #[error("review action {action} not allowed from {state} for transaction {transaction_id}")]
    InvalidReviewAction {
        transaction_id: String,
        state: EscalationState,
        action: String,
    },

    /// No record exists for the transaction
    #[error("no escalation record for transaction {transaction_id}")]
    NotFound { transaction_id: String },

    /// The backing store failed
    #[error("escalation store error: {0}")]
    Store(String),
}

/// Errors returned by [`RiskOrchestrator::evaluate`](crate::orchestrator::RiskOrchestrator::evaluate)
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// Required transaction fields are missing or malformed
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// No agent can run without a feature context
    #[error(transparent)]
    EvidenceSourceUnavailable(#[from] EvidenceError),

    /// Fusion has no external dependency; any failure is a logic defect
    #[error("fusion defect: {reason}")]
    FusionDefect { reason: String },

    /// The whole request ran past its deadline before fusion
    #[error("evaluation deadline of {timeout_ms}ms exceeded")]
    DeadlineExceeded { timeout_ms: u64 },

    /// The verdict was produced but the escalation transition was rejected
    #[error("escalation rejected for verdict {}: {source}", .verdict.fingerprint)]
    Escalation {
        verdict: Box<RiskVerdict>,
        #[source]
        source: EscalationError,
    },
}

impl EvaluationError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        EvaluationError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn fusion_defect(reason: impl Into<String>) -> Self {
        EvaluationError::FusionDefect {
            reason: reason.into(),
        }
    }

    /// The verdict, when the failure happened after fusion
    pub fn verdict(&self) -> Option<&RiskVerdict> {
        match self {
            EvaluationError::Escalation { verdict, .. } => Some(verdict.as_ref()),
            _ => None,
        }
    }
}
