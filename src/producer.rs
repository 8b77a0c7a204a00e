//! NATS producer for decision records

use crate::error::EvaluationError;
use crate::orchestrator::Evaluation;
use crate::types::escalation::EscalationRecord;
use crate::types::verdict::RiskVerdict;
use anyhow::Result;
use async_nats::Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Serializable outcome of one evaluation, for durable storage keyed by
/// transaction id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub transaction_id: String,
    pub verdict: RiskVerdict,
    pub escalation: Option<EscalationRecord>,
    /// Rejected escalation transition, when the verdict could not be applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_error: Option<String>,
    pub narrative: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn from_evaluation(evaluation: Evaluation) -> Self {
        Self {
            decision_id: Uuid::new_v4().to_string(),
            transaction_id: evaluation.verdict.transaction_id.clone(),
            verdict: evaluation.verdict,
            escalation: evaluation.escalation,
            escalation_error: None,
            narrative: evaluation.narrative,
            decided_at: Utc::now(),
        }
    }

    /// Record for a verdict whose escalation was rejected; `None` when the
    /// error happened before a verdict existed
    pub fn from_rejection(error: &EvaluationError, current: Option<EscalationRecord>) -> Option<Self> {
        let EvaluationError::Escalation { verdict, source } = error else {
            return None;
        };
        Some(Self {
            decision_id: Uuid::new_v4().to_string(),
            transaction_id: verdict.transaction_id.clone(),
            verdict: (**verdict).clone(),
            escalation: current,
            escalation_error: Some(source.to_string()),
            narrative: None,
            decided_at: Utc::now(),
        })
    }
}

/// Publishes decision records
#[derive(Clone)]
pub struct DecisionProducer {
    client: Client,
    subject: String,
}

impl DecisionProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn publish(&self, record: &DecisionRecord) -> Result<()> {
        let payload = serde_json::to_vec(record)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            decision_id = %record.decision_id,
            transaction_id = %record.transaction_id,
            risk_score = record.verdict.score,
            "Published decision record"
        );

        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
