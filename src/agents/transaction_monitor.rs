//! Transaction monitoring agent: statistical fraud probability over the
//! transaction and its history features

use crate::agents::{RawAgentOutput, ScoringAgent};
use crate::types::agent::AgentId;
use crate::types::features::FeatureBundle;
use crate::types::transaction::TransactionContext;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Native attribution entry: model column name and its contribution
#[derive(Debug, Clone, PartialEq)]
pub struct NativeAttribution {
    pub name: String,
    pub value: f64,
}

/// Native output of a transaction scoring model
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionModelOutput {
    /// Fraud probability
    pub probability: f64,
    /// Model-reported confidence, if the model has one
    pub confidence: Option<f64>,
    pub attributions: Vec<NativeAttribution>,
}

/// Contract of the external transaction scoring model
#[async_trait]
pub trait TransactionModel: Send + Sync {
    async fn predict(&self, features: &FeatureBundle) -> Result<TransactionModelOutput>;
}

/// Scores every transaction with the configured model
pub struct TransactionMonitorAgent {
    model: Arc<dyn TransactionModel>,
    timeout: Duration,
}

impl TransactionMonitorAgent {
    pub fn new(model: Arc<dyn TransactionModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }
}

#[async_trait]
impl ScoringAgent for TransactionMonitorAgent {
    fn id(&self) -> AgentId {
        AgentId::TransactionMonitor
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn score(
        &self,
        _ctx: &TransactionContext,
        features: &FeatureBundle,
    ) -> Result<RawAgentOutput> {
        let output = self.model.predict(features).await?;
        Ok(RawAgentOutput::Transaction(output))
    }
}
