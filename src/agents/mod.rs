//! Scoring agents and the normalizer that turns their native output into
//! [`AgentResult`]s.
//!
//! Each agent family returns its own native output shape, carried by the
//! tagged [`RawAgentOutput`]. The [`Normalizer`] is the only place those
//! shapes are converted into the common result.

pub mod deepfake;
pub mod normalizer;
pub mod transaction_monitor;

pub use deepfake::{BiometricModel, BiometricModelOutput, DeepfakeDetectionAgent};
pub use normalizer::Normalizer;
pub use transaction_monitor::{
    NativeAttribution, TransactionModel, TransactionModelOutput, TransactionMonitorAgent,
};

use crate::types::agent::{AgentId, AgentResult};
use crate::types::features::FeatureBundle;
use crate::types::transaction::TransactionContext;
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Native output of one agent family
#[derive(Debug, Clone, PartialEq)]
pub enum RawAgentOutput {
    Transaction(TransactionModelOutput),
    Biometric(BiometricModelOutput),
}

impl RawAgentOutput {
    /// Agent family that produces this variant
    pub fn family(&self) -> AgentId {
        match self {
            RawAgentOutput::Transaction(_) => AgentId::TransactionMonitor,
            RawAgentOutput::Biometric(_) => AgentId::DeepfakeDetection,
        }
    }
}

/// How an agent invocation ended, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Completed(RawAgentOutput),
    Failed(String),
    TimedOut(Duration),
    Skipped(String),
}

/// An independently failing scorer
#[async_trait]
pub trait ScoringAgent: Send + Sync {
    fn id(&self) -> AgentId;

    /// Budget for one `score` call
    fn timeout(&self) -> Duration;

    /// Reason this agent must not be invoked for the context, if any
    fn skip_reason(&self, _ctx: &TransactionContext) -> Option<String> {
        None
    }

    async fn score(
        &self,
        ctx: &TransactionContext,
        features: &FeatureBundle,
    ) -> Result<RawAgentOutput>;
}

/// Run one agent to a terminal status under its own timeout.
///
/// Errors, panics and timeouts all come back as an unusable [`AgentResult`];
/// this function never fails.
pub async fn invoke(
    agent: &dyn ScoringAgent,
    ctx: &TransactionContext,
    features: &FeatureBundle,
    normalizer: &Normalizer,
) -> AgentResult {
    let id = agent.id();

    if let Some(reason) = agent.skip_reason(ctx) {
        debug!(transaction_id = %ctx.transaction_id, agent = %id, reason = %reason, "Agent skipped");
        return normalizer.normalize(id, AgentOutcome::Skipped(reason), Duration::ZERO);
    }

    let start = Instant::now();
    let budget = agent.timeout();
    let scoring = AssertUnwindSafe(agent.score(ctx, features)).catch_unwind();

    let outcome = match tokio::time::timeout(budget, scoring).await {
        Ok(Ok(Ok(raw))) => AgentOutcome::Completed(raw),
        Ok(Ok(Err(e))) => AgentOutcome::Failed(format!("{:#}", e)),
        Ok(Err(_panic)) => AgentOutcome::Failed("agent panicked".to_string()),
        Err(_) => AgentOutcome::TimedOut(budget),
    };
    let elapsed = start.elapsed();

    let result = normalizer.normalize(id, outcome, elapsed);
    if result.is_usable() {
        debug!(
            transaction_id = %ctx.transaction_id,
            agent = %id,
            contribution = result.contribution.unwrap_or_default(),
            confidence = result.confidence,
            unmapped_attributions =
                result.attributions.iter().filter(|a| a.is_unmapped()).count(),
            latency_us = result.latency_us,
            "Agent completed"
        );
    } else {
        warn!(
            transaction_id = %ctx.transaction_id,
            agent = %id,
            status = result.status.as_str(),
            detail = result.detail.as_deref().unwrap_or(""),
            latency_us = result.latency_us,
            "Agent produced no usable score"
        );
    }
    result
}
