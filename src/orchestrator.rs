//! Request-level orchestration: evidence, agents, fusion, escalation.

use crate::agents::{self, Normalizer, ScoringAgent};
use crate::config::AppConfig;
use crate::error::{EscalationError, EvaluationError};
use crate::escalation::{EscalationStateMachine, EscalationStore, TransitionOutcome};
use crate::evidence::{EvidenceCollector, HistorySource};
use crate::explanation::Summarizer;
use crate::fusion::RiskFusionEngine;
use crate::metrics::EvaluationMetrics;
use crate::types::agent::AgentResult;
use crate::types::escalation::EscalationRecord;
use crate::types::features::FeatureBundle;
use crate::types::transaction::TransactionContext;
use crate::types::verdict::RiskVerdict;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of one evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: RiskVerdict,
    /// `None` while the transaction stays implicitly normal
    pub escalation: Option<EscalationRecord>,
    pub narrative: Option<String>,
}

/// Coordinates one evaluation end to end
pub struct RiskOrchestrator {
    collector: EvidenceCollector,
    agents: Vec<Arc<dyn ScoringAgent>>,
    normalizer: Normalizer,
    fusion: RiskFusionEngine,
    escalation: EscalationStateMachine,
    summarizer: Option<Arc<dyn Summarizer>>,
    metrics: Option<Arc<EvaluationMetrics>>,
    request_timeout: Duration,
}

impl RiskOrchestrator {
    /// Agents are invoked, and reported on the verdict, in the given order
    pub fn new(
        collector: EvidenceCollector,
        agents: Vec<Arc<dyn ScoringAgent>>,
        fusion: RiskFusionEngine,
        escalation: EscalationStateMachine,
    ) -> Self {
        Self {
            collector,
            agents,
            normalizer: Normalizer::default(),
            fusion,
            escalation,
            summarizer: None,
            metrics: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        history: Arc<dyn HistorySource>,
        agents: Vec<Arc<dyn ScoringAgent>>,
        store: Arc<dyn EscalationStore>,
    ) -> Self {
        Self::new(
            EvidenceCollector::new(history, config.evidence.clone()),
            agents,
            RiskFusionEngine::new(config.fusion.clone()),
            EscalationStateMachine::new(store),
        )
        .with_normalizer(Normalizer::from_config(config))
        .with_request_timeout(config.pipeline.request_timeout())
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EvaluationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn escalation(&self) -> &EscalationStateMachine {
        &self.escalation
    }

    /// Evaluate one transaction.
    ///
    /// Agent failures never surface here; they lower confidence in the
    /// verdict through the fusion penalty instead.
    pub async fn evaluate(&self, ctx: &TransactionContext) -> Result<Evaluation, EvaluationError> {
        let start = Instant::now();
        let result = self.run(ctx, start).await;
        if let Err(e) = &result {
            if let Some(metrics) = &self.metrics {
                metrics.record_error();
            }
            warn!(transaction_id = %ctx.transaction_id, error = %e, "Evaluation failed");
        }
        result
    }

    async fn run(&self, ctx: &TransactionContext, start: Instant) -> Result<Evaluation, EvaluationError> {
        ctx.validate()?;

        // Dropping the gather future on deadline cancels in-flight agents
        let (features, results) = tokio::time::timeout(self.request_timeout, self.gather(ctx))
            .await
            .map_err(|_| EvaluationError::DeadlineExceeded {
                timeout_ms: self.request_timeout.as_millis() as u64,
            })??;

        let verdict = self.fusion.fuse(&features, results)?;
        info!(
            transaction_id = %verdict.transaction_id,
            risk_score = verdict.score,
            band = %verdict.band,
            method = verdict.method.as_str(),
            unusable_agents = verdict.unusable_count(),
            fingerprint = %verdict.fingerprint,
            "Verdict fused"
        );
        if let Some(metrics) = &self.metrics {
            for result in &verdict.agents {
                metrics.record_agent(result.agent, result.status, result.latency_us);
            }
            metrics.record_evaluation(start.elapsed(), verdict.score, verdict.band);
        }

        let escalation = match self.escalation.apply_verdict(&verdict).await {
            Ok(outcome) => {
                if let (TransitionOutcome::Applied(record), Some(metrics)) = (&outcome, &self.metrics) {
                    metrics.record_escalation(record.state);
                }
                outcome.into_record()
            }
            Err(source) => {
                return Err(EvaluationError::Escalation {
                    verdict: Box::new(verdict),
                    source,
                })
            }
        };

        let narrative = self.narrate(&verdict).await;
        Ok(Evaluation {
            verdict,
            escalation,
            narrative,
        })
    }

    /// Evidence first, then every agent concurrently against the same bundle
    async fn gather(
        &self,
        ctx: &TransactionContext,
    ) -> Result<(FeatureBundle, Vec<AgentResult>), EvaluationError> {
        let features = self.collector.collect(ctx).await?;
        let results = join_all(
            self.agents
                .iter()
                .map(|agent| agents::invoke(agent.as_ref(), ctx, &features, &self.normalizer)),
        )
        .await;
        Ok((features, results))
    }

    async fn narrate(&self, verdict: &RiskVerdict) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        match summarizer.summarize(verdict).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(
                    transaction_id = %verdict.transaction_id,
                    error = %e,
                    "Summarizer failed; verdict carries no narrative"
                );
                None
            }
        }
    }

    /// Current escalation record for a transaction
    pub async fn replay(&self, transaction_id: &str) -> Result<Option<EscalationRecord>, EscalationError> {
        self.escalation.replay(transaction_id).await
    }
}
