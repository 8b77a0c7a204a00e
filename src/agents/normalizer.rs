//! Conversion of native agent outputs into [`AgentResult`]s

use crate::agents::deepfake::BiometricModelOutput;
use crate::agents::transaction_monitor::{NativeAttribution, TransactionModelOutput};
use crate::agents::{AgentOutcome, RawAgentOutput};
use crate::config::AppConfig;
use crate::types::agent::{AgentId, AgentResult, AgentStatus, Attribution, UNMAPPED_PREFIX};
use crate::types::features::FeatureName;
use std::time::Duration;

/// Adapter from native outputs to the common result shape
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Confidence used when a model does not report one
    nominal_confidence: f64,
    /// Face match below this similarity fails biometric verification
    face_match_threshold: f64,
    /// Minimum risk when biometric verification fails
    failed_verification_floor: f64,
}

impl Normalizer {
    pub fn new(
        nominal_confidence: f64,
        face_match_threshold: f64,
        failed_verification_floor: f64,
    ) -> Self {
        Self {
            nominal_confidence: clamp_unit(nominal_confidence),
            face_match_threshold: clamp_unit(face_match_threshold),
            failed_verification_floor: clamp_unit(failed_verification_floor),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.models.nominal_confidence,
            config.agents.face_match_threshold,
            config.agents.failed_verification_floor,
        )
    }

    /// Normalize one agent outcome
    pub fn normalize(&self, agent: AgentId, outcome: AgentOutcome, latency: Duration) -> AgentResult {
        let latency_us = latency.as_micros() as u64;
        match outcome {
            AgentOutcome::Skipped(reason) => AgentResult::skipped(agent, reason),
            AgentOutcome::TimedOut(budget) => AgentResult::unusable(
                agent,
                AgentStatus::TimedOut,
                latency_us,
                format!("no result within {}ms", budget.as_millis()),
            ),
            AgentOutcome::Failed(reason) => {
                AgentResult::unusable(agent, AgentStatus::Failed, latency_us, reason)
            }
            AgentOutcome::Completed(raw) if raw.family() != agent => AgentResult::unusable(
                agent,
                AgentStatus::Failed,
                latency_us,
                format!("unexpected {} output", raw.family()),
            ),
            AgentOutcome::Completed(RawAgentOutput::Transaction(output)) => {
                self.adapt_transaction(agent, output, latency_us)
            }
            AgentOutcome::Completed(RawAgentOutput::Biometric(output)) => {
                self.adapt_biometric(agent, output, latency_us)
            }
        }
    }

    fn adapt_transaction(
        &self,
        agent: AgentId,
        output: TransactionModelOutput,
        latency_us: u64,
    ) -> AgentResult {
        if !output.probability.is_finite() {
            return AgentResult::unusable(
                agent,
                AgentStatus::Failed,
                latency_us,
                format!("non-finite probability {}", output.probability),
            );
        }
        let attributions = map_attributions(
            output
                .attributions
                .into_iter()
                .map(|NativeAttribution { name, value }| (name, value)),
        );
        AgentResult {
            agent,
            status: AgentStatus::Ok,
            contribution: Some(clamp_unit(output.probability)),
            confidence: self.confidence(output.confidence),
            attributions,
            latency_us,
            detail: None,
        }
    }

    fn adapt_biometric(
        &self,
        agent: AgentId,
        output: BiometricModelOutput,
        latency_us: u64,
    ) -> AgentResult {
        if !output.similarity.is_finite() {
            return AgentResult::unusable(
                agent,
                AgentStatus::Failed,
                latency_us,
                format!("non-finite similarity {}", output.similarity),
            );
        }
        let similarity = clamp_unit(output.similarity);
        let mut risk = 1.0 - similarity;
        if output.is_deepfake {
            risk = risk.max(clamp_unit(output.deepfake_confidence));
        }
        let verification_failed = output.is_deepfake
            || similarity < self.face_match_threshold
            || output.code_validated == Some(false);
        if verification_failed {
            risk = risk.max(self.failed_verification_floor);
        }

        AgentResult {
            agent,
            status: AgentStatus::Ok,
            contribution: Some(clamp_unit(risk)),
            confidence: self.confidence(output.confidence),
            attributions: map_attributions(output.signals.into_iter()),
            latency_us,
            detail: verification_failed.then(|| "biometric verification failed".to_string()),
        }
    }

    fn confidence(&self, reported: Option<f64>) -> f64 {
        match reported {
            Some(c) if c.is_finite() => clamp_unit(c),
            _ => self.nominal_confidence,
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(0.8, 0.80, 0.90)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Map native (identifier, weight) pairs onto the vocabulary.
///
/// Identifiers outside the vocabulary are kept as `unmapped:<raw>`. The
/// result is ordered by descending absolute weight, then feature id.
pub fn map_attributions(native: impl Iterator<Item = (String, f64)>) -> Vec<Attribution> {
    let mut mapped: Vec<Attribution> = native
        .map(|(raw, weight)| {
            let weight = if weight.is_finite() { weight } else { 0.0 };
            match FeatureName::resolve(&raw) {
                Some(feature) => Attribution {
                    feature: feature.as_str().to_string(),
                    weight,
                    label: feature.label().to_string(),
                },
                None => Attribution {
                    feature: format!("{}{}", UNMAPPED_PREFIX, raw),
                    weight,
                    label: raw,
                },
            }
        })
        .collect();
    mapped.sort_by(|a, b| {
        b.weight
            .abs()
            .total_cmp(&a.weight.abs())
            .then_with(|| a.feature.cmp(&b.feature))
    });
    mapped
}
