//! Risk fusion: combines normalized agent results into one verdict.
//!
//! The rule is deterministic. Identical result lists (including order)
//! always produce an identical [`RiskVerdict`], fingerprint included.
//!
//! 1. Results with status `Ok` are usable; everything else is not.
//! 2. No usable result: score 1.0, band `Critical`, method `no_usable_signal`.
//! 3. Otherwise the confidence-weighted mean of usable contributions is the
//!    base score. Each unusable agent then shrinks the remaining headroom:
//!    `score = 1 - (1 - base) * Π(1 - wᵢ)`, where `wᵢ` is the skipped or the
//!    unusable penalty weight. A Failed or TimedOut agent also floors the
//!    score at the weighted mean obtained by scoring it as contribution 1.0
//!    at confidence 1.0, so a missing check never scores below the same
//!    check reporting worst-case risk. Skipped agents take the penalty only.
//! 4. The score maps to a band through the configured cut-points.
//! 5. Usable attributions are summed per feature, ranked by absolute weight
//!    (ties: first contributing agent, then feature id) and cut to top-K.

use crate::config::FusionConfig;
use crate::error::EvaluationError;
use crate::types::agent::{AgentResult, AgentStatus, Attribution};
use crate::types::features::FeatureBundle;
use crate::types::verdict::{FusionMethod, RiskBand, RiskVerdict};
use std::collections::{HashMap, HashSet};

/// Fuses agent results into a [`RiskVerdict`]
#[derive(Debug, Clone)]
pub struct RiskFusionEngine {
    config: FusionConfig,
}

impl RiskFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse results, given in agent invocation order.
    ///
    /// Fails only on inputs no normalizer can produce (duplicate agents,
    /// out-of-range scores); such a failure is a defect, never transient.
    pub fn fuse(
        &self,
        features: &FeatureBundle,
        results: Vec<AgentResult>,
    ) -> Result<RiskVerdict, EvaluationError> {
        self.check(&results)?;

        let usable: Vec<(usize, &AgentResult)> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_usable())
            .collect();

        let penalty_factor = self.penalty_factor(&results);

        let (base_score, method) = if usable.is_empty() {
            (1.0, FusionMethod::NoUsableSignal)
        } else {
            Self::weighted_mean(usable.iter().map(|(_, r)| *r))
        };

        let score = match method {
            FusionMethod::NoUsableSignal => 1.0,
            _ => {
                let penalized = 1.0 - (1.0 - base_score) * penalty_factor;
                let floor = Self::worst_case_floor(&usable, &results, method);
                penalized.max(floor).clamp(0.0, 1.0)
            }
        };
        let band = match method {
            FusionMethod::NoUsableSignal => RiskBand::Critical,
            _ => RiskBand::from_score(score, &self.config.bands),
        };

        let attributions = self.merge_attributions(&usable);

        let mut verdict = RiskVerdict {
            transaction_id: features.transaction_id.clone(),
            score,
            base_score,
            penalty_factor,
            band,
            method,
            agents: results,
            attributions,
            vocabulary_version: features.vocabulary_version.clone(),
            fingerprint: String::new(),
        };
        verdict.fingerprint = verdict.compute_fingerprint();
        Ok(verdict)
    }

    fn check(&self, results: &[AgentResult]) -> Result<(), EvaluationError> {
        let mut seen = HashSet::new();
        for result in results {
            if !seen.insert(result.agent) {
                return Err(EvaluationError::fusion_defect(format!(
                    "duplicate result for agent {}",
                    result.agent
                )));
            }
            let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
            if !in_unit(result.confidence) {
                return Err(EvaluationError::fusion_defect(format!(
                    "agent {} confidence {} outside [0,1]",
                    result.agent, result.confidence
                )));
            }
            if result.status == AgentStatus::Ok {
                match result.contribution {
                    Some(c) if in_unit(c) => {}
                    other => {
                        return Err(EvaluationError::fusion_defect(format!(
                            "agent {} is ok but contribution is {:?}",
                            result.agent, other
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Confidence-weighted mean; plain mean when every confidence is zero
    fn weighted_mean<'a>(usable: impl Iterator<Item = &'a AgentResult> + Clone) -> (f64, FusionMethod) {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for result in usable.clone() {
            let contribution = result.contribution.unwrap_or_default();
            weighted_sum += contribution * result.confidence;
            total_weight += result.confidence;
        }

        if total_weight > 0.0 {
            ((weighted_sum / total_weight).clamp(0.0, 1.0), FusionMethod::ConfidenceWeighted)
        } else {
            let (sum, count) = usable.fold((0.0, 0usize), |(s, n), r| {
                (s + r.contribution.unwrap_or_default(), n + 1)
            });
            ((sum / count as f64).clamp(0.0, 1.0), FusionMethod::UnweightedMean)
        }
    }

    /// Weighted mean with every Failed or TimedOut agent scored at 1.0 and
    /// full confidence; 0.0 when none are missing
    fn worst_case_floor(
        usable: &[(usize, &AgentResult)],
        results: &[AgentResult],
        method: FusionMethod,
    ) -> f64 {
        let missing = results
            .iter()
            .filter(|r| matches!(r.status, AgentStatus::Failed | AgentStatus::TimedOut))
            .count() as f64;
        if missing == 0.0 {
            return 0.0;
        }

        let (weighted_sum, total_weight) = usable.iter().fold((0.0, 0.0), |(s, w), (_, r)| {
            let contribution = r.contribution.unwrap_or_default();
            match method {
                FusionMethod::UnweightedMean => (s + contribution, w + 1.0),
                _ => (s + contribution * r.confidence, w + r.confidence),
            }
        });
        (weighted_sum + missing) / (total_weight + missing)
    }

    /// Product of `(1 - w)` over unusable agents; 1.0 when all are usable
    fn penalty_factor(&self, results: &[AgentResult]) -> f64 {
        results
            .iter()
            .filter(|r| !r.is_usable())
            .map(|r| match r.status {
                AgentStatus::Skipped => self.config.skipped_penalty_weight,
                _ => self.config.unusable_penalty_weight,
            })
            .fold(1.0, |factor, weight| factor * (1.0 - weight))
    }

    fn merge_attributions(&self, usable: &[(usize, &AgentResult)]) -> Vec<Attribution> {
        struct Merged {
            attribution: Attribution,
            first_agent: usize,
        }

        let mut order: Vec<Merged> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for (agent_pos, result) in usable {
            for attribution in &result.attributions {
                match index.get(attribution.feature.as_str()) {
                    Some(&i) => order[i].attribution.weight += attribution.weight,
                    None => {
                        index.insert(attribution.feature.as_str(), order.len());
                        order.push(Merged {
                            attribution: attribution.clone(),
                            first_agent: *agent_pos,
                        });
                    }
                }
            }
        }

        order.sort_by(|a, b| {
            b.attribution
                .weight
                .abs()
                .total_cmp(&a.attribution.weight.abs())
                .then_with(|| a.first_agent.cmp(&b.first_agent))
                .then_with(|| a.attribution.feature.cmp(&b.attribution.feature))
        });
        order.truncate(self.config.top_k);
        order.into_iter().map(|m| m.attribution).collect()
    }
}

impl Default for RiskFusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::agent::AgentId;
    use crate::types::features::{FeatureName, FeatureValue};
    use std::collections::{BTreeMap, BTreeSet};

    fn bundle() -> FeatureBundle {
        let values: BTreeMap<_, _> = FeatureName::bundle_features()
            .map(|f| (f, FeatureValue::Numeric(0.0)))
            .collect();
        FeatureBundle::new("tx_fuse", values, BTreeSet::new(), vec![]).unwrap()
    }

    fn attribution(feature: &str, weight: f64) -> Attribution {
        Attribution {
            feature: feature.to_string(),
            weight,
            label: feature.to_string(),
        }
    }

    fn ok(agent: AgentId, contribution: f64, confidence: f64) -> AgentResult {
        AgentResult {
            agent,
            status: AgentStatus::Ok,
            contribution: Some(contribution),
            confidence,
            attributions: vec![],
            latency_us: 10,
            detail: None,
        }
    }

    fn timed_out(agent: AgentId) -> AgentResult {
        AgentResult::unusable(agent, AgentStatus::TimedOut, 800_000, "no result within 800ms")
    }

    #[test]
    fn test_no_media_scenario_stays_low() {
        let engine = RiskFusionEngine::default();
        let verdict = engine
            .fuse(
                &bundle(),
                vec![
                    ok(AgentId::TransactionMonitor, 0.2, 0.9),
                    AgentResult::skipped(AgentId::DeepfakeDetection, "no media"),
                ],
            )
            .unwrap();

        assert!((verdict.base_score - 0.2).abs() < 1e-12);
        assert!((verdict.score - 0.32).abs() < 1e-9);
        assert!(verdict.score > verdict.base_score);
        assert_eq!(verdict.band, RiskBand::Low);
        assert_eq!(verdict.method, FusionMethod::ConfidenceWeighted);
        assert_eq!(verdict.agents.len(), 2);
    }

    #[test]
    fn test_both_agents_high_is_critical() {
        let verdict = RiskFusionEngine::default()
            .fuse(
                &bundle(),
                vec![
                    ok(AgentId::TransactionMonitor, 0.9, 0.95),
                    ok(AgentId::DeepfakeDetection, 0.85, 0.8),
                ],
            )
            .unwrap();

        assert!(verdict.score >= 0.85);
        assert_eq!(verdict.penalty_factor, 1.0);
        assert_eq!(verdict.band, RiskBand::Critical);
    }

    #[test]
    fn test_no_usable_signal_is_critical() {
        let verdict = RiskFusionEngine::default()
            .fuse(
                &bundle(),
                vec![
                    timed_out(AgentId::TransactionMonitor),
                    timed_out(AgentId::DeepfakeDetection),
                ],
            )
            .unwrap();

        assert_eq!(verdict.band, RiskBand::Critical);
        assert_eq!(verdict.method, FusionMethod::NoUsableSignal);
        assert_eq!(verdict.method.as_str(), "no_usable_signal");
        assert_eq!(verdict.score, 1.0);
        assert!(verdict.attributions.is_empty());
    }

    #[test]
    fn test_unusable_agents_never_lower_score() {
        let engine = RiskFusionEngine::default();
        let usable = ok(AgentId::TransactionMonitor, 0.4, 0.7);

        let alone = engine.fuse(&bundle(), vec![usable.clone()]).unwrap();
        let with_skip = engine
            .fuse(
                &bundle(),
                vec![
                    usable.clone(),
                    AgentResult::skipped(AgentId::DeepfakeDetection, "no media"),
                ],
            )
            .unwrap();
        let with_timeout = engine
            .fuse(
                &bundle(),
                vec![usable.clone(), timed_out(AgentId::DeepfakeDetection)],
            )
            .unwrap();

        assert!(with_skip.score >= alone.score);
        assert!(with_timeout.score >= with_skip.score);
        assert!(with_timeout.band >= alone.band);
    }

    #[test]
    fn test_missing_biometric_never_lowers_risk_versus_fully_scored_low() {
        let engine = RiskFusionEngine::default();
        let monitor = ok(AgentId::TransactionMonitor, 0.6, 0.9);
        let fully_scored = engine
            .fuse(
                &bundle(),
                vec![monitor.clone(), ok(AgentId::DeepfakeDetection, 0.0, 0.9)],
            )
            .unwrap();
        let missing = engine
            .fuse(&bundle(), vec![monitor, timed_out(AgentId::DeepfakeDetection)])
            .unwrap();
        assert!(missing.score >= fully_scored.score);
    }

    #[test]
    fn test_missing_biometric_never_lowers_risk_versus_failed_verification() {
        let engine = RiskFusionEngine::default();
        let monitor = ok(AgentId::TransactionMonitor, 0.1, 0.9);

        let flagged_sample = engine
            .fuse(
                &bundle(),
                vec![monitor.clone(), ok(AgentId::DeepfakeDetection, 0.9, 0.95)],
            )
            .unwrap();
        let worst_sample = engine
            .fuse(
                &bundle(),
                vec![monitor.clone(), ok(AgentId::DeepfakeDetection, 1.0, 1.0)],
            )
            .unwrap();
        let timed_out_check = engine
            .fuse(&bundle(), vec![monitor.clone(), timed_out(AgentId::DeepfakeDetection)])
            .unwrap();
        let failed_check = engine
            .fuse(
                &bundle(),
                vec![
                    monitor,
                    AgentResult::unusable(
                        AgentId::DeepfakeDetection,
                        AgentStatus::Failed,
                        1_000,
                        "biometric service returned 503",
                    ),
                ],
            )
            .unwrap();

        assert!(timed_out_check.score + 1e-12 >= worst_sample.score);
        assert!(timed_out_check.score >= flagged_sample.score);
        assert!(timed_out_check.band >= flagged_sample.band);
        assert!(failed_check.score + 1e-12 >= worst_sample.score);
        // (0.09 + 1.0) / (0.9 + 1.0)
        assert!((timed_out_check.score - 1.09 / 1.9).abs() < 1e-9);
        assert!((timed_out_check.base_score - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_skipped_agent_takes_penalty_only() {
        let verdict = RiskFusionEngine::default()
            .fuse(
                &bundle(),
                vec![
                    ok(AgentId::TransactionMonitor, 0.1, 0.9),
                    AgentResult::skipped(AgentId::DeepfakeDetection, "no media"),
                ],
            )
            .unwrap();
        // 1 - 0.9 * 0.85
        assert!((verdict.score - 0.235).abs() < 1e-9);
        assert_eq!(verdict.band, RiskBand::Low);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let engine = RiskFusionEngine::default();
        let mut monitor = ok(AgentId::TransactionMonitor, 0.55, 0.8);
        monitor.attributions = vec![attribution("transaction_amount", 0.3)];
        let results = vec![monitor, timed_out(AgentId::DeepfakeDetection)];

        let first = engine.fuse(&bundle(), results.clone()).unwrap();
        let second = engine.fuse(&bundle(), results).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.score.to_bits(), second.score.to_bits());
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_attribution_merge_ranking() {
        let mut engine_config = FusionConfig::default();
        engine_config.top_k = 3;
        let engine = RiskFusionEngine::new(engine_config);

        let mut monitor = ok(AgentId::TransactionMonitor, 0.5, 0.5);
        monitor.attributions = vec![
            attribution("transaction_amount", 0.2),
            attribution("txn_count_24h", 0.1),
            attribution("hour_of_day", -0.05),
        ];
        let mut biometric = ok(AgentId::DeepfakeDetection, 0.5, 0.5);
        biometric.attributions = vec![
            attribution("transaction_amount", 0.15),
            attribution("face_match_score", 0.1),
            attribution("unmapped:blink_rate", 0.01),
        ];
        let verdict = engine
            .fuse(&bundle(), vec![monitor, biometric])
            .unwrap();
        let ranked: Vec<(&str, f64)> = verdict
            .attributions
            .iter()
            .map(|a| (a.feature.as_str(), a.weight))
            .collect();

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, "transaction_amount");
        assert!((ranked[0].1 - 0.35).abs() < 1e-12);
        // Equal weight: the monitor's feature wins on invocation order
        assert_eq!(ranked[1].0, "txn_count_24h");
        assert_eq!(ranked[2].0, "face_match_score");
    }

    #[test]
    fn test_duplicate_agent_is_a_defect() {
        let err = RiskFusionEngine::default()
            .fuse(
                &bundle(),
                vec![
                    ok(AgentId::TransactionMonitor, 0.5, 0.5),
                    timed_out(AgentId::TransactionMonitor),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, EvaluationError::FusionDefect { .. }));
    }

    #[test]
    fn test_zero_confidence_falls_back_to_mean() {
        let verdict = RiskFusionEngine::default()
            .fuse(
                &bundle(),
                vec![
                    ok(AgentId::TransactionMonitor, 0.2, 0.0),
                    ok(AgentId::DeepfakeDetection, 0.6, 0.0),
                ],
            )
            .unwrap();
        assert_eq!(verdict.method, FusionMethod::UnweightedMean);
        assert!((verdict.score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_contribution_is_a_defect() {
        let err = RiskFusionEngine::default()
            .fuse(&bundle(), vec![ok(AgentId::TransactionMonitor, 1.5, 0.9)])
            .unwrap_err();
        assert!(matches!(err, EvaluationError::FusionDefect { .. }));
    }
}
