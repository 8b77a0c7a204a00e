//! Evaluation metrics and periodic summaries

use crate::types::agent::{AgentId, AgentStatus};
use crate::types::escalation::EscalationState;
use crate::types::verdict::RiskBand;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const LATENCY_WINDOW: usize = 10_000;
const AGENT_LATENCY_WINDOW: usize = 1_000;

/// Counters and latency windows for the orchestrator
pub struct EvaluationMetrics {
    pub evaluations: AtomicU64,
    pub evaluation_errors: AtomicU64,
    verdicts_by_band: RwLock<HashMap<RiskBand, u64>>,
    /// End-to-end evaluation times in microseconds
    evaluation_times: RwLock<Vec<u64>>,
    agent_times: RwLock<HashMap<AgentId, Vec<u64>>>,
    agent_statuses: RwLock<HashMap<(AgentId, AgentStatus), u64>>,
    escalations: RwLock<HashMap<EscalationState, u64>>,
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl EvaluationMetrics {
    pub fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            evaluation_errors: AtomicU64::new(0),
            verdicts_by_band: RwLock::new(HashMap::new()),
            evaluation_times: RwLock::new(Vec::with_capacity(1000)),
            agent_times: RwLock::new(HashMap::new()),
            agent_statuses: RwLock::new(HashMap::new()),
            escalations: RwLock::new(HashMap::new()),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a completed evaluation
    pub fn record_evaluation(&self, duration: Duration, score: f64, band: RiskBand) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.evaluation_times.write() {
            times.push(duration.as_micros() as u64);
            if times.len() > LATENCY_WINDOW {
                times.drain(0..LATENCY_WINDOW / 2);
            }
        }

        let bucket = (score.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }

        if let Ok(mut by_band) = self.verdicts_by_band.write() {
            *by_band.entry(band).or_insert(0) += 1;
        }
    }

    pub fn record_error(&self) {
        self.evaluation_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one agent's terminal status and latency
    pub fn record_agent(&self, agent: AgentId, status: AgentStatus, latency_us: u64) {
        if let Ok(mut statuses) = self.agent_statuses.write() {
            *statuses.entry((agent, status)).or_insert(0) += 1;
        }
        if status == AgentStatus::Skipped {
            return;
        }
        if let Ok(mut times) = self.agent_times.write() {
            let agent_times = times.entry(agent).or_default();
            agent_times.push(latency_us);
            if agent_times.len() > AGENT_LATENCY_WINDOW {
                agent_times.drain(0..AGENT_LATENCY_WINDOW / 2);
            }
        }
    }

    /// Record the state an escalation moved into
    pub fn record_escalation(&self, state: EscalationState) {
        if let Ok(mut escalations) = self.escalations.write() {
            *escalations.entry(state).or_insert(0) += 1;
        }
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        match self.evaluation_times.read() {
            Ok(times) => ProcessingStats::from_samples(&times),
            Err(_) => ProcessingStats::default(),
        }
    }

    pub fn get_agent_stats(&self) -> HashMap<AgentId, ProcessingStats> {
        let Ok(times) = self.agent_times.read() else {
            return HashMap::new();
        };
        times
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(agent, samples)| (*agent, ProcessingStats::from_samples(samples)))
            .collect()
    }

    /// Count of results with `status` for `agent`
    pub fn agent_status_count(&self, agent: AgentId, status: AgentStatus) -> u64 {
        self.agent_statuses
            .read()
            .ok()
            .and_then(|s| s.get(&(agent, status)).copied())
            .unwrap_or(0)
    }

    pub fn band_count(&self, band: RiskBand) -> u64 {
        self.verdicts_by_band
            .read()
            .ok()
            .and_then(|b| b.get(&band).copied())
            .unwrap_or(0)
    }

    pub fn escalation_count(&self, state: EscalationState) -> u64 {
        self.escalations
            .read()
            .ok()
            .and_then(|e| e.get(&state).copied())
            .unwrap_or(0)
    }

    /// Evaluations per second since start
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.evaluations.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    pub fn print_summary(&self) {
        let evaluations = self.evaluations.load(Ordering::Relaxed);
        let errors = self.evaluation_errors.load(Ordering::Relaxed);
        let processing = self.get_processing_stats();

        info!(
            evaluations = evaluations,
            errors = errors,
            throughput = format!("{:.1} tx/s", self.get_throughput()),
            mean_us = processing.mean_us,
            p50_us = processing.p50_us,
            p95_us = processing.p95_us,
            p99_us = processing.p99_us,
            "Evaluation summary"
        );

        for band in [RiskBand::Low, RiskBand::Medium, RiskBand::High, RiskBand::Critical] {
            let count = self.band_count(band);
            let pct = if evaluations > 0 {
                count as f64 / evaluations as f64 * 100.0
            } else {
                0.0
            };
            info!(band = %band, count = count, pct = format!("{:.1}%", pct), "Verdicts by band");
        }

        for (agent, stats) in self.get_agent_stats() {
            info!(
                agent = %agent,
                calls = stats.count,
                timed_out = self.agent_status_count(agent, AgentStatus::TimedOut),
                failed = self.agent_status_count(agent, AgentStatus::Failed),
                mean_us = stats.mean_us,
                p99_us = stats.p99_us,
                "Agent latency"
            );
        }

        if let Ok(escalations) = self.escalations.read() {
            for (state, count) in escalations.iter() {
                info!(state = %state, count = *count, "Escalation transitions");
            }
        }

        let distribution = self.get_score_distribution();
        let total: u64 = distribution.iter().sum();
        if total > 0 {
            let summary: Vec<String> = distribution
                .iter()
                .enumerate()
                .map(|(i, count)| format!("{:.1}:{}", i as f64 / 10.0, count))
                .collect();
            info!(buckets = %summary.join(" "), "Risk score distribution");
        }
    }
}

impl Default for EvaluationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency percentiles in microseconds
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl ProcessingStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];
        Self {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: at(0.50),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }
}

/// Logs a metrics summary on a fixed interval
pub struct MetricsReporter {
    metrics: Arc<EvaluationMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<EvaluationMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = EvaluationMetrics::new();

        metrics.record_evaluation(Duration::from_micros(100), 0.32, RiskBand::Low);
        metrics.record_evaluation(Duration::from_micros(300), 0.91, RiskBand::Critical);
        metrics.record_error();

        assert_eq!(metrics.evaluations.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.evaluation_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.band_count(RiskBand::Critical), 1);
        assert_eq!(metrics.band_count(RiskBand::High), 0);

        let distribution = metrics.get_score_distribution();
        assert_eq!(distribution[3], 1);
        assert_eq!(distribution[9], 1);

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean_us, 200);
        assert_eq!(stats.max_us, 300);
    }

    #[test]
    fn test_agent_and_escalation_counts() {
        let metrics = EvaluationMetrics::new();
        metrics.record_agent(AgentId::TransactionMonitor, AgentStatus::Ok, 1200);
        metrics.record_agent(AgentId::DeepfakeDetection, AgentStatus::TimedOut, 1_500_000);
        metrics.record_agent(AgentId::DeepfakeDetection, AgentStatus::Skipped, 0);
        metrics.record_escalation(EscalationState::Flagged);
        metrics.record_escalation(EscalationState::Flagged);

        assert_eq!(
            metrics.agent_status_count(AgentId::DeepfakeDetection, AgentStatus::TimedOut),
            1
        );
        assert_eq!(metrics.escalation_count(EscalationState::Flagged), 2);

        let agent_stats = metrics.get_agent_stats();
        // Skipped agents carry no latency sample
        assert_eq!(agent_stats[&AgentId::DeepfakeDetection].count, 1);
        assert_eq!(agent_stats[&AgentId::TransactionMonitor].p50_us, 1200);
    }
}
