//! Normalized per-agent opinions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scoring agent families known to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    TransactionMonitor,
    DeepfakeDetection,
}

impl AgentId {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::TransactionMonitor => "transaction_monitor",
            AgentId::DeepfakeDetection => "deepfake_detection",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Ok,
    TimedOut,
    Failed,
    Skipped,
}

impl AgentStatus {
    /// Only `Ok` results carry a meaningful contribution
    pub fn is_usable(&self) -> bool {
        matches!(self, AgentStatus::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Ok => "ok",
            AgentStatus::TimedOut => "timed_out",
            AgentStatus::Failed => "failed",
            AgentStatus::Skipped => "skipped",
        }
    }
}

/// A (feature, weight) pair explaining part of an agent's score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    /// Vocabulary id, or `unmapped:<raw-name>` for identifiers outside the vocabulary
    pub feature: String,
    /// Signed contribution; positive values push toward fraud
    pub weight: f64,
    /// Human label
    pub label: String,
}

impl Attribution {
    pub fn is_unmapped(&self) -> bool {
        self.feature.starts_with(UNMAPPED_PREFIX)
    }
}

/// Prefix for attributions whose native identifier is not in the vocabulary
pub const UNMAPPED_PREFIX: &str = "unmapped:";

/// One agent's normalized opinion. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: AgentId,
    pub status: AgentStatus,
    /// Risk contribution in [0,1]; `None` unless status is `Ok`
    pub contribution: Option<f64>,
    /// Confidence in [0,1]
    pub confidence: f64,
    /// Attributions ordered by descending absolute weight
    pub attributions: Vec<Attribution>,
    /// Wall time spent on the agent, in microseconds
    pub latency_us: u64,
    /// Reason for a non-`Ok` status (skip cause, error text)
    #[serde(default)]
    pub detail: Option<String>,
}

impl AgentResult {
    pub fn is_usable(&self) -> bool {
        self.status.is_usable() && self.contribution.is_some()
    }

    /// Result for an agent that was not invoked
    pub fn skipped(agent: AgentId, reason: impl Into<String>) -> Self {
        Self {
            agent,
            status: AgentStatus::Skipped,
            contribution: Some(0.0),
            confidence: 0.0,
            attributions: Vec::new(),
            latency_us: 0,
            detail: Some(reason.into()),
        }
    }

    /// Result for an agent whose invocation did not complete.
    ///
    /// The contribution is unknown, not zero.
    pub fn unusable(
        agent: AgentId,
        status: AgentStatus,
        latency_us: u64,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            status,
            contribution: None,
            confidence: 0.0,
            attributions: Vec::new(),
            latency_us,
            detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_result_is_not_usable() {
        let result = AgentResult::skipped(AgentId::DeepfakeDetection, "no media supplied");
        assert_eq!(result.status, AgentStatus::Skipped);
        assert_eq!(result.contribution, Some(0.0));
        assert_eq!(result.confidence, 0.0);
        assert!(!result.is_usable());
    }

    #[test]
    fn test_failed_contribution_is_unknown() {
        let result = AgentResult::unusable(
            AgentId::TransactionMonitor,
            AgentStatus::Failed,
            1200,
            "model error",
        );
        assert!(result.contribution.is_none());
        assert!(!result.is_usable());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&AgentStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        let json = serde_json::to_string(&AgentId::DeepfakeDetection).unwrap();
        assert_eq!(json, "\"deepfake_detection\"");
    }
}
