//! Narrative summaries of verdicts

use crate::types::agent::AgentStatus;
use crate::types::verdict::{FusionMethod, RiskVerdict};
use anyhow::Result;
use async_trait::async_trait;

/// Turns a verdict's band and ranked attributions into prose
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, verdict: &RiskVerdict) -> Result<String>;
}

/// Deterministic built-in summarizer
#[derive(Debug, Clone, Default)]
pub struct TemplateSummarizer;

impl TemplateSummarizer {
    pub fn render(verdict: &RiskVerdict) -> String {
        let mut parts = vec![format!(
            "Risk {} (score {:.2}).",
            verdict.band.as_str().to_uppercase(),
            verdict.score
        )];

        if verdict.method == FusionMethod::NoUsableSignal {
            parts.push("No agent produced a usable score; treated as maximally suspicious.".to_string());
        }

        if !verdict.attributions.is_empty() {
            let factors: Vec<String> = verdict
                .attributions
                .iter()
                .map(|a| format!("{} ({:+.2})", a.label, a.weight))
                .collect();
            parts.push(format!("Top factors: {}.", factors.join(", ")));
        }

        for result in verdict.agents.iter().filter(|r| r.status != AgentStatus::Ok) {
            let why = result.detail.as_deref().unwrap_or("no detail");
            parts.push(format!("{} {}: {}.", result.agent, result.status.as_str(), why));
        }

        parts.join(" ")
    }
}

#[async_trait]
impl Summarizer for TemplateSummarizer {
    async fn summarize(&self, verdict: &RiskVerdict) -> Result<String> {
        Ok(Self::render(verdict))
    }
}
